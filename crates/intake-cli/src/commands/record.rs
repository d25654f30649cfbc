//! Record command handlers

use anyhow::{bail, Context, Result};
use serde_json::Value;

use intake_core::cache::is_valid_collection_name;
use intake_core::{FieldMap, FlushOutcome, PushOutcome, Step, Store};

use crate::output::Output;

/// Resolve a step name (either language) or a plain collection name
pub fn resolve_collection(name: &str) -> Result<String> {
    if let Ok(step) = name.parse::<Step>() {
        return Ok(step.collection().to_string());
    }
    if is_valid_collection_name(name) {
        Ok(name.to_string())
    } else {
        bail!("Invalid collection name: '{}'", name)
    }
}

/// Parse `key=value` arguments into a field map
///
/// Everything after the first `=` is the value, so values may contain `=`.
pub fn parse_fields(pairs: &[String]) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{}'", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Empty field name in '{}'", pair);
        }
        fields.insert(key.to_string(), Value::from(value));
    }
    Ok(fields)
}

/// Store a record
pub async fn set(
    store: &Store,
    collection: String,
    id: Option<String>,
    pairs: Vec<String>,
    output: &Output,
) -> Result<()> {
    let collection = resolve_collection(&collection)?;
    let mut fields = parse_fields(&pairs)?;
    if let Some(id) = id {
        fields.insert("id".to_string(), Value::from(id));
    }

    let (record, outcome) = store.save(&collection, fields).await?;
    output.print_record(&collection, &record);
    match outcome {
        PushOutcome::Pushed { .. } => output.success("Saved and synced"),
        PushOutcome::Queued => output.success("Saved locally; queued for sync"),
    }
    Ok(())
}

/// Show one record, or every record of a collection
pub fn get(store: &Store, collection: String, id: Option<String>, output: &Output) -> Result<()> {
    let collection = resolve_collection(&collection)?;
    match id {
        Some(id) => {
            let record = store
                .get_item(&collection, &id)
                .with_context(|| format!("No record '{}' in {}", id, collection))?;
            output.print_record(&collection, &record);
        }
        None => output.print_records(&collection, &store.get(&collection)),
    }
    Ok(())
}

/// Delete a record
pub async fn remove(store: &Store, collection: String, id: String, output: &Output) -> Result<()> {
    let collection = resolve_collection(&collection)?;
    if !store.remove(&collection, &id).await {
        bail!("No record '{}' in {}", id, collection);
    }
    output.success(&format!("Removed {}/{}", collection, id));
    Ok(())
}

/// Write pending changes to disk now
pub async fn flush(store: &Store, output: &Output) -> Result<()> {
    report_flush(store.flush().await, output)
}

/// Report a flush outcome; only an outright failure is an error
pub fn report_flush(outcome: FlushOutcome, output: &Output) -> Result<()> {
    match outcome {
        FlushOutcome::Clean => output.message("Nothing to save"),
        FlushOutcome::Saved => output.success("Saved"),
        FlushOutcome::SavedAfterEviction {
            collection,
            evicted,
        } => output.warn(&format!(
            "Storage was full; removed {} old record(s) from {}",
            evicted, collection
        )),
        FlushOutcome::Failed { reason } => bail!("Could not save local state: {}", reason),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_collection() {
        assert_eq!(resolve_collection("personal").unwrap(), "pessoal");
        assert_eq!(resolve_collection("social").unwrap(), "social");
        assert_eq!(resolve_collection("formularios").unwrap(), "formularios");
        assert!(resolve_collection("_lastSaved").is_err());
        assert!(resolve_collection("").is_err());
    }

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(&[
            "cpf=123.456.789-00".to_string(),
            "dependentes[0][nome]=Ana".to_string(),
            "obs=a=b".to_string(),
            "vazio=".to_string(),
        ])
        .unwrap();

        assert_eq!(fields.get("cpf"), Some(&json!("123.456.789-00")));
        assert_eq!(fields.get("dependentes[0][nome]"), Some(&json!("Ana")));
        assert_eq!(fields.get("obs"), Some(&json!("a=b")));
        assert_eq!(fields.get("vazio"), Some(&json!("")));
    }

    #[test]
    fn test_parse_fields_rejects_malformed() {
        assert!(parse_fields(&["novalue".to_string()]).is_err());
        assert!(parse_fields(&["=x".to_string()]).is_err());
    }
}
