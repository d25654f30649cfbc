//! Form state manager
//!
//! Moves field values between the form UI and the local cache. Each step's
//! values are stored as one record, keyed by the form id, in the step's
//! collection. Progress through the form is kept as a record with the same
//! id in the `formularios` collection.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use super::step::{Step, FORMS_COLLECTION};
use super::view::{ElementKind, FieldIndex, FormElement, FormView};
use crate::cache::{CacheError, LocalCache};
use crate::models::{system_fields, FieldMap, ItemRecord};
use crate::sync::{PullOutcome, SyncCoordinator};

/// Field holding the step the user is on
const CURRENT_STEP_FIELD: &str = "currentStep";
/// Field holding the steps already completed
const COMPLETED_STEPS_FIELD: &str = "completedSteps";

/// Where a form stands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormProgress {
    pub current_step: Option<Step>,
    pub completed_steps: BTreeSet<Step>,
}

impl FormProgress {
    /// Whether every step has been completed
    pub fn is_complete(&self) -> bool {
        self.completed_steps.len() == Step::ALL.len()
    }

    /// First step not yet completed
    pub fn first_pending(&self) -> Option<Step> {
        Step::ALL
            .into_iter()
            .find(|s| !self.completed_steps.contains(s))
    }

    fn from_record(record: &ItemRecord) -> Self {
        let current_step = record
            .get_str(CURRENT_STEP_FIELD)
            .and_then(|s| s.parse().ok());
        let completed_steps = record
            .get(COMPLETED_STEPS_FIELD)
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            current_step,
            completed_steps,
        }
    }

    fn to_fields(&self, form_id: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(system_fields::ID.to_string(), Value::from(form_id));
        if let Some(step) = self.current_step {
            fields.insert(CURRENT_STEP_FIELD.to_string(), Value::from(step.collection()));
        }
        fields.insert(
            COMPLETED_STEPS_FIELD.to_string(),
            Value::Array(
                self.completed_steps
                    .iter()
                    .map(|s| Value::from(s.collection()))
                    .collect(),
            ),
        );
        fields
    }
}

/// Binds one form instance to the cache and the sync coordinator
pub struct FormStateManager<V: FormView> {
    cache: LocalCache,
    sync: SyncCoordinator,
    form_id: String,
    view: V,
    indexes: HashMap<Step, FieldIndex>,
}

impl<V: FormView> FormStateManager<V> {
    pub fn new(cache: LocalCache, sync: SyncCoordinator, form_id: impl Into<String>, view: V) -> Self {
        Self {
            cache,
            sync,
            form_id: form_id.into(),
            view,
            indexes: HashMap::new(),
        }
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Rebuild the element index of a step, e.g. after rows were added
    pub fn refresh_index(&mut self, step: Step) {
        let index = FieldIndex::build(&self.view.elements(step));
        self.indexes.insert(step, index);
    }

    // ==================== Capture / restore ====================

    /// Read the visible fields of `step` and store them
    ///
    /// The record is written to the cache first, then pushed (or queued
    /// when the push cannot go through).
    pub async fn capture(&mut self, step: Step) -> Result<ItemRecord, CacheError> {
        let mut fields = collect_fields(&self.view.elements(step));
        fields.insert(system_fields::ID.to_string(), Value::from(self.form_id.as_str()));

        let record = self.cache.set(step.collection(), fields)?;
        debug!(
            "Captured {} fields for {}/{}",
            record.fields.len(),
            step,
            self.form_id
        );
        self.sync.push(step.collection(), &record).await;
        Ok(record)
    }

    /// Write stored values back into the form
    ///
    /// Returns how many stored fields matched an element. Each written
    /// element gets a change notification.
    pub fn restore(&mut self, step: Step) -> usize {
        let Some(record) = self.cache.get_item(step.collection(), &self.form_id) else {
            return 0;
        };

        let elements: HashMap<_, _> = self.view.elements(step).into_iter().collect();
        if !self.indexes.contains_key(&step) {
            self.refresh_index(step);
        }
        let Some(index) = self.indexes.get(&step) else {
            return 0;
        };

        let mut restored = 0;
        let mut touched = Vec::new();
        for (key, value) in &record.fields {
            let handles = index.lookup(key);
            if handles.is_empty() {
                continue;
            }
            restored += 1;

            for handle in handles {
                let Some(element) = elements.get(&handle) else {
                    continue;
                };
                match element.kind {
                    ElementKind::Text => self.view.write_value(handle, &value_to_text(value)),
                    ElementKind::Checkbox => {
                        let checked = match value {
                            Value::Array(items) => items
                                .iter()
                                .any(|item| value_to_text(item) == element.value),
                            other => is_truthy(other),
                        };
                        self.view.set_checked(handle, checked);
                    }
                    ElementKind::Radio => {
                        self.view
                            .set_checked(handle, value_to_text(value) == element.value);
                    }
                }
                touched.push(handle);
            }
        }

        for handle in touched {
            self.view.dispatch_change(handle);
        }
        debug!("Restored {} fields into {}", restored, step);
        restored
    }

    // ==================== Navigation ====================

    /// Prepare a step for display
    ///
    /// Refreshes the step from the remote when a newer copy exists,
    /// restores it into the form and records it as the current step.
    pub async fn enter_step(&mut self, step: Step) -> Result<usize, CacheError> {
        if self.sync.pull(step.collection(), &self.form_id).await == PullOutcome::Updated {
            debug!("Using newer remote copy of {}/{}", step, self.form_id);
        }
        self.refresh_index(step);
        let restored = self.restore(step);

        let mut progress = self.progress();
        progress.current_step = Some(step);
        self.save_progress(&progress).await?;
        Ok(restored)
    }

    /// Capture a step and mark it completed; returns the next step
    pub async fn complete_step(&mut self, step: Step) -> Result<Option<Step>, CacheError> {
        self.capture(step).await?;

        let mut progress = self.progress();
        progress.completed_steps.insert(step);
        progress.current_step = step.next().or(Some(step));
        self.save_progress(&progress).await?;
        Ok(step.next())
    }

    /// Current progress of this form
    pub fn progress(&self) -> FormProgress {
        self.cache
            .get_item(FORMS_COLLECTION, &self.form_id)
            .map(|record| FormProgress::from_record(&record))
            .unwrap_or_default()
    }

    async fn save_progress(&self, progress: &FormProgress) -> Result<(), CacheError> {
        let record = self
            .cache
            .set(FORMS_COLLECTION, progress.to_fields(&self.form_id))?;
        self.sync.push(FORMS_COLLECTION, &record).await;
        Ok(())
    }

    /// Delete every stored record of this form, locally and remotely
    pub async fn clear(&mut self) -> usize {
        let mut removed = 0;
        let collections = Step::ALL
            .iter()
            .map(|s| s.collection())
            .chain(std::iter::once(FORMS_COLLECTION));
        for collection in collections {
            if self.cache.remove(collection, &self.form_id) {
                removed += 1;
                self.sync.push_delete(collection, &self.form_id).await;
            }
        }
        if removed == 0 {
            warn!("Nothing stored for form {}", self.form_id);
        }
        removed
    }
}

/// Turn visible elements into a field map
///
/// Checkboxes become booleans, except groups named `...[]` which collect the
/// values of their checked boxes. A radio group contributes the value of
/// its checked member.
fn collect_fields(elements: &[(usize, FormElement)]) -> FieldMap {
    let mut fields = FieldMap::new();
    for (_, element) in elements {
        if !element.visible {
            continue;
        }
        let Some(key) = element.field_key() else {
            continue;
        };
        if system_fields::is_system(key) {
            continue;
        }

        match element.kind {
            ElementKind::Text => {
                fields.insert(key.to_string(), Value::from(element.value.as_str()));
            }
            ElementKind::Checkbox if key.ends_with("[]") => {
                let entry = fields
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let (Value::Array(values), true) = (entry, element.checked) {
                    values.push(Value::from(element.value.as_str()));
                }
            }
            ElementKind::Checkbox => {
                fields.insert(key.to_string(), Value::Bool(element.checked));
            }
            ElementKind::Radio => {
                if element.checked {
                    fields.insert(key.to_string(), Value::from(element.value.as_str()));
                } else {
                    fields.entry(key.to_string()).or_insert(Value::Null);
                }
            }
        }
    }
    fields
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "true" | "on" | "1" | "sim"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}
