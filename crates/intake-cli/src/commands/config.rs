//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use intake_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, snapshot_key, queue_key, debounce_ms, eviction_ratio, \
     quota_bytes, remote_url, sync_enabled, retry_initial_ms, retry_max_ms, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => output.json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            let not_set = || "(not set)".to_string();
            println!("Configuration:");
            println!("  data_dir:         {}", config.data_dir.display());
            println!("  snapshot_key:     {}", config.snapshot_key);
            println!("  queue_key:        {}", config.queue_key);
            println!("  debounce_ms:      {}", config.debounce_ms);
            println!("  eviction_ratio:   {}", config.eviction_ratio);
            println!(
                "  quota_bytes:      {}",
                config.quota_bytes.map(|q| q.to_string()).unwrap_or_else(not_set)
            );
            println!(
                "  remote_url:       {}",
                config.remote_url.clone().unwrap_or_else(not_set)
            );
            println!("  sync_enabled:     {}", config.sync_enabled);
            println!("  retry_initial_ms: {}", config.retry_initial_ms);
            println!("  retry_max_ms:     {}", config.retry_max_ms);
            println!(
                "  log_file:         {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(not_set)
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Apply one `key = value` change to a config
pub fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";
    match key {
        "data_dir" => config.data_dir = value.into(),
        "snapshot_key" => config.snapshot_key = value.to_string(),
        "queue_key" => config.queue_key = value.to_string(),
        "debounce_ms" => {
            config.debounce_ms = value
                .parse()
                .context("Invalid value for debounce_ms. Use a number of milliseconds.")?;
        }
        "eviction_ratio" => {
            let ratio: f64 = value
                .parse()
                .context("Invalid value for eviction_ratio. Use a number like 0.2.")?;
            if !(ratio > 0.0 && ratio <= 1.0) {
                bail!("eviction_ratio must be greater than 0 and at most 1");
            }
            config.eviction_ratio = ratio;
        }
        "quota_bytes" => {
            config.quota_bytes = if unset {
                None
            } else {
                Some(value.parse().context("Invalid value for quota_bytes.")?)
            };
        }
        "remote_url" => {
            config.remote_url = if unset { None } else { Some(value.to_string()) };
        }
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "retry_initial_ms" => {
            config.retry_initial_ms = value
                .parse()
                .context("Invalid value for retry_initial_ms.")?;
        }
        "retry_max_ms" => {
            config.retry_max_ms = value.parse().context("Invalid value for retry_max_ms.")?;
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    if config.snapshot_key == config.queue_key {
        bail!("snapshot_key and queue_key must differ");
    }
    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
