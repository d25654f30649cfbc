//! Status command handler

use anyhow::Result;

use intake_core::Store;

use crate::output::Output;

/// Show status information
pub async fn show(store: &Store, output: &Output) -> Result<()> {
    let status = store.status().await;
    output.print_status(&status, store.sync_status());

    if status.queued > 0 && status.remote_url.is_none() {
        output.warn("Writes are queued but no remote is configured. Set one with:\n  \
             intake config set remote_url https://your-server/api\n  \
             intake config set sync_enabled true");
    }
    Ok(())
}
