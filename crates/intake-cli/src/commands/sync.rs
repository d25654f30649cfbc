//! Sync command handler

use anyhow::{bail, Result};

use intake_core::{PushOutcome, Store};

use crate::output::Output;

/// Replay queued writes against the remote
///
/// With `full`, every local record is uploaded in one batch first.
pub async fn sync(store: &Store, full: bool, output: &Output) -> Result<()> {
    if store.config().active_remote_url().is_none() {
        bail!(
            "Sync is not configured. Enable it with:\n  \
             intake config set remote_url https://your-server/api\n  \
             intake config set sync_enabled true"
        );
    }

    if full {
        output.message("Uploading all local records...");
        if store.sync().push_all().await == PushOutcome::Queued {
            output.warn("Batch upload failed; records were queued");
        }
    }

    let report = store.drain().await;
    if report.offline {
        bail!("Remote is unreachable; {} write(s) still queued", report.remaining);
    }

    if report.pushed == 0 && report.failed == 0 {
        output.success("Already up to date");
    } else if report.remaining == 0 {
        output.success(&format!("Synced {} write(s)", report.pushed));
    } else {
        output.warn(&format!(
            "Synced {} write(s); {} failed, {} still queued",
            report.pushed, report.failed, report.remaining
        ));
    }
    Ok(())
}
