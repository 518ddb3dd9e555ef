//! Sync command handler

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use tally_core::{
    Config, ConnectivitySignal, HttpBackend, LocalStore, QueueSynchronizer, SnapshotSynchronizer,
    SyncOrchestrator,
};

use crate::output::Output;

const NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one sync pass against the remote backend
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    let Some(ref api_url) = config.api_url else {
        bail!(
            "API URL not configured. Set it with:\n  \
             TALLY_API_URL=https://your-server\n  \
             or api_url in {}",
            Config::config_file_path().display()
        );
    };

    let store = Arc::new(LocalStore::open(config).context("failed to open local store")?);
    let backend =
        Arc::new(HttpBackend::new(api_url, NETWORK_TIMEOUT).context("failed to build client")?);

    let orchestrator = SyncOrchestrator::new(
        QueueSynchronizer::new(backend.clone(), store.clone(), config.max_retries),
        SnapshotSynchronizer::new(
            backend.clone(),
            store.clone(),
            config.synced_tables.clone(),
            config.snapshot_row_limit,
        ),
        store.clone(),
        ConnectivitySignal::new(true),
        config.sync_interval(),
    );

    output.message(&format!("Syncing with {}...", api_url));

    let Some(summary) = orchestrator.sync_now().await else {
        bail!("a sync pass is already running");
    };

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({
                "succeeded": summary.succeeded,
                "failed": summary.failed,
                "errors": summary.errors,
                "pending": store.queue_len().unwrap_or(0)
            })
        );
        return Ok(());
    }

    if summary.failed == 0 {
        output.success(&format!(
            "Sync complete - {} operation(s) applied",
            summary.succeeded
        ));
    } else {
        output.message(&format!(
            "Sync finished with errors - {} applied, {} failed",
            summary.succeeded, summary.failed
        ));
        for error in &summary.errors {
            output.message(&format!("  {}", error));
        }
    }

    let pending = store.queue_len().context("failed to read queue depth")?;
    if pending > 0 {
        output.message(&format!("  {} mutation(s) still queued", pending));
    }

    Ok(())
}
