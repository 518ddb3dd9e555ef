//! Queue command handler

use anyhow::{Context, Result};

use tally_core::{Config, LocalStore};

use crate::output::{Output, OutputFormat};

/// List queued mutations waiting to be replayed
pub fn list(config: &Config, output: &Output) -> Result<()> {
    let store = LocalStore::open(config).context("failed to open local store")?;
    let items = store.list_queue(None).context("failed to read queue")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!(items
                    .iter()
                    .map(|item| {
                        serde_json::json!({
                            "id": item.id,
                            "action": item.action.as_str(),
                            "table": item.table,
                            "payload": item.payload,
                            "temp_id": item.temp_id,
                            "enqueued_at": item.enqueued_at.to_rfc3339(),
                            "retry_count": item.retry_count
                        })
                    })
                    .collect::<Vec<_>>())
            );
        }
        OutputFormat::Quiet => {
            println!("{}", items.len());
        }
        OutputFormat::Human => {
            if items.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            println!("{} pending mutation(s):", items.len());
            println!();
            for item in &items {
                println!(
                    "  #{} {} {} (queued {}, {} retries)",
                    item.id,
                    item.action.as_str(),
                    item.table,
                    item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                    item.retry_count
                );
                if let Some(ref temp_id) = item.temp_id {
                    println!("      temp id: {}", temp_id);
                }
            }
        }
    }

    Ok(())
}
