//! Status command handler

use anyhow::{Context, Result};

use tally_core::store::last_sync_key;
use tally_core::{Config, LocalStore};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let store = LocalStore::open(config).context("failed to open local store")?;
    let pending = store.queue_len().context("failed to read queue depth")?;

    let mut last_sync = Vec::new();
    for table in &config.synced_tables {
        let stamp = store
            .get_meta(&last_sync_key(table))
            .context("failed to read sync metadata")?
            .map(|(value, _)| value);
        last_sync.push((table.clone(), stamp));
    }

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "sync_interval_secs": config.sync_interval_secs,
                    "queue": { "pending": pending },
                    "tables": last_sync
                        .iter()
                        .map(|(table, stamp)| {
                            serde_json::json!({
                                "table": table,
                                "last_sync": stamp
                            })
                        })
                        .collect::<Vec<_>>()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("Tally Status");
            println!("============");
            println!();
            println!("Backend:");
            match &config.api_url {
                Some(url) => println!("  API: {}", url),
                None => println!("  API: (not configured)"),
            }
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!("  Database: {}", config.sqlite_path().display());
            println!();
            println!("Queue:");
            println!("  Pending mutations: {}", pending);
            println!();
            println!("Tables:");
            for (table, stamp) in &last_sync {
                match stamp {
                    Some(at) => println!("  {:<12} last synced {}", table, at),
                    None => println!("  {:<12} never synced", table),
                }
            }
        }
    }

    Ok(())
}
