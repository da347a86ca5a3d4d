//! Cache command - inspect and prune the cache store

use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::{Config, ConfigManager};
use crate::error::StrataResult;
use crate::store::disk::{format_bytes, DiskStore};
use console::style;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> StrataResult<()> {
    let store_dir = ConfigManager::store_dir(config);
    debug!("Opening cache store at {}", store_dir.display());
    let store = DiskStore::open(store_dir).await?;

    match args.action {
        CacheAction::Status => show_status(&store).await,
        CacheAction::Prune { older_than } => {
            prune(&store, older_than.unwrap_or(config.prune.max_age_days)).await
        }
    }
}

/// Print store footprint
async fn show_status(store: &DiskStore) -> StrataResult<()> {
    let status = store.status().await?;

    println!("Cache store: {}", status.root.display());
    println!();
    println!("  Layer entries:  {}", status.layer_entries);
    println!("  Mount caches:   {}", status.mount_slots);
    println!(
        "  Blobs:          {} ({})",
        status.blob_count,
        format_bytes(status.blob_bytes)
    );

    Ok(())
}

/// Remove entries unused past the cutoff, then sweep unreferenced blobs
async fn prune(store: &DiskStore, days: u32) -> StrataResult<()> {
    if days == 0 {
        println!("Pruning is disabled (max_age_days = 0)");
        return Ok(());
    }

    let (entries, blobs) = store.prune_older_than(days).await?;

    if entries == 0 && blobs == 0 {
        println!("Nothing to prune (no entries unused for {} days).", days);
        return Ok(());
    }

    println!(
        "{} pruned {} layer entr{} and {} blob{}",
        style("✓").green(),
        entries,
        if entries == 1 { "y" } else { "ies" },
        blobs,
        if blobs == 1 { "" } else { "s" }
    );

    Ok(())
}
