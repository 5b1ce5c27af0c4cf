//! Outbound queue maintenance commands.

use super::leaf::Leaf;
use super::{print_json, CliResult};
use std::time::Duration;
use syncq_core::{ItemId, QueueStatus};

/// Prints per-status counts.
pub fn stats(leaf: &Leaf, format: &str) -> CliResult {
    let stats = leaf.engine.queue().stats();
    if format == "json" {
        return print_json(&stats);
    }
    println!("Pending:     {}", stats.pending);
    println!("Processing:  {}", stats.processing);
    println!("Synced:      {}", stats.synced);
    println!("Failed:      {}", stats.failed);
    println!("Conflict:    {}", stats.conflict);
    println!("Total:       {}", stats.total);
    println!("Files:       {} pending", stats.pending_files);
    if let Some(at) = stats.last_synced {
        println!("Last synced: {at}");
    }
    Ok(())
}

/// Lists items, newest first.
pub fn list(leaf: &Leaf, status: Option<&str>, limit: usize, format: &str) -> CliResult {
    let status = status.map(str::parse::<QueueStatus>).transpose()?;
    let items = leaf.engine.queue().list(status, limit);
    if format == "json" {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("No items");
        return Ok(());
    }
    println!(
        "{:>8}  {:<10}  {:>3}  {:>8}  {:<40}  ERROR",
        "ID", "STATUS", "PRI", "ATTEMPTS", "EVENT"
    );
    for item in items {
        println!(
            "{:>8}  {:<10}  {:>3}  {:>8}  {:<40}  {}",
            item.id.as_u64(),
            item.status.as_str(),
            item.priority,
            item.attempts,
            item.event_name,
            item.last_error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Requeues a Failed or Conflict item.
pub fn retry(leaf: &Leaf, id: u64) -> CliResult {
    leaf.engine.queue().retry(ItemId(id))?;
    println!("Item {id} requeued");
    Ok(())
}

/// Deletes an item.
pub fn delete(leaf: &Leaf, id: u64) -> CliResult {
    let item = leaf.engine.queue().delete(ItemId(id))?;
    println!("Item {id} deleted ({})", item.status);
    Ok(())
}

/// Removes old Synced items, local log entries and abandoned updates, then
/// compacts the queue.
pub fn cleanup(leaf: &Leaf, log_retention_days: u64) -> CliResult {
    let retention = Duration::from_secs(log_retention_days * 24 * 60 * 60);
    let removed = leaf.engine.cleanup(retention)?;
    leaf.engine.queue().compact()?;
    println!(
        "Removed {} synced item(s), {} log entr(ies) and {} abandoned update(s)",
        removed.items, removed.log_entries, removed.abandoned
    );
    Ok(())
}
