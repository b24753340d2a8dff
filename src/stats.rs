//! State inspection commands.
//!
//! Backs `docsync stats`, `docsync items`, `docsync log` and
//! `docsync reset-failed`. Everything prints to stdout in the same plain
//! tabular style so the output can be grepped.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::index::SqliteIndex;
use crate::models::{ItemRecord, ItemStatus};
use crate::state::StateStore;

/// Print aggregate statistics for the state store and index.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = StateStore::open(&config.db.path).await?;
    let stats = store.statistics().await?;
    let index = SqliteIndex::open(&config.index.path).await?;
    let documents = index.document_count().await?;
    let units = index.unit_count(None).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsync state");
    println!("=============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", stats.counts_by_status.total());
    for status in ItemStatus::ALL {
        println!(
            "    {:<11} {}",
            status.as_str(),
            stats.counts_by_status.get(status)
        );
    }
    println!();
    println!("  Units:       {}", stats.total_units);
    match stats.average_duration_secs {
        Some(avg) => println!("  Avg time:    {:.2}s", avg),
        None => println!("  Avg time:    -"),
    }
    println!(
        "  Last success: {}",
        stats
            .last_success_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Index:       {} document(s), {} unit(s)", documents, units);
    println!();

    index.close().await;
    store.close().await;
    Ok(())
}

/// List tracked items, optionally restricted to one status.
pub async fn run_items(config: &Config, status: Option<ItemStatus>) -> Result<()> {
    let store = StateStore::open(&config.db.path).await?;
    let items = store.list(status).await?;

    if items.is_empty() {
        println!("No items.");
    } else {
        println!(
            "  {:<16}  {:<10} {:>6}  {:<16}  {}",
            "IDENTITY", "STATUS", "UNITS", "PROCESSED", "SOURCE"
        );
        println!("  {}", "-".repeat(94));
        for item in &items {
            print_item_row(item);
        }
        println!();
        println!("{} item(s)", items.len());
    }

    store.close().await;
    Ok(())
}

fn print_item_row(item: &ItemRecord) {
    let units = item
        .metrics
        .map(|m| m.unit_count.to_string())
        .unwrap_or_else(|| "-".to_string());
    let processed = item
        .processed_at
        .map(format_ts_iso)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<16}  {:<10} {:>6}  {:<16}  {}",
        item.identity,
        item.status.as_str(),
        units,
        processed,
        item.source_locator
    );
    if let Some(error) = &item.error_message {
        println!("  {:<16}  error: {}", "", error);
    }
}

/// Print the most recent log entries for one item, oldest first.
pub async fn run_log(config: &Config, identity: &str, limit: i64) -> Result<()> {
    let store = StateStore::open(&config.db.path).await?;

    match store.get(identity).await? {
        None => println!("No item with identity '{}'.", identity),
        Some(record) => {
            println!("{}  [{}]", record.source_locator, record.status.as_str());
            for entry in store.logs_for(identity, limit).await? {
                println!(
                    "  {}  {:<8} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.event_type,
                    entry.message
                );
            }
        }
    }

    store.close().await;
    Ok(())
}

/// Move every failed item back to pending.
pub async fn run_reset_failed(config: &Config) -> Result<u64> {
    let store = StateStore::open(&config.db.path).await?;
    let count = store.reset_failed().await?;
    println!("{} failed item(s) reset to pending", count);
    store.close().await;
    Ok(count)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time for recent timestamps ("3 hours ago"), ISO-ish beyond a month.
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        plural(delta / 60, "min")
    } else if delta < 86400 {
        plural(delta / 3600, "hour")
    } else if delta < 86400 * 30 {
        plural(delta / 86400, "day")
    } else {
        format_ts_iso(ts)
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
