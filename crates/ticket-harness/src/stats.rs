//! Store statistics.
//!
//! Summarises what has been ingested: ticket and fragment counts,
//! embedding coverage overall and per fragment kind, and when the store
//! was last written. Used by `tkt stats`.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteFragmentStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteFragmentStore::new(pool);

    let counts = store.counts().await?;
    let kinds = store.kind_counts().await?;
    let last_write = store.last_updated().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Ticket Harness: Store Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Last write:  {}",
        last_write
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Tickets:     {}", counts.documents);
    println!("  Fragments:   {}", counts.fragments);
    println!(
        "  Embedded:    {} / {} ({}%)",
        counts.embedded,
        counts.fragments,
        percent(counts.embedded, counts.fragments)
    );

    if !kinds.is_empty() {
        println!();
        println!("  By kind:");
        println!("  {:<20} {:>10} {:>10}", "KIND", "FRAGMENTS", "EMBEDDED");
        println!("  {}", "-".repeat(42));
        for k in &kinds {
            println!("  {:<20} {:>10} {:>10}", k.kind, k.fragments, k.embedded);
        }
    }
    println!();

    store.pool().close().await;
    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}

/// "just now", "5 mins ago", ... falling back to a date after 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3_600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86_400 => format!("{} hour{} ago", d / 3_600, plural(d / 3_600)),
        d if d < 86_400 * 30 => format!("{} day{} ago", d / 86_400, plural(d / 86_400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn coverage_handles_empty_store() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
    }

    #[test]
    fn recent_timestamps_are_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 2 * 3_600), "2 hours ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
