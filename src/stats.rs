//! Database statistics.
//!
//! Per-channel message counts and watermarks plus part and address totals,
//! printed by `relay stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use relay_core::models::Channel;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Per-channel breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub channel: Channel,
    pub messages: i64,
    pub watermark: Option<i64>,
    /// Newest message timestamp, epoch milliseconds.
    pub latest: Option<i64>,
}

/// One entry per channel, in ingestion order, including empty channels.
pub async fn channel_stats(pool: &SqlitePool) -> Result<Vec<ChannelStats>> {
    let rows = sqlx::query(
        r#"
        SELECT channel,
               COUNT(*) AS message_count,
               MAX(source_position) AS watermark,
               MAX(timestamp) AS latest
        FROM messages
        GROUP BY channel
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut stats: Vec<ChannelStats> = Channel::ALL
        .iter()
        .map(|&channel| ChannelStats {
            channel,
            messages: 0,
            watermark: None,
            latest: None,
        })
        .collect();

    for row in &rows {
        let name: String = row.get("channel");
        let channel: Channel = name.parse()?;
        if let Some(entry) = stats.iter_mut().find(|s| s.channel == channel) {
            entry.messages = row.get("message_count");
            entry.watermark = row.get("watermark");
            entry.latest = row.get("latest");
        }
    }
    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let pool = store.pool();

    let total_parts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mms_parts")
        .fetch_one(pool)
        .await?;
    let attachments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM mms_parts WHERE is_attachment = 1")
            .fetch_one(pool)
            .await?;
    let total_addresses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mms_addresses")
        .fetch_one(pool)
        .await?;
    let stats = channel_stats(pool).await?;
    let total_messages: i64 = stats.iter().map(|s| s.messages).sum();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Relay Database Stats");
    println!("====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Blobs:       {}", store.blob_dir().display());
    println!();
    println!("  Messages:    {}", total_messages);
    println!("  Parts:       {} ({} attachments)", total_parts, attachments);
    println!("  Addresses:   {}", total_addresses);
    println!();
    println!("  By channel:");
    println!(
        "  {:<8} {:>9} {:>11}   {}",
        "CHANNEL", "MESSAGES", "WATERMARK", "LATEST"
    );
    println!("  {}", "-".repeat(52));
    for s in &stats {
        let watermark = s
            .watermark
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        let latest = match s.latest {
            Some(ms) => format_ts_relative(ms / 1000),
            None => "never".to_string(),
        };
        println!(
            "  {:<8} {:>9} {:>11}   {}",
            s.channel.as_str(),
            s.messages,
            watermark,
            latest
        );
    }
    println!();

    store.close().await;
    Ok(())
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

/// Format a Unix timestamp (seconds) as a relative time string.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

/// Format a Unix timestamp (seconds) as `YYYY-MM-DD HH:MM` UTC.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
