//! `relay list`: print stored messages, newest first.

use anyhow::Result;

use relay_core::models::MessageWithParts;
use relay_core::store::MessageStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::stats::format_ts_iso;

const PREVIEW_CHARS: usize = 48;

fn preview(body: Option<&str>) -> String {
    let body = body.unwrap_or_default().replace(['\n', '\r'], " ");
    if body.chars().count() > PREVIEW_CHARS {
        let cut: String = body.chars().take(PREVIEW_CHARS - 1).collect();
        format!("{}…", cut)
    } else {
        body
    }
}

/// One display line per message.
pub fn format_line(item: &MessageWithParts) -> String {
    let msg = &item.message;
    let mut line = format!(
        "{}  {:<4} {:<20} {}",
        format_ts_iso(msg.timestamp / 1000),
        msg.channel.as_str(),
        msg.address,
        preview(msg.body.as_deref())
    );
    if !item.parts.is_empty() || !item.addresses.is_empty() {
        let attachments = item.parts.iter().filter(|p| p.is_attachment).count();
        line.push_str(&format!(
            "  [parts: {}, attachments: {}, addresses: {}]",
            item.parts.len(),
            attachments,
            item.addresses.len()
        ));
    }
    line
}

pub async fn run_list(config: &Config, limit: usize) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let items = store.messages_with_parts().await?;

    if items.is_empty() {
        println!("No messages.");
    }
    for item in items.iter().take(limit) {
        println!("{}", format_line(item));
    }
    if items.len() > limit {
        println!("... {} more", items.len() - limit);
    }

    store.close().await;
    Ok(())
}
