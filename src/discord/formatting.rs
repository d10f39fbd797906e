//! Discord content limits, webhook naming rules and broadcast card rendering.

use crate::relay::message::BroadcastPayload;
use serenity::builder::CreateEmbed;

/// Message content limit
pub const MAX_CONTENT_LEN: usize = 2000;
/// Embed description limit
pub const MAX_EMBED_DESCRIPTION_LEN: usize = 4096;
/// Webhook name limit
pub const MAX_WEBHOOK_NAME_LEN: usize = 80;

/// Substrings Discord refuses in webhook names
const RESERVED_NAME_PARTS: [&str; 2] = ["discord", "clyde"];

/// Render a broadcast as an embed
pub fn create_broadcast_embed(card: &BroadcastPayload) -> CreateEmbed {
    CreateEmbed::new()
        .title(&card.title)
        .description(truncate(&card.body, MAX_EMBED_DESCRIPTION_LEN))
        .color(card.color)
}

/// Truncate to at most `max_chars` characters, marking the cut with an ellipsis
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Make a display name acceptable as a webhook name.
///
/// Reserved substrings get a zero-width space after their first letter, the result is
/// capped at 80 characters, and an empty name becomes `?`. Applying it twice is a no-op,
/// so names read back from Discord compare equal to freshly normalized ones.
pub fn webhook_name(name: &str) -> String {
    let mut out = name.trim().to_string();
    for reserved in RESERVED_NAME_PARTS {
        out = defuse_reserved(&out, reserved);
    }

    let out: String = out.chars().take(MAX_WEBHOOK_NAME_LEN).collect();
    let out = out.trim_end();
    if out.is_empty() {
        "?".to_string()
    } else {
        out.to_string()
    }
}

fn defuse_reserved(text: &str, word: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lowered = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len() + 3);
    let mut last = 0;

    for (idx, _) in lowered.match_indices(word) {
        out.push_str(&text[last..idx + 1]);
        out.push('\u{200B}');
        last = idx + 1;
    }
    out.push_str(&text[last..]);
    out
}

/// Append links for attachments that could not be re-uploaded
pub fn with_attachment_links(content: &str, urls: &[String]) -> String {
    if urls.is_empty() {
        return content.to_string();
    }

    let mut out = content.to_string();
    for url in urls {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(url);
    }
    out
}

/// CDN URL of a webhook avatar
pub fn webhook_avatar_url(webhook_id: u64, hash: &str) -> String {
    format!("https://cdn.discordapp.com/avatars/{}/{}.png", webhook_id, hash)
}
