//! Content rewriting applied before a message is relayed.
//!
//! Everything here is pure: no I/O, no platform calls. The orchestrator supplies the
//! mention resolver and the referenced message text.

use super::message::RelayMessage;
use super::platform::AttachmentRef;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Zero-width space, used to defuse mass mentions
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Sent instead of empty content, which the destination API rejects
pub const BLANK_CONTENT: &str = "\u{200B}";

static MASS_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@(here|everyone)\b").expect("mass mention pattern"));

static USER_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("user mention pattern"));

/// Insert a zero-width space after `@` in `@here`/`@everyone` so they display but never notify.
///
/// Already-escaped text no longer matches, so the rewrite is idempotent.
pub fn escape_mass_mentions(text: &str) -> String {
    MASS_MENTION
        .replace_all(text, |caps: &Captures| {
            format!("@{}{}", ZERO_WIDTH_SPACE, &caps[1])
        })
        .into_owned()
}

/// Replace `<@ID>` / `<@!ID>` with a literal, non-pinging `` `@name` ``.
///
/// Tokens the resolver does not know are left verbatim.
pub fn resolve_user_mentions<F>(text: &str, resolver: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    USER_MENTION
        .replace_all(text, |caps: &Captures| match resolver(&caps[1]) {
            Some(name) => format!("`@{}`", escape_mass_mentions(&name)),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Text to quote when replying to `referenced`.
///
/// A message that is itself a relayed reply starts with a `>` quote line; drop that line
/// so quotes never nest. A lone quote line yields an empty quote.
pub fn extract_quote(referenced: &str) -> String {
    if !referenced.starts_with('>') {
        return referenced.to_string();
    }

    match referenced.find('\n') {
        Some(idx) => referenced[idx + 1..].trim().to_string(),
        None => String::new(),
    }
}

/// Escape mentions, prepend the quote, and substitute blank content if nothing is left.
pub fn build_relay_message<F>(
    raw_text: &str,
    quote: Option<&str>,
    author_name: &str,
    author_avatar_url: Option<&str>,
    attachments: Vec<AttachmentRef>,
    resolver: F,
) -> RelayMessage
where
    F: Fn(&str) -> Option<String>,
{
    let rewritten = resolve_user_mentions(&escape_mass_mentions(raw_text), resolver);

    let content = match quote.filter(|q| !q.is_empty()) {
        Some(q) => format!("> {}\n{}", escape_mass_mentions(q), rewritten),
        None => rewritten,
    };

    let content = if content.is_empty() {
        BLANK_CONTENT.to_string()
    } else {
        content
    };

    RelayMessage {
        content,
        author_name: author_name.to_string(),
        author_avatar_url: author_avatar_url.map(str::to_string),
        attachments,
    }
}
