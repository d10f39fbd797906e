//! Text-prefix command surface.

use once_cell::sync::Lazy;
use regex::Regex;

/// Registration / management command
pub const LIVE_COMMAND: &str = "!live";
/// Manual kill switch
pub const CRASH_COMMAND: &str = "!crash";

const BROADCAST_PREFIX: &str = "!live broadcast ";
const LEAVE_COMMAND: &str = "!live leave";

static BROADCAST_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)!live broadcast "(.*)""#).expect("broadcast pattern"));

/// A recognised command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!live`: register the current channel
    Register,
    /// `!live leave`: unregister the issuing group
    Unregister,
    /// `!live broadcast "<text>"`; `None` when the quoted argument is missing
    Broadcast(Option<String>),
    /// `!crash`
    Crash,
    /// Any other prefixed message; never relayed
    Other,
}

/// Parse a message. Returns `None` for plain chat that should be relayed.
pub fn parse(content: &str, prefixes: &[String]) -> Option<Command> {
    if content == CRASH_COMMAND {
        return Some(Command::Crash);
    }

    if content.starts_with(BROADCAST_PREFIX) {
        let text = BROADCAST_ARG
            .captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        return Some(Command::Broadcast(text));
    }

    if content.trim_end() == LEAVE_COMMAND {
        return Some(Command::Unregister);
    }

    if content.starts_with(LIVE_COMMAND) {
        return Some(Command::Register);
    }

    if prefixes
        .iter()
        .any(|p| !p.is_empty() && content.starts_with(p.as_str()))
    {
        return Some(Command::Other);
    }

    None
}
