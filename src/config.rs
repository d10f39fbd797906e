//! Configuration for the relay and its Discord connection.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operator IDs allowed to broadcast and to use the kill switch
const DEFAULT_ADMIN_IDS: [&str; 2] = ["852572302590607361", "1147308835808235581"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Discord connection settings
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Discord-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    /// Bot token (or env var reference like ${BOT_TOKEN})
    #[serde(default = "default_bot_token")]
    pub bot_token: Option<String>,
}

fn default_bot_token() -> Option<String> {
    Some("${BOT_TOKEN}".to_string())
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: default_bot_token(),
        }
    }
}

impl DiscordConfig {
    /// Resolve bot token from environment if needed
    pub fn resolve_bot_token(&self) -> Option<String> {
        self.bot_token.as_ref().and_then(|token| {
            if token.starts_with("${") && token.ends_with('}') {
                let env_var = &token[2..token.len() - 1];
                std::env::var(env_var).ok()
            } else {
                Some(token.clone())
            }
        })
    }
}

/// Relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Path to the registration table (supports ~ expansion)
    #[serde(default = "default_registrations_file")]
    pub registrations_file: String,

    /// Users allowed to broadcast and to use `!crash`
    #[serde(default = "default_admin_ids")]
    pub admin_user_ids: Vec<String>,

    /// Messages starting with any of these are never relayed
    #[serde(default = "default_command_prefixes")]
    pub command_prefixes: Vec<String>,

    /// Send identities kept per destination channel
    #[serde(default = "default_max_identities")]
    pub max_identities_per_channel: usize,

    /// Broadcast card title
    #[serde(default = "default_broadcast_title")]
    pub broadcast_title: String,

    /// Broadcast card color (0xRRGGBB)
    #[serde(default = "default_broadcast_color")]
    pub broadcast_color: u32,
}

fn default_registrations_file() -> String {
    "channels.csv".to_string()
}

fn default_admin_ids() -> Vec<String> {
    DEFAULT_ADMIN_IDS.iter().map(|s| s.to_string()).collect()
}

fn default_command_prefixes() -> Vec<String> {
    vec!["!".to_string(), "?".to_string()]
}

fn default_max_identities() -> usize {
    crate::relay::identity::MAX_IDENTITIES_PER_CHANNEL
}

fn default_broadcast_title() -> String {
    "📢 Broadcast 📢".to_string()
}

fn default_broadcast_color() -> u32 {
    0xFEEA3B
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            registrations_file: default_registrations_file(),
            admin_user_ids: default_admin_ids(),
            command_prefixes: default_command_prefixes(),
            max_identities_per_channel: default_max_identities(),
            broadcast_title: default_broadcast_title(),
            broadcast_color: default_broadcast_color(),
        }
    }
}

impl RelayConfig {
    /// Expand ~ in registrations_file path
    pub fn resolve_registrations_file(&self) -> PathBuf {
        expand_home(&self.registrations_file)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == user_id)
    }
}

impl Config {
    /// Default config location: ~/.meshrelay/config.toml
    pub fn default_path() -> PathBuf {
        expand_home("~/.meshrelay/config.toml")
    }

    /// Load from the default location, falling back to defaults if it does not exist
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
