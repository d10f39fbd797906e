//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "meshrelay",
    version,
    about = "Relay chat between registered channels of independent Discord servers"
)]
pub struct Args {
    #[arg(long, value_name = "PATH", help = "Config file (default: ~/.meshrelay/config.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Override the registration table path")]
    pub registrations: Option<PathBuf>,

    #[arg(long, env = "MESHRELAY_TOKEN", hide_env_values = true, help = "Override the bot token")]
    pub token: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut crate::config::Config) {
        if let Some(path) = &self.registrations {
            config.relay.registrations_file = path.to_string_lossy().to_string();
        }
        if let Some(token) = &self.token {
            config.discord.bot_token = Some(token.clone());
        }
    }
}
