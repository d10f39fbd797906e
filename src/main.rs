//! meshrelay: relay chat between registered channels of independent Discord servers.
//!
//! Usage:
//!   meshrelay [--config ~/.meshrelay/config.toml] [--registrations channels.csv] [--token TOKEN]
//!
//! Environment variables:
//!   BOT_TOKEN - Bot token referenced by the default config
//!   MESHRELAY_TOKEN - Overrides the configured bot token
//!   RUST_LOG - Log filter (default: info)

use anyhow::Result;
use clap::Parser;
use meshrelay::config::Config;
use meshrelay::Args;
use std::io;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_logging();

    let mut config = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };
    args.apply(&mut config);

    info!(
        registrations = %config.relay.resolve_registrations_file().display(),
        admins = config.relay.admin_user_ids.len(),
        "meshrelay starting"
    );

    meshrelay::discord::run(config).await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
