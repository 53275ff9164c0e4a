//! # ChitChat Server
//!
//! Real-time channel message gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chitchat
//!
//! # Run with a specific config file
//! chitchat --config /path/to/chitchat.toml
//!
//! # Run with environment overrides
//! CHITCHAT_PORT=8080 CHITCHAT_HOST=0.0.0.0 chitchat
//! CHITCHAT_HEARTBEAT__TIMEOUT_MS=60000 chitchat
//! ```
//!
//! Clients connect to `/channel` through a proxy that authenticates them and
//! sets the `x-chitchat-user-*` and `x-chitchat-channel` headers.

mod config;
mod error;
mod handlers;
mod identity;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "chitchat")]
#[command(about = "Real-time channel message gateway", long_about = None)]
struct Cli {
    /// Config file layered over the default locations; environment overrides still apply
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chitchat=debug,chitchat_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    tracing::info!("Starting ChitChat server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_config_forms() {
        for args in [
            vec!["chitchat", "--config", "/etc/x.toml"],
            vec!["chitchat", "--config=/etc/x.toml"],
            vec!["chitchat", "-c", "/etc/x.toml"],
        ] {
            let cli = Cli::try_parse_from(args).unwrap();
            assert_eq!(cli.config, Some(PathBuf::from("/etc/x.toml")));
        }

        assert!(Cli::try_parse_from(["chitchat"]).unwrap().config.is_none());
        assert!(Cli::try_parse_from(["chitchat", "--config"]).is_err());
        assert!(Cli::try_parse_from(["chitchat", "--bogus"]).is_err());
    }
}
