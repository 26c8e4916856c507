//! Huddle Node - real-time message relay for group chat.
//!
//! This is the main entry point for running a relay node.

use clap::Parser;
use huddle_node::config::NodeConfig;
use huddle_node::observability::init_logging;
use std::net::IpAddr;
use std::path::PathBuf;

/// Huddle Node - real-time chat message relay
#[derive(Parser, Debug)]
#[command(name = "huddle-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_logging(&config.log_level, config.log_format());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Huddle relay");
    tracing::info!(
        listen_addr = %config.listen_addr(),
        queue_capacity = config.relay.queue_capacity,
        max_connections = config.relay.max_connections,
        persistence = config.persistence.endpoint.is_some(),
        "Node configuration"
    );

    huddle_node::run(config).await
}
