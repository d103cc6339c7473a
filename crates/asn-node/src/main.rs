//! ASN node binary.
//!
//! ```bash
//! # Serve with a config file
//! asn-node --config siren.yaml --bind 0.0.0.0:4433
//! ```

use std::sync::Arc;

use asn_node::{Config, Node};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Apptimist Secure Network node
#[derive(Parser, Debug)]
#[command(name = "asn-node")]
#[command(about = "ASN messaging substrate node")]
#[command(version)]
struct Args {
    /// Path to the YAML config (or inline YAML)
    #[arg(short, long)]
    config: String,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Repository directory (default: config `dir`, else `<name>.asn`)
    #[arg(short, long)]
    dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let cfg = Config::new(&args.config)?;
    let dir = args
        .dir
        .or_else(|| cfg.dir.clone())
        .unwrap_or_else(|| format!("{}.asn", cfg.name));

    tracing::info!(name = %cfg.name, repos = %dir, "node starting");

    let node = Arc::new(Node::new(cfg, dir.as_ref())?);
    let listener = TcpListener::bind(&args.bind).await?;

    node.serve(listener).await?;

    Ok(())
}
