use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use staticd::config::{Overrides, Settings};
use staticd::server::Server;

/// Serve a directory over HTTP/1.x
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.address)
    #[arg(long)]
    address: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(long)]
    port: Option<i64>,

    /// Directory to serve (overrides server.root)
    #[arg(long)]
    root: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let overrides = Overrides {
        address: args.address,
        port: args.port,
        root: args.root,
    };
    let config = Settings::load(args.config.as_deref())?
        .with_overrides(&overrides)
        .validate()?;
    info!(
        address = %config.socket_addr(),
        root = %config.root.display(),
        index = ?config.index_names,
        "configuration loaded"
    );

    let dispatcher = config.dispatcher()?;
    let server = Server::bind(&config, dispatcher).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await;
    Ok(())
}
