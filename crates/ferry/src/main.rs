use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use ferry_core::FileResumeStore;
use ferry_http::Ferry;

mod config;
use crate::config::Config;

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let mut dev_config = File::open(cli.config_file.unwrap_or("./dev-config.yml".into()))?;
    let mut s = String::new();
    dev_config.read_to_string(&mut s)?;
    let config: Config = serde_yaml::from_str(&s)?;

    // initialize remote storage and resume state
    let client = config.backend.new_client().await?;
    let store = Arc::new(FileResumeStore::new(config.resume.into()));

    let shutdown = CancellationToken::new();
    let ferry = Ferry::new(client, store, config.upload, config.spool_dir)?
        .with_shutdown(shutdown.clone());

    tracing::info!(listen = %config.listen, "serving uploads");

    // run HTTP server
    axum::Server::bind(&config.listen)
        .serve(ferry.router().into_make_service())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {e}");
            }
            tracing::info!("shutting down, interrupting uploads in flight");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
