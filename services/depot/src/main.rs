//! `depot-server`: the HTTP API plus the blob sweep janitor.

use camino::Utf8PathBuf;
use clap::Parser;
use depot::{Depot, DepotConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Container registry control plane")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DEPOT_CONFIG")]
    config: Utf8PathBuf,

    /// Override the listen address from the configuration file
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let document = tokio::fs::read_to_string(&args.config).await?;
    let mut config = DepotConfig::from_toml(&document)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let depot = Depot::from_config(&config).await?;
    depot.db().health_check().await?;
    let janitor = tokio::spawn(depot::janitor::run(depot.clone(), depot.cancellation()));

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!("depot listening on http://{}", config.listen);

    let shutdown = depot.clone();
    axum::serve(listener, depot::router(depot))
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
            shutdown.shutdown();
        })
        .await?;

    janitor.await?;
    Ok(())
}
