//! browserkube - Main entry point.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use browserkube::{
    config::Config,
    gateway::{ClusterGateway, KubeClusterGateway, ObjectStoreGateway, S3ObjectStore},
    orchestrator::{ApiState, BrowserJobManager, OrchestratorApi, Reaper, reaper},
};

#[derive(Parser, Debug)]
#[command(name = "browserkube")]
#[command(about = "Ephemeral browser jobs on Kubernetes")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Reclaim expired jobs, artifacts and pods
    Reap {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Seconds between passes (overrides REAPER_INTERVAL_SECS)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("browserkube=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env()?;

    let cluster: Arc<dyn ClusterGateway> =
        Arc::new(KubeClusterGateway::connect(&config.cluster).await?);

    let store = match config.storage {
        Some(ref storage) => Some(Arc::new(S3ObjectStore::connect(storage).await)),
        None => None,
    };

    match args.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            let mut job_manager = BrowserJobManager::new(config.browser.clone(), cluster);
            if let (Some(store), Some(storage)) = (store, config.storage.clone()) {
                job_manager = job_manager.with_storage(store, storage);
            }

            let state = ApiState {
                job_manager: Arc::new(job_manager),
                allow_start_new: config.server.allow_start_new,
            };
            let port = port.unwrap_or(config.server.port);
            OrchestratorApi::start(state, &config.server.host, port)
                .await
                .map_err(|e| anyhow::anyhow!("API server failed: {}", e))?;
        }
        Command::Reap {
            once,
            interval_secs,
        } => {
            let store = store.map(|s| s as Arc<dyn ObjectStoreGateway>);
            let reaper = Reaper::new(cluster, store, config.reaper.retention);

            let interval = interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .or(config.reaper.interval);

            match interval {
                Some(interval) if !once => {
                    tracing::info!(interval_secs = interval.as_secs(), "Starting reaper loop");
                    reaper::run_periodic(&reaper, interval).await;
                }
                _ => {
                    let report = reaper.run_once().await?;
                    if report.aborted {
                        tracing::warn!("Reaper pass stopped early on a storage failure");
                    }
                }
            }
        }
    }

    Ok(())
}
