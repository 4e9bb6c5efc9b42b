use std::env;
use std::fs;
use std::path::Path;

use d_cluster::metrics;
use d_cluster::Error;
use d_cluster::NodeBuilder;
use d_cluster::NodeId;
use d_cluster::Result;
use d_cluster::Settings;
use d_cluster::SystemError;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    // optional config file on top of CONFIG_PATH and the environment
    let config_path = env::args().nth(1);
    let mut settings = Settings::new()?;
    if let Some(p) = &config_path {
        settings = settings.with_override_config(p)?;
    }

    // Initializing Logs
    let _guard = init_observability(&settings.cluster.node_id, &settings.cluster.log_dir)?;
    metrics::init_metrics();

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let node = NodeBuilder::from_settings(settings, graceful_rx).start().await?;

    info!(node_id = %node.id(), endpoint = %node.endpoint(), "Application started. Waiting for CTRL+C signal...");
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = node.run().await {
        error!("node stops: {:?}", e);
    }

    println!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::System(SystemError::SignalSendFailed(format!("Failed to send shutdown signal: {e}")))
    })?;

    info!("Shutdown signal sent");
    Ok(())
}

fn init_observability(
    node_id: &NodeId,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let dir = log_dir.join(node_id.as_str());
    fs::create_dir_all(&dir)?;
    let log_file = tracing_appender::rolling::never(dir, "d.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
