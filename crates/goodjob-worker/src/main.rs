mod handlers;

use std::sync::Arc;

use goodjob::{Config, GoodJob};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        worker_id = %config.worker_id,
        process_id = %config.process_id,
        max_processes = config.max_processes,
        "goodjob-worker starting"
    );

    let registry = Arc::new(handlers::build_registry());
    let goodjob = GoodJob::connect(config, registry).await?;

    let shutdown = goodjob.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining in-flight jobs");
        shutdown.cancel();
    });

    goodjob.run().await;
    info!("goodjob-worker stopped");

    Ok(())
}
