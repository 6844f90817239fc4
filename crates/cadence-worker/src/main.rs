//! Publishing worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cadence_generator::HttpGeneratorClient;
use cadence_store::{QuotaReset, Repository, RestRepository};
use cadence_worker::{
    EngineConfig, HttpPublisher, PublishAction, PublishConfig, SchedulingEngine, Worker,
    WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting cadence-worker");

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    let store = Arc::new(RestRepository::from_env().context("Failed to create store client")?);
    let repository: Arc<dyn Repository> = store.clone();
    let quota: Arc<dyn QuotaReset> = store;

    let engine = match HttpGeneratorClient::from_env() {
        Ok(generator) => {
            let engine_config = EngineConfig::from_env();
            info!("Engine config: {:?}", engine_config);
            Some(SchedulingEngine::new(
                engine_config,
                Arc::clone(&repository),
                Arc::new(generator),
            ))
        }
        Err(e) => {
            warn!("Generation service unavailable: {}", e);
            None
        }
    };

    let publish_config = PublishConfig::from_env().context("Failed to configure publisher")?;
    let publisher: Arc<dyn PublishAction> = Arc::new(
        HttpPublisher::new(publish_config, Arc::clone(&repository))
            .context("Failed to create publisher")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let mut worker = Worker::new(config, repository, quota, publisher, engine);
    worker.run(shutdown_rx).await?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("cadence=info".parse().expect("valid directive"))
        .add_directive("hyper=warn".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
