//! guardcam daemon
//!
//! Loads rosters, starts the correlation pipeline and feeds it recorder
//! snapshots until Ctrl-C.

use guardcam::{
    bootstrap,
    config::AppConfig,
    detection_adapter::RemoteDetector,
    directory_client::BackendClient,
    frame_poller::FramePoller,
    object_storage::HttpObjectStorage,
    recorder_client::ShinobiClient,
    Pipeline, PipelineDeps,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardcam=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting guardcam v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    config.validate()?;

    let directory = Arc::new(BackendClient::new(
        config.backend_api_url.clone(),
        config.organization_slug.clone(),
        config.backend_api_key.clone(),
    )?);
    let shinobi = Arc::new(ShinobiClient::new(
        config.shinobi_url.clone(),
        config.shinobi_api_key.clone(),
        config.shinobi_group_key.clone(),
    )?);
    let storage = Arc::new(HttpObjectStorage::new(config.faces_bucket_url.clone())?);
    let detector = Arc::new(RemoteDetector::new(config.detector_url.clone())?);

    tracing::info!(
        organization = %config.organization_slug,
        backend = %config.backend_api_url,
        recorder = %config.shinobi_url,
        detector = %config.detector_url,
        "Collaborators configured"
    );

    let rosters = bootstrap::load(directory.as_ref(), storage.as_ref(), detector.as_ref()).await?;

    let deps = PipelineDeps {
        detector,
        directory,
        recorder: shinobi.clone(),
        storage,
    };
    let pipeline = Pipeline::start(deps, rosters.dataset, config.pipeline.clone());
    pipeline.register_monitors(&rosters.monitors).await;

    let polling = Arc::new(AtomicBool::new(true));
    let poller = FramePoller::new(shinobi, pipeline.frame_sink(), rosters.monitors)
        .spawn(config.snapshot_interval, polling.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    polling.store(false, Ordering::SeqCst);
    if let Err(e) = poller.await {
        tracing::error!(error = %e, "Frame poller panicked");
    }
    pipeline.shutdown().await;

    Ok(())
}
