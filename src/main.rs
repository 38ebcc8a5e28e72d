use anyhow::{Context, Result};
use campusguard::alerts::{
    AlertDispatcher, AlertLedger, AlertRouter, AlertTransport, AmqpAlertTransport, LogTransport, StaticDirectory,
};
use campusguard::analyzer::{FrameSampler, HttpDetector, MediaAnalyzer};
use campusguard::api::{AppState, RestApi};
use campusguard::config::{self, Config};
use campusguard::db::DatabaseService;
use campusguard::hotspots::HotspotEngine;
use campusguard::incidents::{IncidentManager, IncidentStore, MemoryIncidentStore};
use campusguard::messaging::{self, DomainEvents, EventPublisher, LogPublisher};
use campusguard::redactor::{HttpMasker, PrivacyRedactor};
use campusguard::security::TokenVerifier;
use campusguard::storage::FsEvidenceStore;
use campusguard::{Pipeline, PipelineParts};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG: &str = "config/campusguard.toml";

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CAMPUSGUARD_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
        .into()
}

#[cfg(feature = "gst")]
fn frame_sampler(config: &Config) -> Result<Arc<dyn FrameSampler>> {
    let sampler = campusguard::analyzer::GstFrameSampler::new(config.storage.root.join("scratch"))?;
    info!("GStreamer video sampling enabled");
    Ok(Arc::new(sampler))
}

#[cfg(not(feature = "gst"))]
fn frame_sampler(_config: &Config) -> Result<Arc<dyn FrameSampler>> {
    warn!("Built without the gst feature; video evidence will fail analysis");
    Ok(Arc::new(campusguard::analyzer::NoVideoSampler))
}

async fn incident_store(config: &Config) -> Result<Arc<dyn IncidentStore>> {
    if !config.database.enabled {
        warn!("Database disabled; incidents are kept in memory only");
        return Ok(Arc::new(MemoryIncidentStore::new()));
    }
    let db = DatabaseService::new(&config.database)
        .await
        .context("Failed to initialize database")?;
    Ok(Arc::new(db.incident_store()))
}

async fn run_app() -> Result<()> {
    let config = config::load_config(&config_path())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.api.log_level)).init();
    info!("Starting campusguard {}", env!("CARGO_PKG_VERSION"));

    // Broker-backed events and alert hand-off, or the log when no broker is configured
    let (publisher, transport): (Arc<dyn EventPublisher>, Arc<dyn AlertTransport>) =
        if config.message_broker.enabled {
            let broker = messaging::create_message_broker(config.message_broker.clone())
                .await
                .context("Failed to initialize message broker")?;
            info!("Message broker initialized");
            let publisher: Arc<dyn EventPublisher> = broker.clone();
            let transport: Arc<dyn AlertTransport> = Arc::new(AmqpAlertTransport::new(broker));
            (publisher, transport)
        } else {
            warn!("Message broker disabled; events and alerts go to the log");
            let publisher: Arc<dyn EventPublisher> = Arc::new(LogPublisher);
            let transport: Arc<dyn AlertTransport> = Arc::new(LogTransport);
            (publisher, transport)
        };
    let events = DomainEvents::new(publisher);

    let inference_url = config
        .inference
        .url
        .as_deref()
        .context("inference.url must point at the detection service")?;
    let inference_timeout = Duration::from_secs(config.inference.timeout_secs);

    let evidence = Arc::new(
        FsEvidenceStore::new(&config.storage.root)
            .await
            .context("Failed to open evidence store")?,
    );
    let store = incident_store(&config).await?;

    let analyzer = MediaAnalyzer::new(
        Arc::new(HttpDetector::new(inference_url, inference_timeout)?),
        frame_sampler(&config)?,
    );
    let redactor = PrivacyRedactor::new(
        Arc::new(HttpMasker::new(inference_url, inference_timeout)?),
        evidence.clone(),
    );
    let ledger = Arc::new(AlertLedger::new());
    let directory = Arc::new(StaticDirectory::from_config(&config.directory));

    let parts = PipelineParts {
        incidents: Arc::new(IncidentManager::new(store.clone())),
        store: evidence,
        analyzer: Arc::new(analyzer),
        redactor: Arc::new(redactor),
        hotspots: Arc::new(HotspotEngine::new(config.hotspots.clone(), store).with_events(events.clone())),
        router: Arc::new(AlertRouter::new(config.alerting.clone(), directory)),
        dispatcher: Arc::new(
            AlertDispatcher::new(config.alerting.clone(), transport, ledger).with_events(events.clone()),
        ),
        events: events.clone(),
    };
    let pipeline = Arc::new(Pipeline::new(
        config.pipeline.clone(),
        config.storage.clone(),
        &config.analyzer,
        parts,
    ));

    let rebuilt = pipeline.hotspots().rebuild().await?;
    info!("Hotspot index rebuilt ({} clusters)", rebuilt);
    let scheduled = pipeline.sweep_deferred().await?;
    info!("Resumed {} unsettled analysis job(s)", scheduled);
    let background = pipeline.start_background();

    events.system_startup().await;

    let shutdown = CancellationToken::new();
    let api = RestApi::new(
        &config.api,
        AppState {
            intelligence: Arc::new(pipeline.intelligence()),
            verifier: Arc::new(TokenVerifier::new(config.security.clone())),
        },
    );
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move { api.run(server_shutdown).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => error!("API server error: {:#}", e),
        Err(e) => error!("API server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    pipeline.shutdown().await;
    for result in futures::future::join_all(background).await {
        if let Err(e) = result {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    events.system_shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run_app().await {
        eprintln!("campusguard failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}
