//! Seatkeeper
//!
//! Seat availability tracker: a rank-scoped reservation cache kept in step
//! with a durable record store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Seatkeeper                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Record Store │───▶│ Availability │───▶│  Projector   │       │
//! │  │ (authority)  │    │    Cache     │    │ (remaining)  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          │           ┌──────────────┐                           │
//! │          └──────────▶│   Metadata   │                           │
//! │                      │  Cache (TTL) │                           │
//! │                      └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use seatkeeper::adapters::{InMemoryRecordStore, LoggingEventPublisher};
use seatkeeper::availability::{AvailabilityCache, EventMetadataCache};
use seatkeeper::config::ServiceConfig;
use seatkeeper::domain::{EventPublisher, RecordStore};
use seatkeeper::service::AvailabilityService;
use seatkeeper::telemetry::Telemetry;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Seatkeeper - seat availability tracker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML service configuration (timeouts, TTL, venue layout)
    #[arg(long, env = "SEATKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// YAML seed file loaded into the record store
    #[arg(long, env = "SEATKEEPER_SEED")]
    seed: Option<PathBuf>,

    /// Record store query timeout in milliseconds (overrides the config file)
    #[arg(long, env = "STORE_TIMEOUT_MS")]
    store_timeout_ms: Option<u64>,

    /// Event metadata staleness window in seconds (overrides the config file)
    #[arg(long, env = "METADATA_TTL_SECONDS")]
    metadata_ttl_seconds: Option<u64>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn service_config(&self) -> seatkeeper::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };
        if let Some(ms) = self.store_timeout_ms {
            config.store_timeout_ms = ms;
        }
        if let Some(secs) = self.metadata_ttl_seconds {
            config.metadata_ttl_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Seatkeeper");

    let config = args.service_config().context("invalid configuration")?;
    info!("  Store timeout: {:?}", config.store_timeout());
    info!("  Bootstrap timeout: {:?}", config.bootstrap_timeout());
    info!("  Metadata TTL: {:?}", config.metadata_ttl());

    let catalog = Arc::new(config.catalog()?);
    info!(
        "  Venue: {} seats in {} ranks",
        catalog.total_capacity(),
        catalog.ranks().count()
    );

    let store = Arc::new(match &args.seed {
        Some(path) => InMemoryRecordStore::from_seed_file(Arc::clone(&catalog), path)
            .with_context(|| format!("failed to load seed {}", path.display()))?,
        None => {
            warn!("No seed file given, starting with an empty record store");
            InMemoryRecordStore::new(Arc::clone(&catalog))
        }
    }) as Arc<dyn RecordStore>;

    let publisher: Arc<dyn EventPublisher> = Arc::new(LoggingEventPublisher::new(true));

    let cache = Arc::new(AvailabilityCache::new(
        config.cache_config(),
        catalog,
        Arc::clone(&store),
        Arc::clone(&publisher),
    ));
    let metadata = Arc::new(EventMetadataCache::new(
        Arc::clone(&store),
        config.metadata_ttl(),
        config.store_timeout(),
    ));
    let service = Arc::new(AvailabilityService::new(
        cache,
        metadata,
        store,
        publisher,
    ));

    // No traffic without a populated cache
    let report = service
        .bootstrap()
        .await
        .context("bootstrap from the record store failed")?;
    info!(
        "Bootstrap complete: {} events, {} reservations in {:?}",
        report.events, report.reservations, report.duration
    );

    let telemetry = Arc::new(Telemetry::new()?);
    let shutdown = CancellationToken::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_service = Arc::clone(&service);
    let health_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_service, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_service = Arc::clone(&service);
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) =
            run_metrics_server(&metrics_addr, metrics_service, telemetry, metrics_shutdown).await
        {
            error!("Metrics server error: {}", e);
        }
    });

    // Drop expired metadata once per window
    let purge_service = Arc::clone(&service);
    let purge_shutdown = shutdown.clone();
    let purge_every = config.metadata_ttl();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            tokio::select! {
                _ = purge_shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let purged = purge_service.metadata().purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged expired event metadata");
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), service.shutdown())
        .await
        .unwrap_or_else(|_| warn!("Background rebuilds still running at shutdown"));

    info!("Seatkeeper shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=warn", level)));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Servers
// =============================================================================

mod http {
    use std::convert::Infallible;
    use std::future::Future;
    use std::net::SocketAddr;

    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    use seatkeeper::{Error, Result};

    pub type HttpResponse = Response<Full<Bytes>>;

    pub fn respond(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    pub fn with_content_type(mut response: HttpResponse, content_type: &'static str) -> HttpResponse {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }

    /// Accept connections until `shutdown` fires, serving each with `handler`.
    pub async fn serve<H, F>(
        name: &'static str,
        addr: &str,
        shutdown: CancellationToken,
        handler: H,
    ) -> Result<()>
    where
        H: Fn(Request<Incoming>) -> F + Clone + Send + 'static,
        F: Future<Output = std::result::Result<HttpResponse, Infallible>> + Send + 'static,
    {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {} server address: {}", name, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

        info!("{} server listening on {}", name, addr);

        loop {
            let (stream, _) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("{} server stopped", name);
                    return Ok(());
                }
                accepted = listener.accept() => accepted.map_err(|e| {
                    Error::Internal(format!("{} server accept error: {}", name, e))
                })?,
            };

            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new()
                    .serve_connection(io, service_fn(handler))
                    .await
                {
                    tracing::error!("{} server connection error: {}", name, e);
                }
            });
        }
    }
}

async fn run_health_server(
    addr: &str,
    service: Arc<AvailabilityService>,
    shutdown: CancellationToken,
) -> seatkeeper::Result<()> {
    use hyper::StatusCode;

    http::serve("Health", addr, shutdown, move |req| {
        let service = Arc::clone(&service);
        async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" => http::respond(StatusCode::OK, "ok"),
                "/readyz" => {
                    if service.is_ready() && service.health_check().await {
                        http::respond(StatusCode::OK, "ok")
                    } else {
                        http::respond(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                    }
                }
                _ => http::respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok(response)
        }
    })
    .await
}

async fn run_metrics_server(
    addr: &str,
    service: Arc<AvailabilityService>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
) -> seatkeeper::Result<()> {
    use hyper::StatusCode;

    http::serve("Metrics", addr, shutdown, move |req| {
        let service = Arc::clone(&service);
        let telemetry = Arc::clone(&telemetry);
        async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    telemetry.update(
                        &service.stats(),
                        &service.metadata_stats(),
                        service.is_ready(),
                    );
                    match telemetry.render() {
                        Ok(text) => http::with_content_type(
                            http::respond(StatusCode::OK, text),
                            prometheus::TEXT_FORMAT,
                        ),
                        Err(e) => {
                            error!("Failed to render metrics: {}", e);
                            http::respond(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                        }
                    }
                }
                _ => http::respond(StatusCode::NOT_FOUND, "not found"),
            };
            Ok(response)
        }
    })
    .await
}
