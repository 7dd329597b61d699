pub mod api;
pub mod clock;
pub mod config;
pub mod content;
pub mod error;
pub mod models;
pub mod notify;
pub mod service;
pub mod session;
pub mod store;
pub mod vault;

use api::{AppState, create_api_router};
use axum::{Router, routing::get};
use clock::SystemClock;
use config::Config;
use notify::TracingNotifier;
use service::AssetService;
use session::UploadSessionManager;
use std::io::IsTerminal;
use std::sync::Arc;
use store::AssetStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_rapidoc::RapiDoc;
use vault::FsVault;

/// Extra multipart budget on top of the payload limit, so an oversized file
/// is reported as too large instead of as a truncated body.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Initialize the tracing subscriber for logging
/// Uses journald when running as a service (no terminal), fmt when running interactively
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "asset_vault=info,tower_http=warn".into());

    if std::io::stdout().is_terminal() {
        // Running in a terminal, use formatted output
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        // Running as a service, use journald
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_journald::layer().expect("Failed to connect to journald"))
            .init();
    }
}

/// Run the asset vault service
pub async fn run_service(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    init_tracing();

    // Log version early
    tracing::info!("asset-vault version {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(config_path).unwrap_or_else(|_| {
        tracing::warn!("Failed to load config, using defaults");
        Config::default()
    });

    tracing::info!("Starting server with config: {:?}", config);

    // The index database lives inside the vault root by default
    tokio::fs::create_dir_all(&config.vault.root).await?;

    let clock = Arc::new(SystemClock);
    let store = AssetStore::connect(&config.database_url(), clock.clone()).await?;
    let vault = Arc::new(FsVault::new(config.vault.root.clone()));

    // Session manager and its inactivity reaper
    let sessions = Arc::new(UploadSessionManager::new(
        clock.clone(),
        config.session_timeout(),
    ));
    let reaper = session::spawn_reaper(Arc::clone(&sessions));

    let service = AssetService::new(
        store,
        vault,
        sessions,
        Arc::new(TracingNotifier),
        clock,
        config.server.max_upload_size.as_u64(),
    );

    // Create shared state
    let state = Arc::new(AppState {
        service,
        config: config.clone(),
    });

    // Prometheus recorder for the metrics endpoint
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install metrics recorder: {}", e))?;

    let app = build_router(state)
        .route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, stopping session reaper");
    reaper.shutdown().await;

    Ok(())
}

/// Build the application router: API routes under `/api`, public asset
/// serving under `/assets`, documentation under `/api-docs`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_upload_size.as_u64() as usize
        + MULTIPART_OVERHEAD_BYTES;

    // Build API routes using the utoipa_axum router
    let (api_router, api_doc) = create_api_router(state.clone()).split_for_parts();

    // Public asset URLs, embedded by documents
    let asset_routes = Router::new()
        .route("/assets/{alias}/{filename}", get(api::serve_asset))
        .with_state(state.clone());

    // Build documentation routes
    let doc_routes =
        Router::new().merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST, axum::http::Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .nest("/api", api_router)
        .merge(asset_routes)
        .merge(doc_routes)
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(cors)
}

/// Wait for a shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
