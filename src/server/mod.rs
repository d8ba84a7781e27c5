//! HTTP surface: application context, router construction, and the serve
//! loop with graceful shutdown.

use crate::broadcast::ViewerRegistry;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::encoder::{self, EncoderProfile};
use crate::error::Result;
use crate::filtergraph::{self, CompileRequest, EncodeOptions};
use crate::layout::LayoutConfig;
use crate::supervisor::Supervisor;
use crate::watchdog::{self, Activity};
use anyhow::Context;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod openapi;
pub mod routes_channels;
pub mod routes_control;
pub mod routes_layout;
pub mod routes_stream;

/// Shared application context.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    pub supervisor: Arc<Supervisor>,
    pub viewers: Arc<ViewerRegistry>,
    pub activity: Arc<Activity>,
    /// Encoder profile selected once at startup.
    pub profile: &'static EncoderProfile,
    pub http: reqwest::Client,
}

impl AppContext {
    /// Resolve a layout's channels against the catalog and compile the
    /// encoder command. Pure with respect to runtime state; any failure
    /// leaves a running child untouched.
    pub fn compile_layout(&self, layout: &LayoutConfig) -> Result<Vec<String>> {
        let request = CompileRequest::from_layout(layout, |id| {
            self.catalog.resolve(id).ok().map(|c| c.stream_url)
        })?;
        let opts = EncodeOptions {
            ffmpeg: &self.config.encoder.ffmpeg,
            user_agent: &self.config.stream.user_agent,
            source_headers: self.config.stream.source_headers.as_deref(),
        };
        filtergraph::compile(&request, self.profile, &opts)
    }
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/channels", get(routes_channels::list_channels))
        .route("/channels/refresh", post(routes_channels::refresh_channels))
        .route("/proxy-image", get(routes_channels::proxy_image))
        .route("/layout/set", post(routes_layout::set_layout))
        .route("/layout/current", get(routes_layout::current_layout))
        .route("/layout/swap-audio", post(routes_layout::swap_audio))
        .route("/audio/volume", post(routes_layout::set_volume))
        .route("/audio/volumes", get(routes_layout::get_volumes));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/api", api)
        .merge(openapi::openapi_routes())
        .route("/control/status", get(routes_control::status))
        .route("/control/stop", get(routes_control::stop))
        .route("/stream", get(routes_stream::stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health() -> impl IntoResponse {
    "ok"
}

async fn index() -> impl IntoResponse {
    concat!(
        "Multiview is running.\n\n",
        "Channels:          GET  /api/channels\n",
        "Apply a layout:    POST /api/layout/set\n",
        "Watch:             GET  /stream (MPEG-TS)\n",
        "Status:            GET  /control/status\n",
        "Stop to idle:      GET  /control/stop\n",
        "API docs:          GET  /api/docs\n",
    )
}

/// Assemble all components and run the HTTP server until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let http = reqwest::Client::builder()
        .user_agent(config.stream.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")?;

    let catalog = Arc::new(Catalog::new(&config.catalog, http.clone()));
    if config.catalog.source.is_some() {
        if let Err(e) = catalog.load().await {
            tracing::warn!(error = %e, "Initial catalog load failed, starting empty");
        }
    } else {
        tracing::warn!("M3U_SOURCE not configured, catalog starts empty");
    }

    for tool in encoder::check_tools(&config.encoder.ffmpeg) {
        if tool.available {
            tracing::info!(tool = tool.name, version = ?tool.version, "Tool available");
        } else {
            tracing::warn!(tool = tool.name, "Tool not found, encoding will fail");
        }
    }

    let profile =
        encoder::select_profile(&config.encoder.ffmpeg, &config.encoder.preference).await;

    let viewers = Arc::new(ViewerRegistry::new());
    let (supervisor, exit_rx) = Supervisor::new(Arc::clone(&viewers));
    supervisor.spawn_monitor(exit_rx);

    let activity = Arc::new(Activity::new());
    watchdog::start(
        Arc::clone(&supervisor),
        Arc::clone(&viewers),
        Arc::clone(&activity),
        Duration::from_secs(config.stream.idle_timeout_secs),
        config.stream.max_stream_size,
    );

    let ctx = AppContext {
        config: Arc::clone(&config),
        catalog,
        supervisor: Arc::clone(&supervisor),
        viewers,
        activity,
        profile,
        http,
    };

    let app = build_router(ctx);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.stop().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
