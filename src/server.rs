//! # Server
//!
//! Wires the calendar core into an axum router and runs it together with the
//! token refresh sweep and the idempotency key retention loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::calendar::CalendarService;
use crate::config::AppConfig;
use crate::connectors::Registry;
use crate::crypto::TokenVault;
use crate::handlers;
use crate::repositories::{ConnectionRepository, IdempotencyKeyRepository};
use crate::telemetry::{TraceContext, with_trace_context};
use crate::token_refresh::TokenRefreshService;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub calendar: Arc<CalendarService>,
}

/// Long-lived components built once at startup.
pub struct CoreServices {
    pub connections: Arc<ConnectionRepository>,
    pub idempotency: Arc<IdempotencyKeyRepository>,
    pub registry: Arc<Registry>,
    pub calendar: Arc<CalendarService>,
}

impl CoreServices {
    pub fn build(config: &AppConfig, db: Arc<DatabaseConnection>, registry: Registry) -> Self {
        let vault = Arc::new(TokenVault::from_config(config));
        let connections = Arc::new(ConnectionRepository::new(db.clone(), vault));
        let idempotency = Arc::new(IdempotencyKeyRepository::new(
            db,
            chrono::Duration::hours(config.sync.idempotency_ttl_hours),
        ));
        let registry = Arc::new(registry);
        let calendar = Arc::new(CalendarService::new(
            connections.clone(),
            idempotency.clone(),
            registry.clone(),
            &config.sync,
        ));
        Self {
            connections,
            idempotency,
            registry,
            calendar,
        }
    }
}

/// Builds the router with tracing, CORS, trace ids and Swagger UI at `/docs`.
pub fn create_app(state: AppState) -> Router {
    let calendar_routes = Router::new()
        .route("/connect", post(handlers::calendar::connect))
        .route(
            "/connections",
            get(handlers::calendar::list_connections).delete(handlers::calendar::disconnect),
        )
        .route("/sync", post(handlers::calendar::sync))
        .route("/events", get(handlers::calendar::events));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .nest("/calendar", calendar_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(trace_context_middleware)),
        )
}

/// Scopes each request under the caller's `X-Request-Id`, or a fresh one,
/// and echoes it back.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let context = TraceContext {
        trace_id: trace_id.clone(),
    };
    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Serves HTTP until ctrl-c, then stops the background loops.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address '{}'", config.api_bind_addr))?;
    let registry = Registry::from_config(&config).context("failed to build provider registry")?;
    let db = Arc::new(db);
    let services = CoreServices::build(&config, db.clone(), registry);
    let config = Arc::new(config);

    let shutdown = CancellationToken::new();
    let sweeper = TokenRefreshService::new(
        config.token_refresh.clone(),
        services.connections.clone(),
        services.registry.clone(),
    );
    let sweeper_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { sweeper.run(shutdown).await }
    });
    let retention_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let idempotency = services.idempotency.clone();
        let interval = Duration::from_secs(config.sync.idempotency_purge_interval_seconds);
        async move { idempotency.run_retention(interval, shutdown).await }
    });

    let app = create_app(AppState {
        config: config.clone(),
        db,
        calendar: services.calendar,
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, profile = %config.profile, "Calendar sync API listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    let _ = tokio::join!(sweeper_handle, retention_handle);
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::calendar::connect,
        crate::handlers::calendar::disconnect,
        crate::handlers::calendar::list_connections,
        crate::handlers::calendar::sync,
        crate::handlers::calendar::events,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::CalendarProvider,
            crate::handlers::HealthStatus,
            crate::calendar::ConnectRequest,
            crate::calendar::SyncRequest,
            crate::calendar::ConnectionView,
            crate::calendar::EventView,
            crate::calendar::EventStatus,
            crate::connectors::EventAttendee,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service metadata"),
        (name = "calendar", description = "Calendar connections and unified events")
    ),
    info(
        title = "Calendar Sync API",
        description = "Links external calendars and serves a unified, cached event view",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
