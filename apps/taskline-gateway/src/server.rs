use axum::http::{header, Method};
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::SharedVerifier;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::handlers;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomManager;
use crate::store::SharedStore;
use crate::websocket;

/// Everything a request handler needs. Cheap to clone; the registry, rooms,
/// and dispatcher all share their maps internally.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub verifier: SharedVerifier,
    pub store: SharedStore,
    pub registry: ConnectionRegistry,
    pub rooms: RoomManager,
    pub dispatcher: Dispatcher,
    /// Absent in tests, where installing a second global recorder would fail.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        verifier: SharedVerifier,
        store: SharedStore,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let rooms = RoomManager::new();
        let dispatcher = Dispatcher::new(registry.clone(), rooms.clone());
        Self {
            config,
            verifier,
            store,
            registry,
            rooms,
            dispatcher,
            metrics,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // An explicit origin list; never a wildcard, since REST calls carry
    // credentials.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.config.allowed_origins.clone()))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/api/notifications", get(handlers::list_notifications))
        .route(
            "/api/notifications/unread-count",
            get(handlers::unread_count),
        )
        .route(
            "/api/notifications/read-all",
            put(handlers::mark_all_read),
        )
        .route(
            "/api/notifications/:id",
            put(handlers::mark_read).delete(handlers::delete_notification),
        )
        .route(
            "/internal/notifications",
            post(handlers::create_notification),
        )
        .route(
            "/internal/tasks/:id/updated",
            post(handlers::broadcast_task_update),
        )
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/debug/stats", get(handlers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
