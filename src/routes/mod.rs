// HTTP + WebSocket routes over the aggregator

mod http;
mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::aggregator::Aggregator;
use crate::config::AppConfig;
use crate::mock_backend;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) aggregator: Arc<Aggregator>,
    pub(crate) scheduler: Arc<Mutex<Scheduler>>,
}

pub fn app(
    aggregator: Arc<Aggregator>,
    scheduler: Arc<Mutex<Scheduler>>,
    config: &AppConfig,
) -> Router {
    let state = AppState {
        aggregator,
        scheduler,
    };
    let router = Router::new()
        .route("/", get(|| async { "T1D pulse: aggregator is running" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/snapshot", get(http::snapshot_handler)) // GET /api/snapshot
        .route("/api/slots/{name}", get(http::slot_handler)) // GET /api/slots/{name}
        .route("/api/refresh", post(http::refresh_all_handler)) // POST /api/refresh
        .route("/api/refresh/{name}", post(http::refresh_one_handler)) // POST /api/refresh/{name}
        .route(
            "/api/auto-update",
            get(http::auto_update_status_handler).post(http::auto_update_handler),
        ) // GET|POST /api/auto-update
        .route("/ws/snapshot", get(ws::ws_snapshot)) // WS /ws/snapshot
        .with_state(state);

    let router = if config.mock_backend.enabled {
        router.merge(mock_backend::router())
    } else {
        router
    };
    router.layer(CorsLayer::new().allow_origin(Any))
}
