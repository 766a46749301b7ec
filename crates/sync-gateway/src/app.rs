use axum::{routing::get, Router};
use dashmap::DashMap;
use std::sync::Arc;
use sync_core::config::SyncConfig;
use sync_session::Session;

use crate::demo::DemoObjects;

/// A Session together with the demo Syncs registered on it. Both must be
/// kept alive for a reconnect to find the same object state — dropping
/// `demo` would deregister its handlers (spec.md §4.10) even if `session`
/// itself is still reachable.
pub struct UserSessionEntry {
    pub session: Arc<Session>,
    pub demo: Arc<DemoObjects>,
}

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: SyncConfig,
    /// Sessions kept alive across transport reconnects, keyed by the
    /// `user/session` pair the client reports over the optional
    /// `_REQUEST_USER_SESSION`/`_USER_SESSION` handshake (spec.md §4.1,
    /// `ws_sync/id.py`). A connection that skips the handshake gets a
    /// fresh, unregistered Session instead.
    pub user_sessions: DashMap<String, UserSessionEntry>,
}

impl AppState {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            user_sessions: DashMap::new(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::ui::ui_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
