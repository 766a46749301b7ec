//! Axum upgrade endpoint and per-connection setup: resolve (or create) the
//! `Session` behind this socket, register the demo synced objects the first
//! time that Session is seen, then hand off to the Session's own receive
//! loop for the rest of the connection's life.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use sync_core::config::HANDSHAKE_TIMEOUT_MS;
use sync_protocol::{Envelope, UserSessionPayload, REQUEST_USER_SESSION_EVENT, USER_SESSION_EVENT};
use sync_session::{InboundFrame, Session, Transport};

use crate::app::AppState;
use crate::demo::{self, DemoObjects};
use crate::ws::transport::AxumTransport;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4();
    tracing::info!(%conn_id, "connection opened");

    let (transport, writer) = AxumTransport::spawn(socket);
    let transport: Arc<dyn Transport> = transport;

    match resolve_session(&state, &transport).await {
        Some((session, _demo)) => session.handle_connection(transport).await,
        None => {
            let _ = transport.close().await;
        }
    }
    writer.abort();

    tracing::info!(%conn_id, "connection closed");
}

/// Optionally perform the `_REQUEST_USER_SESSION`/`_USER_SESSION` handshake
/// (spec.md §4.1, `ws_sync/id.py`) to find a Session that survived a prior
/// reconnect. A client that doesn't answer in time, or skips the handshake
/// entirely, gets a fresh ephemeral Session instead — the handshake is an
/// opt-in convenience, not a precondition for talking to the gateway.
/// Resolves (or creates) the Session behind this connection. `None` means
/// demo-object registration failed and the caller should close the
/// connection cleanly rather than hand it a Session with no synced state.
async fn resolve_session(
    state: &Arc<AppState>,
    transport: &Arc<dyn Transport>,
) -> Option<(Arc<Session>, Arc<DemoObjects>)> {
    if let Some(key) = request_user_session(transport).await {
        if let Some(existing) = state.user_sessions.get(&key) {
            return Some((existing.session.clone(), existing.demo.clone()));
        }
        let session = Session::new();
        let demo = Arc::new(build_demo(&session).await?);
        state.user_sessions.insert(
            key,
            crate::app::UserSessionEntry {
                session: session.clone(),
                demo: demo.clone(),
            },
        );
        return Some((session, demo));
    }

    let session = Session::new();
    let demo = Arc::new(build_demo(&session).await?);
    Some((session, demo))
}

async fn build_demo(session: &Arc<Session>) -> Option<DemoObjects> {
    match demo::register_demo_objects(session).await {
        Ok(objects) => Some(objects),
        Err(err) => {
            tracing::error!(%err, "failed to register demo objects, closing connection");
            None
        }
    }
}

async fn request_user_session(transport: &Arc<dyn Transport>) -> Option<String> {
    let envelope = Envelope::new(REQUEST_USER_SESSION_EVENT, serde_json::Value::Null);
    let text = envelope.to_json().ok()?;
    transport.send_text(text).await.ok()?;

    let reply = tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        transport.recv(),
    )
    .await;

    let Ok(Ok(Some(InboundFrame::Text(text)))) = reply else {
        return None;
    };
    let envelope = Envelope::parse(&text).ok()?;
    if envelope.event != USER_SESSION_EVENT {
        return None;
    }
    let payload: UserSessionPayload = serde_json::from_value(envelope.data).ok()?;
    Some(format!("{}/{}", payload.user, payload.session))
}
