use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use sync_protocol::{BinMeta, Envelope, BIN_META_EVENT, DISCONNECT_EVENT};

use crate::handler::Handler;
use crate::transport::{InboundFrame, Transport};

const DEFAULT_FAREWELL: &str =
    "Seems like you're logged in somewhere else. If this is a mistake, please refresh the page.";

tokio::task_local! {
    static CURRENT_SESSION: Arc<Session>;
}

/// The Session currently bound to this task's context, if any. Populated for
/// the duration of [`Session::bind`] — this is how a `Sync` constructed deep
/// in a handler call stack finds "its" Session without it being threaded
/// through every function signature (spec.md §4.2, "context manager").
pub fn current_session() -> Option<Arc<Session>> {
    CURRENT_SESSION.try_with(Arc::clone).ok()
}

/// Opaque handle returned by [`Session::register_init`], needed to remove
/// that exact handler later without requiring `Handler` to be comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitHandlerId(u64);

/// Hooks a user-attached state object may implement around a Session's
/// connect/disconnect/terminate lifecycle (spec.md §3, §4.2). All three are
/// synchronous so `on_terminate` can run straight out of `Drop`, consistent
/// with `SyncInner::close_sync`'s own synchronous teardown.
pub trait SessionState: Send + Sync {
    fn on_connect(&self) {}
    fn on_disconnect(&self) {}
    fn on_terminate(&self) {}
}

/// One per client connection, persists across reconnects of the underlying
/// transport. Owns the event-handler table every `Sync` registers into, the
/// ordered init-handler list, and the connection state machine. Grounded in
/// `ws_sync/session.py::Session`.
pub struct Session {
    transport: AsyncMutex<Option<Arc<dyn Transport>>>,
    event_handlers: DashMap<String, Handler>,
    init_handlers: StdMutex<Vec<(u64, Handler)>>,
    next_init_id: AtomicU64,
    state: StdMutex<Option<Arc<dyn SessionState>>>,
}

impl Session {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transport: AsyncMutex::new(None),
            event_handlers: DashMap::new(),
            init_handlers: StdMutex::new(Vec::new()),
            next_init_id: AtomicU64::new(0),
            state: StdMutex::new(None),
        })
    }

    /// Attach a user-defined state object whose `on_connect`/`on_disconnect`/
    /// `on_terminate` hooks fire around this Session's connection lifecycle
    /// (spec.md §3, §4.2). Replaces any previously attached state.
    pub fn attach_state(&self, state: Arc<dyn SessionState>) {
        *self.state.lock().unwrap() = Some(state);
    }

    fn fire_on_connect(&self) {
        if let Some(state) = self.state.lock().unwrap().clone() {
            state.on_connect();
        }
    }

    fn fire_on_disconnect(&self) {
        if let Some(state) = self.state.lock().unwrap().clone() {
            state.on_disconnect();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Number of registered event handlers, exposed for cleanup-completeness
    /// tests (spec.md §8, "Cleanup completeness").
    pub fn handler_count(&self) -> usize {
        self.event_handlers.len()
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.event_handlers.contains_key(event)
    }

    /// Insert or replace the handler bound to `event`. A replace is allowed
    /// (a later `Sync` registered under the same key wins) but logged.
    pub fn register(&self, event: impl Into<String>, handler: Handler) {
        let event = event.into();
        if self.event_handlers.contains_key(&event) {
            tracing::warn!(%event, "replacing existing event handler");
        }
        self.event_handlers.insert(event, handler);
    }

    /// Remove the handler bound to `event`. Missing entries are a no-op,
    /// logged at warning.
    pub fn deregister(&self, event: &str) {
        if self.event_handlers.remove(event).is_none() {
            tracing::warn!(event, "deregister of unknown event");
        }
    }

    pub fn register_init(&self, handler: Handler) -> InitHandlerId {
        let id = self.next_init_id.fetch_add(1, Ordering::Relaxed);
        self.init_handlers.lock().unwrap().push((id, handler));
        InitHandlerId(id)
    }

    pub fn deregister_init(&self, id: InitHandlerId) {
        self.init_handlers.lock().unwrap().retain(|(i, _)| *i != id.0);
    }

    pub fn init_handler_count(&self) -> usize {
        self.init_handlers.lock().unwrap().len()
    }

    /// Accept a new transport. If one is already attached, it is evicted
    /// with a farewell first — `ws_sync/session.py::new_connection`.
    pub async fn new_connection(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let mut slot = self.transport.lock().await;
        if let Some(prev) = slot.take() {
            tracing::warn!("overwriting existing transport on new connection");
            Self::send_on(&prev, DISCONNECT_EVENT, DEFAULT_FAREWELL).await;
            let _ = prev.close().await;
        }
        *slot = Some(transport);
        drop(slot);
        self.run_init_handlers().await;
    }

    async fn run_init_handlers(&self) {
        let handlers: Vec<Handler> = self
            .init_handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler.call(Value::Null).await;
        }
    }

    /// Close the attached transport (if any) after sending a farewell.
    pub async fn disconnect(&self, message: impl Into<String>) {
        let message = message.into();
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.take() {
            Self::send_on(&transport, DISCONNECT_EVENT, message).await;
            let _ = transport.close().await;
        }
    }

    async fn send_on(transport: &Arc<dyn Transport>, event: &str, data: impl Serialize) {
        let envelope = Envelope::new(event, data);
        match envelope.to_json() {
            Ok(text) => {
                if let Err(err) = transport.send_text(text).await {
                    tracing::warn!(event, %err, "send failed");
                }
            }
            Err(err) => tracing::warn!(event, %err, "failed to serialize outbound payload"),
        }
    }

    /// Transmit `{type: event, data}`. A broken client must not abort server
    /// state, so failures are logged and swallowed (spec.md §4.2).
    pub async fn send(&self, event: impl Into<String>, data: impl Serialize) {
        let event = event.into();
        let slot = self.transport.lock().await;
        match slot.as_ref() {
            Some(transport) => Self::send_on(transport, &event, data).await,
            None => tracing::debug!(%event, "send skipped: no transport attached"),
        }
    }

    /// Transmit `_BIN_META` describing `event`/`metadata`, then the raw
    /// binary frame.
    pub async fn send_binary(&self, event: impl Into<String>, metadata: Value, bytes: Vec<u8>) {
        let event = event.into();
        let slot = self.transport.lock().await;
        let Some(transport) = slot.as_ref() else {
            tracing::debug!(%event, "send_binary skipped: no transport attached");
            return;
        };
        let meta = Envelope::new(
            BIN_META_EVENT,
            BinMeta {
                content_type: event.clone(),
                metadata,
            },
        );
        let Ok(text) = meta.to_json() else {
            tracing::warn!(%event, "failed to serialize bin meta");
            return;
        };
        if let Err(err) = transport.send_text(text).await {
            tracing::warn!(%event, %err, "bin meta send failed");
            return;
        }
        if let Err(err) = transport.send_binary(bytes).await {
            tracing::warn!(%event, %err, "binary frame send failed");
        }
    }

    /// Bind `self` as the current-session context for the duration of `fut`.
    /// Stacks correctly across nested calls — `tokio::task_local::scope`
    /// restores the outer value (or absence of one) when `fut` completes.
    pub async fn bind<F, T>(self: &Arc<Self>, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        CURRENT_SESSION.scope(self.clone(), fut).await
    }

    /// Accept `transport`, bind the session context, and run the receive
    /// loop until disconnect. Equivalent to `handle_connection` in
    /// `ws_sync/session.py`, generalized over any [`Transport`]. If a state
    /// object is attached, its `on_connect`/`on_disconnect` hooks bracket the
    /// receive loop (spec.md §4.2).
    pub async fn handle_connection(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        self.new_connection(transport.clone()).await;
        let this = self.clone();
        self.bind(async move {
            this.fire_on_connect();
            this.receive_loop(transport).await;
            this.fire_on_disconnect();
        })
        .await;
    }

    async fn receive_loop(&self, transport: Arc<dyn Transport>) {
        loop {
            let frame = match transport.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("transport closed cleanly");
                    break;
                }
                Err(err) => {
                    tracing::warn!(%err, "transport receive error");
                    break;
                }
            };

            match frame {
                InboundFrame::Text(text) => self.handle_text_frame(&text, &transport).await,
                InboundFrame::Binary(_) => {
                    tracing::warn!("unexpected unsolicited binary frame, dropping");
                }
            }
        }

        let mut slot = self.transport.lock().await;
        *slot = None;
    }

    async fn handle_text_frame(&self, text: &str, transport: &Arc<dyn Transport>) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "malformed frame, dropping");
                return;
            }
        };

        if envelope.event == BIN_META_EVENT {
            let meta: BinMeta = match serde_json::from_value(envelope.data) {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!(%err, "malformed _BIN_META payload");
                    return;
                }
            };
            let bytes = match transport.recv().await {
                Ok(Some(InboundFrame::Binary(bytes))) => bytes,
                _ => {
                    tracing::warn!("expected a binary frame after _BIN_META, none arrived");
                    return;
                }
            };
            let merged = merge_binary_metadata(meta.metadata, bytes);
            self.dispatch(&meta.content_type, merged).await;
        } else {
            self.dispatch(&envelope.event, envelope.data).await;
        }
    }

    async fn dispatch(&self, event: &str, data: Value) {
        let handler = self.event_handlers.get(event).map(|h| h.clone());
        match handler {
            Some(handler) => handler.call(data).await,
            None => tracing::warn!(event, "no subscriber for event"),
        }
    }
}

impl Drop for Session {
    /// Fires the attached state's `on_terminate` hook, if any (spec.md §3).
    /// Synchronous like the rest of the hook trait, so it can run here.
    fn drop(&mut self) {
        if let Some(state) = self.state.get_mut().unwrap().take() {
            state.on_terminate();
        }
    }
}

/// `{...metadata, data: <bytes>}`, the merge the receiver performs when a
/// `_BIN_META` preamble is followed by a binary frame (spec.md §6). Bytes are
/// represented as a JSON array so the merged value stays a plain `Value` —
/// handlers that expect binary payloads know to read this shape back out.
fn merge_binary_metadata(metadata: Value, bytes: Vec<u8>) -> Value {
    let mut map = match metadata {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    map.insert(
        "data".to_string(),
        Value::Array(bytes.into_iter().map(|b| Value::from(b)).collect()),
    );
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    struct MockTransport {
        outbox: TokioMutex<Vec<String>>,
        binary_outbox: TokioMutex<Vec<Vec<u8>>>,
        inbox: TokioMutex<Vec<InboundFrame>>,
        closed: std::sync::atomic::AtomicBool,
    }

    impl MockTransport {
        fn new(mut inbound: Vec<InboundFrame>) -> Arc<Self> {
            inbound.reverse();
            Arc::new(Self {
                outbox: TokioMutex::new(Vec::new()),
                binary_outbox: TokioMutex::new(Vec::new()),
                inbox: TokioMutex::new(inbound),
                closed: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, text: String) -> crate::error::Result<()> {
            self.outbox.lock().await.push(text);
            Ok(())
        }

        async fn send_binary(&self, bytes: Vec<u8>) -> crate::error::Result<()> {
            self.binary_outbox.lock().await.push(bytes);
            Ok(())
        }

        async fn recv(&self) -> crate::error::Result<Option<InboundFrame>> {
            Ok(self.inbox.lock().await.pop())
        }

        async fn close(&self) -> crate::error::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_then_deregister_clears_handler() {
        let session = Session::new();
        session.register("_GET:K", Handler::new_async(|_| async {}));
        assert!(session.has_handler("_GET:K"));
        session.deregister("_GET:K");
        assert!(!session.has_handler("_GET:K"));
    }

    #[tokio::test]
    async fn dispatch_runs_handler_in_order() {
        let session = Session::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(StdMutex::new(Vec::new()));

        let o1 = order.clone();
        session.register(
            "_ACTION:A",
            Handler::new_async(move |_| {
                let o1 = o1.clone();
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    o1.lock().unwrap().push(1);
                }
            }),
        );
        let o2 = order.clone();
        session.register(
            "_ACTION:B",
            Handler::new_async(move |_| {
                let o2 = o2.clone();
                async move {
                    o2.lock().unwrap().push(2);
                }
            }),
        );

        let transport = MockTransport::new(vec![
            InboundFrame::Text(r#"{"type":"_ACTION:A","data":null}"#.to_string()),
            InboundFrame::Text(r#"{"type":"_ACTION:B","data":null}"#.to_string()),
        ]);
        session.handle_connection(transport).await;

        let _ = calls.load(Ordering::SeqCst);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn new_connection_evicts_prior_transport_with_disconnect() {
        let session = Session::new();
        let first = MockTransport::new(vec![]);
        session.new_connection(first.clone()).await;

        let second = MockTransport::new(vec![]);
        session.new_connection(second.clone()).await;

        let outbox = first.outbox.lock().await;
        assert!(outbox
            .iter()
            .any(|msg| msg.contains(DISCONNECT_EVENT)));
        assert!(first.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn current_session_is_bound_during_receive_loop() {
        let session = Session::new();
        let seen = Arc::new(StdMutex::new(false));
        let seen2 = seen.clone();
        session.register(
            "_GET:K",
            Handler::new_async(move |_| {
                let seen2 = seen2.clone();
                async move {
                    *seen2.lock().unwrap() = current_session().is_some();
                }
            }),
        );
        let transport = MockTransport::new(vec![InboundFrame::Text(
            r#"{"type":"_GET:K","data":null}"#.to_string(),
        )]);
        session.handle_connection(transport).await;
        assert!(*seen.lock().unwrap());
        assert!(current_session().is_none());
    }

    #[tokio::test]
    async fn attached_state_hooks_fire_on_connect_disconnect_and_terminate() {
        struct RecordingState {
            events: StdMutex<Vec<&'static str>>,
        }

        impl SessionState for RecordingState {
            fn on_connect(&self) {
                self.events.lock().unwrap().push("connect");
            }
            fn on_disconnect(&self) {
                self.events.lock().unwrap().push("disconnect");
            }
            fn on_terminate(&self) {
                self.events.lock().unwrap().push("terminate");
            }
        }

        let state = Arc::new(RecordingState {
            events: StdMutex::new(Vec::new()),
        });

        let session = Session::new();
        session.attach_state(state.clone());

        let transport = MockTransport::new(vec![]);
        session.handle_connection(transport).await;

        assert_eq!(*state.events.lock().unwrap(), vec!["connect", "disconnect"]);

        drop(session);
        assert_eq!(
            *state.events.lock().unwrap(),
            vec!["connect", "disconnect", "terminate"]
        );
    }

    #[tokio::test]
    async fn bin_meta_merges_metadata_and_bytes() {
        let session = Session::new();
        let received = Arc::new(StdMutex::new(None));
        let received2 = received.clone();
        session.register(
            "AVATAR",
            Handler::new_async(move |data| {
                let received2 = received2.clone();
                async move {
                    *received2.lock().unwrap() = Some(data);
                }
            }),
        );
        let transport = MockTransport::new(vec![
            InboundFrame::Text(
                r#"{"type":"_BIN_META","data":{"type":"AVATAR","metadata":{"key":"AVATAR"}}}"#
                    .to_string(),
            ),
            InboundFrame::Binary(vec![1, 2, 3]),
        ]);
        session.handle_connection(transport).await;

        let data = received.lock().unwrap().clone().unwrap();
        assert_eq!(data["key"], "AVATAR");
        assert_eq!(data["data"], serde_json::json!([1, 2, 3]));
    }
}
