use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use sync_core::ToastSeverity;
use sync_protocol::{
    action_event, get_event, patch_event, set_event, task_cancel_event, task_start_event, Toast,
    TOAST_EVENT,
};
use sync_scope::{apply_prefix, spawn_scoped};
use sync_session::{current_session, Handler, InitHandlerId, Session};

use crate::error::{Result, SyncEngineError};
use crate::handlers::{ActionHandler, BlockingActionHandler, Target, TaskCancelHandler, TaskFactory};
use crate::model::{SchemaExport, SyncModel};

/// Builds a [`Sync`], the Rust counterpart of `Sync.all`/`Sync.only` in
/// `ws_sync/sync.py`. Field selection itself is delegated to the target's
/// [`SyncModel`] impl (its `snapshot`/`set_field` already encode which
/// attributes are published and under what wire name) — there is no
/// separate include/exclude/casing step here, since that reflection has no
/// static Rust equivalent (spec.md design note 9).
pub struct SyncBuilder<T: SyncModel> {
    target: T,
    key: String,
    send_on_init: bool,
    task_exposure: Option<String>,
    actions: IndexMap<String, ActionHandler<T>>,
    blocking_actions: IndexMap<String, BlockingActionHandler<T>>,
    task_factories: IndexMap<String, TaskFactory<T>>,
    task_cancels: IndexMap<String, TaskCancelHandler<T>>,
}

impl<T: SyncModel> SyncBuilder<T> {
    pub fn new(target: T, key: impl Into<String>) -> Self {
        Self {
            target,
            key: key.into(),
            send_on_init: true,
            task_exposure: None,
            actions: IndexMap::new(),
            blocking_actions: IndexMap::new(),
            task_factories: IndexMap::new(),
            task_cancels: IndexMap::new(),
        }
    }

    pub fn send_on_init(mut self, value: bool) -> Self {
        self.send_on_init = value;
        self
    }

    /// Publish the set of currently-running task names under `wire_name`.
    pub fn expose_running_tasks(mut self, wire_name: impl Into<String>) -> Self {
        self.task_exposure = Some(wire_name.into());
        self
    }

    pub fn action(mut self, entry: (String, ActionHandler<T>)) -> Self {
        self.actions.insert(entry.0, entry.1);
        self
    }

    /// Register an action whose handler runs on Tokio's blocking pool
    /// instead of inline (spec.md §5). See [`crate::handlers::blocking_action`].
    pub fn blocking_action(mut self, entry: (String, BlockingActionHandler<T>)) -> Self {
        self.blocking_actions.insert(entry.0, entry.1);
        self
    }

    pub fn task(mut self, entry: (String, TaskFactory<T>)) -> Self {
        self.task_factories.insert(entry.0, entry.1);
        self
    }

    pub fn task_cancel(mut self, entry: (String, TaskCancelHandler<T>)) -> Self {
        self.task_cancels.insert(entry.0, entry.1);
        self
    }

    /// Construction steps from spec.md §4.4: resolve the prefixed key, bind
    /// the task-local Session, register the six event handlers (plus the
    /// init handler if requested), and snapshot the initial state.
    pub async fn build(self) -> Result<Sync<T>> {
        let session = current_session().ok_or(SyncEngineError::NoSession)?;
        let key = apply_prefix(&self.key);
        let target: Target<T> = Arc::new(AsyncMutex::new(self.target));

        let mut snapshot = {
            let guard = target.lock().await;
            Value::Object(guard.snapshot())
        };
        if let (Some(wire_name), Value::Object(map)) = (&self.task_exposure, &mut snapshot) {
            map.insert(wire_name.clone(), Value::Array(Vec::new()));
        }

        let inner = Arc::new(SyncInner {
            key,
            target,
            session,
            snapshot: AsyncMutex::new(snapshot),
            last_sync: AsyncMutex::new(None),
            send_on_init: self.send_on_init,
            init_handler_id: StdMutex::new(None),
            task_exposure: self.task_exposure,
            running_tasks: DashMap::new(),
            actions: self.actions,
            blocking_actions: self.blocking_actions,
            task_factories: self.task_factories,
            task_cancels: self.task_cancels,
            closed: AtomicBool::new(false),
        });

        register_handlers(&inner);

        if inner.send_on_init {
            send_state(&inner).await;
        }

        Ok(Sync { inner })
    }
}

struct RunningTask {
    cancel_token: CancellationToken,
}

struct SyncInner<T: SyncModel> {
    key: String,
    target: Target<T>,
    session: Arc<Session>,
    snapshot: AsyncMutex<Value>,
    last_sync: AsyncMutex<Option<Instant>>,
    send_on_init: bool,
    init_handler_id: StdMutex<Option<InitHandlerId>>,
    task_exposure: Option<String>,
    running_tasks: DashMap<String, RunningTask>,
    actions: IndexMap<String, ActionHandler<T>>,
    blocking_actions: IndexMap<String, BlockingActionHandler<T>>,
    task_factories: IndexMap<String, TaskFactory<T>>,
    task_cancels: IndexMap<String, TaskCancelHandler<T>>,
    closed: AtomicBool,
}

impl<T: SyncModel> SyncInner<T> {
    /// Idempotent cleanup (spec.md §4.10): deregisters all handlers this
    /// Sync owns and cancels any tasks it started. Safe to call from `Drop`
    /// since every step here is synchronous.
    fn close_sync(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.deregister(&get_event(&self.key));
        self.session.deregister(&set_event(&self.key));
        self.session.deregister(&patch_event(&self.key));
        if !self.actions.is_empty() || !self.blocking_actions.is_empty() {
            self.session.deregister(&action_event(&self.key));
        }
        if !self.task_factories.is_empty() {
            self.session.deregister(&task_start_event(&self.key));
            self.session.deregister(&task_cancel_event(&self.key));
        }
        if let Some(id) = self.init_handler_id.lock().unwrap().take() {
            self.session.deregister_init(id);
        }
        for entry in self.running_tasks.iter() {
            entry.value().cancel_token.cancel();
        }
    }
}

impl<T: SyncModel> Drop for SyncInner<T> {
    fn drop(&mut self) {
        self.close_sync();
    }
}

fn register_handlers<T: SyncModel>(inner: &Arc<SyncInner<T>>) {
    let session = inner.session.clone();

    let weak = Arc::downgrade(inner);
    session.register(
        get_event(&inner.key),
        Handler::new_async(move |_| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    send_state(&inner).await;
                }
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    session.register(
        set_event(&inner.key),
        Handler::new_async(move |data| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    set_state(&inner, data).await;
                }
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    session.register(
        patch_event(&inner.key),
        Handler::new_async(move |data| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    patch_state(&inner, data).await;
                }
            }
        }),
    );

    if inner.send_on_init {
        let weak = Arc::downgrade(inner);
        let id = session.register_init(Handler::new_async(move |_| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    send_state(&inner).await;
                }
            }
        }));
        *inner.init_handler_id.lock().unwrap() = Some(id);
    }

    if !inner.actions.is_empty() {
        // At least one async action: the event handler must itself be
        // async so it can await those handlers; any blocking actions
        // registered alongside them are still offloaded, from inside
        // `dispatch_action`, via `spawn_blocking`.
        let weak = Arc::downgrade(inner);
        session.register(
            action_event(&inner.key),
            Handler::new_async(move |data| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        dispatch_action(&inner, data).await;
                    }
                }
            }),
        );
    } else if !inner.blocking_actions.is_empty() {
        // Blocking actions only: the event handler itself runs on the
        // blocking pool (spec.md §5), with no async dispatcher in the way.
        let weak = Arc::downgrade(inner);
        session.register(
            action_event(&inner.key),
            Handler::new_blocking(move |data| {
                if let Some(inner) = weak.upgrade() {
                    dispatch_blocking_action(&inner, data);
                }
            }),
        );
    }

    if !inner.task_factories.is_empty() {
        let weak = Arc::downgrade(inner);
        session.register(
            task_start_event(&inner.key),
            Handler::new_async(move |data| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        start_task(&inner, data).await;
                    }
                }
            }),
        );

        let weak = Arc::downgrade(inner);
        session.register(
            task_cancel_event(&inner.key),
            Handler::new_async(move |data| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        cancel_task(&inner, data).await;
                    }
                }
            }),
        );
    }
}

fn running_task_names<T: SyncModel>(inner: &SyncInner<T>) -> Vec<Value> {
    inner
        .running_tasks
        .iter()
        .map(|e| Value::String(e.key().clone()))
        .collect()
}

async fn send_state<T: SyncModel>(inner: &Arc<SyncInner<T>>) {
    let mut snapshot = {
        let guard = inner.target.lock().await;
        Value::Object(guard.snapshot())
    };
    if let (Some(wire_name), Value::Object(map)) = (&inner.task_exposure, &mut snapshot) {
        map.insert(wire_name.clone(), Value::Array(running_task_names(inner)));
    }
    *inner.snapshot.lock().await = snapshot.clone();
    inner.session.send(set_event(&inner.key), snapshot).await;
}

/// SET replaces the whole snapshot, but only if every field validates.
/// Mirrors `ws_sync/sync.py::Sync._set_state`: an uncaught validation error
/// aborts the loop immediately, leaving only the earlier keys applied and
/// the snapshot untouched by the rejected `new_state`.
async fn set_state<T: SyncModel>(inner: &Arc<SyncInner<T>>, new_state: Value) {
    let Value::Object(map) = &new_state else {
        tracing::warn!(key = %inner.key, "SET payload was not an object, ignoring");
        return;
    };

    let mut failed = false;
    {
        let mut target = inner.target.lock().await;
        for (wire_key, value) in map.iter() {
            if Some(wire_key) == inner.task_exposure.as_ref() {
                continue;
            }
            if let Err(err) = target.set_field(wire_key, value.clone()) {
                tracing::warn!(key = %inner.key, field = %wire_key, %err, "SET validation failed, stopping at first error");
                failed = true;
                break;
            }
        }
    }
    if !failed {
        *inner.snapshot.lock().await = new_state;
    }
}

/// The top-level keys any patch operation in `ops` names, taken from each
/// op's `path` (and `from`, for `move`/`copy`). Routed through
/// `serde_json::to_value` rather than matching `json_patch`'s internal enum
/// shape directly, since the wire JSON shape (RFC 6902) is the stable
/// contract here.
fn touched_top_level_keys(ops: &json_patch::Patch) -> std::collections::HashSet<String> {
    let mut keys = std::collections::HashSet::new();
    for op in &ops.0 {
        let Ok(Value::Object(op_json)) = serde_json::to_value(op) else {
            continue;
        };
        for field in ["path", "from"] {
            if let Some(Value::String(pointer)) = op_json.get(field) {
                if let Some(key) = pointer.trim_start_matches('/').split('/').next() {
                    if !key.is_empty() {
                        keys.insert(key.to_string());
                    }
                }
            }
        }
    }
    keys
}

/// PATCH applies the ops to the snapshot unconditionally, then re-validates
/// and re-assigns only the top-level keys any op actually touched (spec.md
/// §4.7), not the whole post-patch document.
async fn patch_state<T: SyncModel>(inner: &Arc<SyncInner<T>>, patch: Value) {
    let ops: json_patch::Patch = match serde_json::from_value(patch) {
        Ok(ops) => ops,
        Err(err) => {
            tracing::warn!(key = %inner.key, %err, "malformed JSON patch, ignoring");
            return;
        }
    };
    let touched = touched_top_level_keys(&ops);

    let mut snapshot_guard = inner.snapshot.lock().await;
    let mut doc = snapshot_guard.clone();
    if let Err(err) = json_patch::patch(&mut doc, &ops) {
        tracing::warn!(key = %inner.key, %err, "failed to apply JSON patch, ignoring");
        return;
    }
    *snapshot_guard = doc.clone();
    drop(snapshot_guard);

    if let Value::Object(map) = &doc {
        let mut target = inner.target.lock().await;
        for wire_key in &touched {
            if Some(wire_key) == inner.task_exposure.as_ref() {
                continue;
            }
            let Some(value) = map.get(wire_key) else {
                continue;
            };
            if let Err(err) = target.set_field(wire_key, value.clone()) {
                tracing::warn!(key = %inner.key, field = %wire_key, %err, "PATCH validation failed, key skipped");
            }
        }
    }
}

async fn dispatch_action<T: SyncModel>(inner: &Arc<SyncInner<T>>, data: Value) {
    let Value::Object(mut map) = data else {
        tracing::warn!(key = %inner.key, "action payload was not an object");
        return;
    };
    let Some(Value::String(action_type)) = map.remove("type") else {
        tracing::warn!(key = %inner.key, "action payload missing 'type'");
        return;
    };
    let payload = Value::Object(map);

    if let Some(handler) = inner.actions.get(&action_type).cloned() {
        if let Err(err) = handler(inner.target.clone(), payload).await {
            tracing::warn!(key = %inner.key, action = %action_type, %err, "action failed");
        }
        return;
    }

    if let Some(handler) = inner.blocking_actions.get(&action_type).cloned() {
        let target = inner.target.clone();
        match tokio::task::spawn_blocking(move || handler(target, payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(key = %inner.key, action = %action_type, %err, "action failed")
            }
            Err(err) => {
                tracing::warn!(key = %inner.key, action = %action_type, %err, "blocking action panicked")
            }
        }
        return;
    }

    tracing::warn!(key = %inner.key, action = %action_type, "no handler for action");
}

/// Dispatch for a Sync whose actions are all blocking: runs entirely on the
/// blocking pool thread the Session handed this call to, no async hop.
fn dispatch_blocking_action<T: SyncModel>(inner: &Arc<SyncInner<T>>, data: Value) {
    let Value::Object(mut map) = data else {
        tracing::warn!(key = %inner.key, "action payload was not an object");
        return;
    };
    let Some(Value::String(action_type)) = map.remove("type") else {
        tracing::warn!(key = %inner.key, "action payload missing 'type'");
        return;
    };
    let Some(handler) = inner.blocking_actions.get(&action_type).cloned() else {
        tracing::warn!(key = %inner.key, action = %action_type, "no handler for action");
        return;
    };
    if let Err(err) = handler(inner.target.clone(), Value::Object(map)) {
        tracing::warn!(key = %inner.key, action = %action_type, %err, "action failed");
    }
}

async fn start_task<T: SyncModel>(inner: &Arc<SyncInner<T>>, data: Value) {
    let Value::Object(mut map) = data else {
        tracing::warn!(key = %inner.key, "task-start payload was not an object");
        return;
    };
    let Some(Value::String(task_type)) = map.remove("type") else {
        tracing::warn!(key = %inner.key, "task-start payload missing 'type'");
        return;
    };
    let Some(factory) = inner.task_factories.get(&task_type).cloned() else {
        tracing::warn!(key = %inner.key, task = %task_type, "no factory for task");
        return;
    };
    if inner.running_tasks.contains_key(&task_type) {
        tracing::warn!(key = %inner.key, task = %task_type, "task already running, ignoring start");
        return;
    }

    let kwargs = Value::Object(map);
    let target = inner.target.clone();
    let cancel_token = CancellationToken::new();
    let token_for_run = cancel_token.clone();
    let inner_weak = Arc::downgrade(inner);
    let task_type_for_run = task_type.clone();

    spawn_scoped(async move {
        run_and_reap(
            inner_weak,
            task_type_for_run,
            factory(target, kwargs),
            token_for_run,
        )
        .await;
    });

    inner
        .running_tasks
        .insert(task_type, RunningTask { cancel_token });

    if inner.task_exposure.is_some() {
        sync_now(inner).await;
    }
}

enum TaskOutcome {
    Finished(Result<()>),
    Cancelled,
}

async fn run_and_reap<T: SyncModel>(
    inner: Weak<SyncInner<T>>,
    task_type: String,
    fut: Pin<Box<dyn Future<Output = Result<()>> + Send>>,
    cancel_token: CancellationToken,
) {
    let outcome = tokio::select! {
        res = fut => TaskOutcome::Finished(res),
        _ = cancel_token.cancelled() => TaskOutcome::Cancelled,
    };

    let Some(inner) = inner.upgrade() else {
        return;
    };

    match outcome {
        TaskOutcome::Cancelled => {
            tracing::info!(key = %inner.key, task = %task_type, "task cancelled");
            if let Some(handler) = inner.task_cancels.get(&task_type).cloned() {
                handler(inner.target.clone()).await;
            }
        }
        TaskOutcome::Finished(Err(err)) => {
            tracing::warn!(key = %inner.key, task = %task_type, %err, "task failed");
        }
        TaskOutcome::Finished(Ok(())) => {}
    }

    inner.running_tasks.remove(&task_type);
    if inner.task_exposure.is_some() {
        sync_now(&inner).await;
    }
}

async fn cancel_task<T: SyncModel>(inner: &Arc<SyncInner<T>>, data: Value) {
    let Value::Object(map) = &data else {
        tracing::warn!(key = %inner.key, "task-cancel payload was not an object");
        return;
    };
    let Some(Value::String(task_type)) = map.get("type") else {
        tracing::warn!(key = %inner.key, "task-cancel payload missing 'type'");
        return;
    };
    match inner.running_tasks.get(task_type) {
        Some(running) => running.cancel_token.cancel(),
        None => tracing::warn!(key = %inner.key, task = %task_type, "cancel of non-running task"),
    }
}

/// Recompute the snapshot and, if anything changed, emit `_PATCH:K`.
async fn sync_now<T: SyncModel>(inner: &Arc<SyncInner<T>>) {
    let mut new_snapshot = {
        let guard = inner.target.lock().await;
        Value::Object(guard.snapshot())
    };
    if let (Some(wire_name), Value::Object(map)) = (&inner.task_exposure, &mut new_snapshot) {
        map.insert(wire_name.clone(), Value::Array(running_task_names(inner)));
    }

    let mut snapshot_guard = inner.snapshot.lock().await;
    let patch = json_patch::diff(&snapshot_guard, &new_snapshot);
    if !patch.0.is_empty() {
        *snapshot_guard = new_snapshot;
        drop(snapshot_guard);
        inner.session.send(patch_event(&inner.key), &patch.0).await;
    }
}

/// A registered `(target, key)` pair kept in sync with a remote client.
/// Grounded in `ws_sync/sync.py::Sync`.
pub struct Sync<T: SyncModel> {
    inner: Arc<SyncInner<T>>,
}

impl<T: SyncModel> Clone for Sync<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: SyncModel> Sync<T> {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn target(&self) -> Target<T> {
        self.inner.target.clone()
    }

    pub fn running_task_names(&self) -> Vec<String> {
        self.inner
            .running_tasks
            .iter()
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Merge this instance's field schema with its registered action/task
    /// names into one combined schema suitable for publication (spec.md
    /// §4.11).
    pub fn schema_export(&self) -> SchemaExport {
        SchemaExport {
            key: self.inner.key.clone(),
            fields: T::schema().field_names.to_vec(),
            actions: self
                .inner
                .actions
                .keys()
                .chain(self.inner.blocking_actions.keys())
                .cloned()
                .collect(),
            tasks: self.inner.task_factories.keys().cloned().collect(),
        }
    }

    /// Recompute the snapshot and emit a `_PATCH:K` of the minimal diff, iff
    /// the target changed since the last sync. `if_since_last` throttles to
    /// at most once per that interval.
    pub async fn sync(&self, if_since_last: Option<Duration>) {
        if !self.inner.session.is_connected().await {
            return;
        }
        let now = Instant::now();
        if let Some(interval) = if_since_last {
            let last = *self.inner.last_sync.lock().await;
            if let Some(last_t) = last {
                if now.duration_since(last_t) < interval {
                    return;
                }
            }
        }

        let mut new_snapshot = {
            let guard = self.inner.target.lock().await;
            Value::Object(guard.snapshot())
        };
        if let (Some(wire_name), Value::Object(map)) =
            (&self.inner.task_exposure, &mut new_snapshot)
        {
            map.insert(
                wire_name.clone(),
                Value::Array(running_task_names(&self.inner)),
            );
        }

        let mut snapshot_guard = self.inner.snapshot.lock().await;
        let patch = json_patch::diff(&snapshot_guard, &new_snapshot);
        if !patch.0.is_empty() {
            *snapshot_guard = new_snapshot;
            drop(snapshot_guard);
            self.inner
                .session
                .send(patch_event(&self.inner.key), &patch.0)
                .await;
            *self.inner.last_sync.lock().await = Some(now);
        }
    }

    /// `sync()` plus an optional toast, the Rust shape of `Sync.__call__`.
    pub async fn call(&self, if_since_last: Option<Duration>, toast: Option<(&str, ToastSeverity)>) {
        self.sync(if_since_last).await;
        if let Some((message, severity)) = toast {
            self.toast(message, severity).await;
        }
    }

    pub async fn send_action(&self, data: Value) {
        self.inner
            .session
            .send(action_event(&self.inner.key), data)
            .await;
    }

    pub async fn send_binary(&self, metadata: Value, bytes: Vec<u8>) {
        self.inner
            .session
            .send_binary(action_event(&self.inner.key), metadata, bytes)
            .await;
    }

    /// Send a toast. Returns the message so callers can reuse it (log, or
    /// return it from their own handler) — mirrors `Sync.toast`.
    pub async fn toast(&self, message: impl Into<String>, severity: ToastSeverity) -> String {
        let message = message.into();
        severity.log(&message);
        self.inner
            .session
            .send(
                TOAST_EVENT,
                Toast {
                    severity,
                    message: message.clone(),
                },
            )
            .await;
        message
    }

    /// Idempotent cleanup: deregisters this Sync's handlers immediately
    /// instead of waiting for the last `Arc` to drop (spec.md §4.10).
    pub fn close(&self) {
        self.inner.close_sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    use crate::model::{to_camel_case, SyncSchema};

    use serde::Deserialize;
    use serde_json::{json, Map};
    use sync_session::{InboundFrame, Session, Transport};
    use tokio::sync::Mutex as TokioMutex;

    struct MockTransport {
        outbox: TokioMutex<Vec<String>>,
        inbox: TokioMutex<Vec<InboundFrame>>,
    }

    impl MockTransport {
        fn new(inbound: Vec<InboundFrame>) -> Arc<Self> {
            let mut inbound = inbound;
            inbound.reverse();
            Arc::new(Self {
                outbox: TokioMutex::new(Vec::new()),
                inbox: TokioMutex::new(inbound),
            })
        }

        async fn events(&self) -> Vec<Value> {
            self.outbox
                .lock()
                .await
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, text: String) -> sync_session::Result<()> {
            self.outbox.lock().await.push(text);
            Ok(())
        }

        async fn send_binary(&self, _bytes: Vec<u8>) -> sync_session::Result<()> {
            Ok(())
        }

        async fn recv(&self) -> sync_session::Result<Option<InboundFrame>> {
            Ok(self.inbox.lock().await.pop())
        }

        async fn close(&self) -> sync_session::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct Counter {
        count: i64,
    }

    impl SyncModel for Counter {
        fn schema() -> &'static SyncSchema {
            static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
            SCHEMA.get_or_init(|| SyncSchema {
                field_names: &["count"],
            })
        }

        fn snapshot(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert("count".to_string(), json!(self.count));
            map
        }

        fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
            match wire_key {
                "count" => {
                    self.count = serde_json::from_value(value)
                        .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
                    Ok(())
                }
                other => Err(SyncEngineError::Validation(format!("unknown field {other}"))),
            }
        }
    }

    #[derive(Debug, Clone)]
    struct Person {
        first_name: String,
    }

    impl SyncModel for Person {
        fn schema() -> &'static SyncSchema {
            static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
            SCHEMA.get_or_init(|| SyncSchema {
                field_names: &["first_name"],
            })
        }

        fn snapshot(&self) -> Map<String, Value> {
            let mut map = Map::new();
            map.insert(to_camel_case("first_name"), json!(self.first_name));
            map
        }

        fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
            if wire_key == to_camel_case("first_name") {
                self.first_name = serde_json::from_value(value)
                    .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
                Ok(())
            } else {
                Err(SyncEngineError::Validation(format!("unknown field {wire_key}")))
            }
        }
    }

    #[derive(Deserialize)]
    struct IncrementArgs {
        by: i64,
    }

    async fn bound<T, F, Fut>(session: &Arc<Session>, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        session.bind(f()).await
    }

    #[tokio::test]
    async fn camel_case_aliasing_snapshot_and_patch() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let person = Person {
            first_name: "Ada".to_string(),
        };
        let sync = bound(&session, || SyncBuilder::new(person, "PERSON").build())
            .await
            .unwrap();

        let events = transport.events().await;
        let last = events.last().unwrap();
        assert_eq!(last["type"], "_SET:PERSON");
        assert_eq!(last["data"]["firstName"], "Ada");
        drop(sync);
    }

    #[tokio::test]
    async fn sync_emits_patch_event_with_minimal_diff() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
            .await
            .unwrap();

        {
            let target = sync.target();
            let mut guard = target.lock().await;
            guard.count = 5;
        }
        sync.sync(None).await;

        let events = transport.events().await;
        let last = events.last().unwrap();
        assert_eq!(last["type"], "_PATCH:COUNTER");
        assert_eq!(last["data"][0]["path"], "/count");
        assert_eq!(last["data"][0]["value"], 5);
    }

    #[tokio::test]
    async fn set_event_applies_full_replacement_to_target() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
            .await
            .unwrap();

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_SET:COUNTER","data":{"count":42}}"#.to_string(),
            )]))
            .await;

        assert_eq!(sync.target().lock().await.count, 42);
    }

    #[tokio::test]
    async fn action_validation_failure_leaves_state_unchanged() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let (name, handler) = crate::handlers::action::<Counter, IncrementArgs, _, _>(
            "increment",
            |target, args| async move {
                target.lock().await.count += args.by;
                Ok(())
            },
        );

        let sync = bound(&session, || {
            SyncBuilder::new(Counter { count: 0 }, "COUNTER")
                .action((name, handler))
                .build()
        })
        .await
        .unwrap();

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_ACTION:COUNTER","data":{"type":"increment","by":"not-a-number"}}"#
                    .to_string(),
            )]))
            .await;
        assert_eq!(sync.target().lock().await.count, 0);

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_ACTION:COUNTER","data":{"type":"increment","by":3}}"#.to_string(),
            )]))
            .await;
        assert_eq!(sync.target().lock().await.count, 3);
    }

    #[tokio::test]
    async fn task_lifecycle_exposes_running_tasks_and_invokes_cancel_handler() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let cancelled = Arc::new(StdAtomicBool::new(false));
        let cancelled_for_handler = cancelled.clone();

        let (task_name, factory) = crate::handlers::task::<Counter, Value, _, _>(
            "count_forever",
            |target, _args| async move {
                loop {
                    {
                        let mut guard = target.lock().await;
                        guard.count += 1;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            },
        );
        let (cancel_name, cancel_handler) = crate::handlers::task_cancel::<Counter, _, _>(
            "count_forever",
            move |_target| {
                let cancelled_for_handler = cancelled_for_handler.clone();
                async move {
                    cancelled_for_handler.store(true, Ordering::SeqCst);
                }
            },
        );

        let sync = bound(&session, || {
            SyncBuilder::new(Counter { count: 0 }, "COUNTER")
                .expose_running_tasks("runningTasks")
                .task((task_name, factory))
                .task_cancel((cancel_name, cancel_handler))
                .build()
        })
        .await
        .unwrap();

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_TASK_START:COUNTER","data":{"type":"count_forever"}}"#.to_string(),
            )]))
            .await;

        assert_eq!(sync.running_task_names(), vec!["count_forever".to_string()]);

        tokio::time::sleep(Duration::from_millis(20)).await;

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_TASK_CANCEL:COUNTER","data":{"type":"count_forever"}}"#.to_string(),
            )]))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cancelled.load(Ordering::SeqCst));
        assert!(sync.running_task_names().is_empty());
    }

    #[tokio::test]
    async fn set_stops_at_first_invalid_key_and_leaves_snapshot_untouched() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
            .await
            .unwrap();

        // "count" is declared before the unknown "bogus" key in source order,
        // but `Map`'s JSON parse preserves declaration order (preserve_order
        // feature) so "count" applies before the invalid key aborts the loop.
        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_SET:COUNTER","data":{"count":7,"bogus":true}}"#.to_string(),
            )]))
            .await;

        assert_eq!(sync.target().lock().await.count, 7);

        // A SET where the very first key fails leaves the target at its
        // last-known-good value and must not adopt the rejected snapshot.
        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_SET:COUNTER","data":{"bogus":true,"count":99}}"#.to_string(),
            )]))
            .await;

        assert_eq!(sync.target().lock().await.count, 7);
    }

    #[tokio::test]
    async fn patch_only_revalidates_keys_the_ops_touched() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
            .await
            .unwrap();

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_PATCH:COUNTER","data":[{"op":"replace","path":"/count","value":9}]}"#
                    .to_string(),
            )]))
            .await;

        assert_eq!(sync.target().lock().await.count, 9);
    }

    #[tokio::test]
    async fn blocking_action_is_reachable_through_the_builder() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let (name, handler) = crate::handlers::blocking_action::<Counter, IncrementArgs, _>(
            "increment",
            |target, args| {
                target.blocking_lock().count += args.by;
                Ok(())
            },
        );

        let sync = bound(&session, || {
            SyncBuilder::new(Counter { count: 0 }, "COUNTER")
                .blocking_action((name, handler))
                .build()
        })
        .await
        .unwrap();

        session
            .handle_connection(MockTransport::new(vec![InboundFrame::Text(
                r#"{"type":"_ACTION:COUNTER","data":{"type":"increment","by":4}}"#.to_string(),
            )]))
            .await;

        assert_eq!(sync.target().lock().await.count, 4);
    }

    #[tokio::test]
    async fn schema_export_merges_fields_with_registered_action_and_task_names() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let (name, handler) = crate::handlers::action::<Counter, IncrementArgs, _, _>(
            "increment",
            |target, args| async move {
                target.lock().await.count += args.by;
                Ok(())
            },
        );

        let sync = bound(&session, || {
            SyncBuilder::new(Counter { count: 0 }, "COUNTER")
                .action((name, handler))
                .build()
        })
        .await
        .unwrap();

        let export = sync.schema_export();
        assert_eq!(export.key, "COUNTER");
        assert_eq!(export.fields, vec!["count"]);
        assert_eq!(export.actions, vec!["increment".to_string()]);
        assert!(export.tasks.is_empty());
    }

    #[tokio::test]
    async fn close_removes_all_registered_handlers_and_is_idempotent() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        let sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
            .await
            .unwrap();

        assert!(session.has_handler("_GET:COUNTER"));
        sync.close();
        sync.close();

        assert!(!session.has_handler("_GET:COUNTER"));
        assert!(!session.has_handler("_SET:COUNTER"));
        assert!(!session.has_handler("_PATCH:COUNTER"));
        assert_eq!(session.init_handler_count(), 0);
    }

    #[tokio::test]
    async fn dropping_all_references_clears_session_registrations() {
        let session = Session::new();
        let transport = MockTransport::new(vec![]);
        session.new_connection(transport.clone()).await;

        {
            let _sync = bound(&session, || SyncBuilder::new(Counter { count: 0 }, "COUNTER").build())
                .await
                .unwrap();
            assert!(session.has_handler("_GET:COUNTER"));
        }

        assert!(!session.has_handler("_GET:COUNTER"));
    }
}
