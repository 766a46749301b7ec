use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{Result, SyncEngineError};
use crate::model::{to_snake_case, SyncModel};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared handle to the domain object a `Sync<T>` wraps. Action and task
/// closures receive this instead of a private reference so server code can
/// still reach the same object concurrently (mirrors Python's handlers being
/// bound methods closing over `self`).
pub type Target<T> = Arc<Mutex<T>>;

pub type ActionHandler<T> =
    Arc<dyn Fn(Target<T>, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type TaskFactory<T> =
    Arc<dyn Fn(Target<T>, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type TaskCancelHandler<T> = Arc<dyn Fn(Target<T>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type BlockingActionHandler<T> = Arc<dyn Fn(Target<T>, Value) -> Result<()> + Send + Sync>;

/// Rewrite every top-level key of a kwargs object to its snake_case spelling
/// before validation, so a cached validator whose fields are declared
/// snake_case (the Rust convention) accepts a client that sent either the
/// attribute name or its camelCase alias — both spellings are valid per
/// spec.md §4.8.
fn normalize_kwarg_aliases(value: Value) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut normalized = Map::with_capacity(map.len());
    for (key, v) in map {
        normalized.insert(to_snake_case(&key), v);
    }
    Value::Object(normalized)
}

/// Build a named action handler whose keyword arguments are validated by
/// deserializing into `A` (the Rust counterpart of a per-action cached
/// `TypeAdapter` in `ws_sync/sync.py`) before `f` runs. `value` is the
/// `_ACTION:K` payload with `type` already popped.
pub fn action<T, A, F, Fut>(name: impl Into<String>, f: F) -> (String, ActionHandler<T>)
where
    T: SyncModel,
    A: DeserializeOwned + Send + 'static,
    F: Fn(Target<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let f = Arc::new(f);
    let handler: ActionHandler<T> = Arc::new(move |target, value| {
        let f = f.clone();
        Box::pin(async move {
            let args: A = serde_json::from_value(normalize_kwarg_aliases(value))
                .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
            f(target, args).await
        })
    });
    (name.into(), handler)
}

/// Build a named task factory, analogous to [`action`] but its future runs
/// concurrently under `Sync`'s task tracking instead of inline.
pub fn task<T, A, F, Fut>(name: impl Into<String>, f: F) -> (String, TaskFactory<T>)
where
    T: SyncModel,
    A: DeserializeOwned + Send + 'static,
    F: Fn(Target<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let f = Arc::new(f);
    let handler: TaskFactory<T> = Arc::new(move |target, value| {
        let f = f.clone();
        Box::pin(async move {
            let args: A = serde_json::from_value(normalize_kwarg_aliases(value))
                .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
            f(target, args).await
        })
    });
    (name.into(), handler)
}

/// Build a named action handler whose business logic is itself synchronous.
/// Dispatched on Tokio's blocking thread pool rather than inline on the
/// Session's receive loop — spec.md §5's mandatory worker-pool offload for
/// synchronous handlers.
pub fn blocking_action<T, A, F>(
    name: impl Into<String>,
    f: F,
) -> (String, BlockingActionHandler<T>)
where
    T: SyncModel,
    A: DeserializeOwned + Send + 'static,
    F: Fn(Target<T>, A) -> Result<()> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handler: BlockingActionHandler<T> = Arc::new(move |target, value| {
        let args: A = serde_json::from_value(normalize_kwarg_aliases(value))
            .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
        f(target, args)
    });
    (name.into(), handler)
}

/// Build a task-cancel handler, invoked once when the named task is
/// cancelled (spec.md §4.9).
pub fn task_cancel<T, F, Fut>(name: impl Into<String>, f: F) -> (String, TaskCancelHandler<T>)
where
    T: SyncModel,
    F: Fn(Target<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    let handler: TaskCancelHandler<T> = Arc::new(move |target| {
        let f = f.clone();
        Box::pin(async move { f(target).await })
    });
    (name.into(), handler)
}
