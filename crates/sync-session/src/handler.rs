use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An event handler bound into a Session's dispatch table. Async handlers
/// run inline on the receive loop; blocking handlers are offloaded to the
/// Tokio blocking pool so a slow synchronous callback can never stall a
/// Session's event queue — the Rust shape of `ws_sync/utils.py::nonblock_call`.
#[derive(Clone)]
pub enum Handler {
    Async(Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>),
    Blocking(Arc<dyn Fn(Value) + Send + Sync>),
}

impl Handler {
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Handler::Async(Arc::new(move |v| Box::pin(f(v))))
    }

    pub fn new_blocking<F>(f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Handler::Blocking(Arc::new(f))
    }

    pub async fn call(&self, data: Value) {
        match self {
            Handler::Async(f) => f(data).await,
            Handler::Blocking(f) => {
                let f = f.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || f(data)).await {
                    tracing::warn!(%err, "blocking handler panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Async(_) => f.write_str("Handler::Async(..)"),
            Handler::Blocking(_) => f.write_str("Handler::Blocking(..)"),
        }
    }
}
