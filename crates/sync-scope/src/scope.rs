use std::future::Future;

tokio::task_local! {
    static KEY_SCOPE: Vec<String>;
}

/// The `/`-joined current prefix stack, or `None` if nothing is pushed.
pub fn current_prefix() -> Option<String> {
    let stack = KEY_SCOPE.try_with(|s| s.clone()).unwrap_or_default();
    if stack.is_empty() {
        None
    } else {
        Some(stack.join("/"))
    }
}

/// Prefix `key` with the current scope stack, per spec.md §4.3: "A Sync
/// constructed while the stack is non-empty has its key rewritten to
/// `prefix + "/" + originalKey`".
pub fn apply_prefix(key: &str) -> String {
    match current_prefix() {
        Some(prefix) => format!("{prefix}/{key}"),
        None => key.to_string(),
    }
}

/// Run `fut` with `segment` pushed onto the key-scope stack. Empty segments
/// are elided (pushing one is a no-op, matching `keyScope(p)` entering only
/// "iff `p` is non-empty"). The pop happens implicitly when the returned
/// future completes — `tokio::task_local`'s `scope` restores the outer
/// value on exit, so nested calls stack and unwind correctly even across
/// `?`/early-return/panic.
pub async fn key_scope<S, F, T>(segment: S, fut: F) -> T
where
    S: Into<String>,
    F: Future<Output = T>,
{
    let segment = segment.into();
    let mut stack = KEY_SCOPE.try_with(|s| s.clone()).unwrap_or_default();
    if !segment.is_empty() {
        stack.push(segment);
    }
    KEY_SCOPE.scope(stack, fut).await
}

/// Spawn `fut` on the runtime, carrying a snapshot of the current key-scope
/// stack into the new task. Tokio task-locals do not cross a `tokio::spawn`
/// boundary on their own; this is the copy-on-fork propagation spec.md's
/// design notes call for — the child observes the parent's stack at launch
/// time, and mutations made by either side afterward are isolated from the
/// other.
pub fn spawn_scoped<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let stack = KEY_SCOPE.try_with(|s| s.clone()).unwrap_or_default();
    tokio::spawn(KEY_SCOPE.scope(stack, fut))
}
