//! Event-name vocabulary. Every synced object is addressed by a *key*, and
//! the six per-key event names below are built by prefixing that key —
//! mirrors `ws_sync/sync.py`'s `get_event`/`set_event`/`patch_event`/
//! `action_event`/`task_start_event`/`task_cancel_event` free functions.

/// `_GET:<key>` — client asks for a fresh snapshot of `key`.
pub fn get_event(key: &str) -> String {
    format!("_GET:{key}")
}

/// `_SET:<key>` — client pushes a full replacement state for `key`.
pub fn set_event(key: &str) -> String {
    format!("_SET:{key}")
}

/// `_PATCH:<key>` — either direction: a JSON Patch against `key`'s state.
pub fn patch_event(key: &str) -> String {
    format!("_PATCH:{key}")
}

/// `_ACTION:<key>` — client invokes a registered action on `key`.
pub fn action_event(key: &str) -> String {
    format!("_ACTION:{key}")
}

/// `_TASK_START:<key>` — client starts a registered background task on `key`.
pub fn task_start_event(key: &str) -> String {
    format!("_TASK_START:{key}")
}

/// `_TASK_CANCEL:<key>` — client cancels a running task on `key`.
pub fn task_cancel_event(key: &str) -> String {
    format!("_TASK_CANCEL:{key}")
}

/// Server → client ephemeral notification, not tied to any key's state.
pub const TOAST_EVENT: &str = "_TOAST";

/// Precedes a raw binary WS frame, describing what the bytes are.
pub const BIN_META_EVENT: &str = "_BIN_META";

/// Server → client, sent just before the server closes the connection.
pub const DISCONNECT_EVENT: &str = "_DISCONNECT";

/// Server → client, optional: the server asks the client to identify
/// itself so its Session can persist across reconnects (`ws_sync/id.py`).
pub const REQUEST_USER_SESSION_EVENT: &str = "_REQUEST_USER_SESSION";

/// Client → server, answers `_REQUEST_USER_SESSION` with `{user, session}`.
pub const USER_SESSION_EVENT: &str = "_USER_SESSION";
