pub mod events;
pub mod frames;

pub use events::{
    action_event, get_event, patch_event, set_event, task_cancel_event, task_start_event,
    BIN_META_EVENT, DISCONNECT_EVENT, REQUEST_USER_SESSION_EVENT, TOAST_EVENT, USER_SESSION_EVENT,
};
pub use frames::{BinMeta, Envelope, Toast, UserSessionPayload};
