use serde::{Deserialize, Serialize};

/// Toast severity, per spec.md §6: `{default, message, info, success, warning, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToastSeverity {
    #[default]
    Default,
    Message,
    Info,
    Success,
    Warning,
    Error,
}

impl ToastSeverity {
    /// Route a toast through `tracing` at the level the original `ws_sync`
    /// library used (`sync.py::Sync.toast`): default/message/info/success at
    /// debug-or-info, warning and error at their matching level.
    pub fn log(&self, message: &str) {
        match self {
            ToastSeverity::Default => tracing::debug!(%message, "toast"),
            ToastSeverity::Message | ToastSeverity::Info | ToastSeverity::Success => {
                tracing::info!(%message, "toast")
            }
            ToastSeverity::Warning => tracing::warn!(%message, "toast"),
            ToastSeverity::Error => tracing::error!(%message, "toast"),
        }
    }
}
