use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::ToastSeverity;

/// The one envelope shape every frame on the wire uses, in either direction:
/// `{ "type": "<event name>", "data": <payload> }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Parse a raw inbound text frame without losing the body on a decode
    /// error — callers need the event name even when `data` won't deserialize
    /// into whatever shape they expected.
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `_BIN_META` payload: announces the binary frame that follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinMeta {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub metadata: Value,
}

/// `_TOAST` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toast {
    #[serde(rename = "type")]
    pub severity: ToastSeverity,
    pub message: String,
}

/// `_USER_SESSION` payload (`ws_sync/id.py`): the client's self-reported
/// identity, resent on every connection so its Session can be rebound
/// across reconnects instead of starting fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSessionPayload {
    pub user: String,
    pub session: String,
}
