use thiserror::Error;

/// Cross-crate error taxonomy for the sync runtime (config loading plus the
/// error shapes the gateway's transport surfaces back to clients).
#[derive(Debug, Error)]
pub enum SyncCoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncCoreError {
    /// Short error code string, mirrored onto wire error frames.
    pub fn code(&self) -> &'static str {
        match self {
            SyncCoreError::Config(_) => "CONFIG_ERROR",
            SyncCoreError::AuthFailed(_) => "AUTH_FAILED",
            SyncCoreError::Protocol(_) => "PROTOCOL_ERROR",
            SyncCoreError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SyncCoreError::Serialization(_) => "SERIALIZATION_ERROR",
            SyncCoreError::Io(_) => "IO_ERROR",
            SyncCoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncCoreError>;
