pub mod config;
pub mod error;
pub mod toast;

pub use error::{Result, SyncCoreError};
pub use toast::ToastSeverity;
