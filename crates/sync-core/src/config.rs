use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncCoreError};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Hard cap per inbound text frame (spec.md §5, "a naive ... would freeze").
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024;
/// Close unauthenticated connections after this many milliseconds.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Heartbeat tick cadence once a connection is accepted.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Top-level config (`sync.toml` + `SYNC_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

/// Minimal auth surface. spec.md places authentication out of scope for the
/// sync engine itself; this only gates the demo transport in `sync-gateway`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    Token,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl SyncConfig {
    /// Load config from a TOML file with `SYNC_*` env var overrides.
    ///
    /// Checks in order: explicit path argument > `SYNC_CONFIG` env var >
    /// `~/.sync-engine/sync.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: SyncConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SYNC_").split("_"))
            .extract()
            .map_err(|e| SyncCoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sync-engine/sync.toml", home)
}
