use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::ReconnectPolicy;
use crate::types::SessionId;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [reconnect]
//                    max_attempts = 8
//
//   env var:         AGENT_SESSION_RECONNECT__MAX_ATTEMPTS=8   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub service: ServiceFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub history: HistoryFileConfig,
}

/// Where the backend lives (`[service]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket base; derived from `base_url` when unset.
    #[serde(default)]
    pub ws_base: Option<String>,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for ServiceFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_base: None,
            api_prefix: default_api_prefix(),
        }
    }
}

/// Reconnect budget (`[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// History paging (`[history]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryFileConfig {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for HistoryFileConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_history_limit() -> usize {
    50
}

/// `<config dir>/agent-session/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agent-session").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → AGENT_SESSION_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `AGENT_SESSION_SERVICE__BASE_URL=http://host:8000`  →  `service.base_url`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("AGENT_SESSION_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP base including the API prefix, without trailing slash.
    pub api_base: String,
    /// WebSocket base, without trailing slash.
    pub ws_base: String,
    pub reconnect: ReconnectPolicy,
    pub history_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl ClientConfig {
    /// Resolve the layered configuration. An explicit path that does not
    /// exist is treated like an empty file.
    pub fn load(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let fc: FileConfig = load_config(config_path).extract()?;
        Ok(Self::from_file(&fc))
    }

    pub fn from_file(fc: &FileConfig) -> Self {
        let base_url = fc.service.base_url.trim_end_matches('/');
        let ws_base = fc
            .service
            .ws_base
            .as_deref()
            .map(|ws| ws.trim_end_matches('/').to_string())
            .unwrap_or_else(|| ws_base_for(base_url));
        let prefix = fc.service.api_prefix.trim_end_matches('/');
        let api_base = if prefix.is_empty() || prefix.starts_with('/') {
            format!("{base_url}{prefix}")
        } else {
            format!("{base_url}/{prefix}")
        };

        Self {
            api_base,
            ws_base,
            reconnect: ReconnectPolicy {
                max_attempts: fc.reconnect.max_attempts,
                base_delay: Duration::from_millis(fc.reconnect.base_delay_ms),
            },
            history_limit: fc.history.limit,
        }
    }

    /// Streaming endpoint of one session.
    pub fn ws_url(&self, session_id: &SessionId) -> String {
        format!("{}/ws/{}", self.ws_base, session_id)
    }
}

/// Map an HTTP base onto the matching WebSocket scheme.
fn ws_base_for(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = http_base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        http_base.to_string()
    }
}
