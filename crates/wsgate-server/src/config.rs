//! Gateway configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use wsgate_core::{GateError, GateResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sweeper: SweeperSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            max_connections: default_max_connections(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// `[sweeper]` section of the config TOML. The period should stay
/// materially shorter than the threshold to bound the worst-case
/// staleness window.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperSection {
    #[serde(default = "default_sweep_period")]
    pub period_secs: u64,
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            period_secs: default_sweep_period(),
            stale_threshold_secs: default_stale_threshold(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    /// Shared token accepted by the default verifier. Unset means every
    /// authenticate attempt is rejected.
    #[serde(default)]
    pub shared_token: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9001
}
fn default_max_connections() -> usize {
    1024
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}
fn default_sweep_period() -> u64 {
    60
}
fn default_stale_threshold() -> u64 {
    300
}

/// Resolved gateway configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_frame_bytes: usize,
    pub sweep_period_secs: u64,
    pub stale_threshold_secs: u64,
    pub shared_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            max_connections: default_max_connections(),
            max_frame_bytes: default_max_frame_bytes(),
            sweep_period_secs: default_sweep_period(),
            stale_threshold_secs: default_stale_threshold(),
            shared_token: None,
        }
    }
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_listen_addr: Option<&str>,
        cli_port: Option<u16>,
        cli_max_connections: Option<usize>,
        cli_sweep_period: Option<u64>,
        cli_stale_threshold: Option<u64>,
    ) -> GateResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| GateError::Other(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        Ok(Self {
            listen_addr: cli_listen_addr
                .map(|s| s.to_string())
                .unwrap_or(file_config.server.listen_addr),
            port: cli_port.unwrap_or(file_config.server.port),
            max_connections: cli_max_connections.unwrap_or(file_config.server.max_connections),
            max_frame_bytes: file_config.server.max_frame_bytes,
            sweep_period_secs: cli_sweep_period.unwrap_or(file_config.sweeper.period_secs),
            stale_threshold_secs: cli_stale_threshold
                .unwrap_or(file_config.sweeper.stale_threshold_secs),
            shared_token: file_config.auth.shared_token,
        })
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}
