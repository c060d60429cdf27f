//! Configuration loaded from a TOML file at startup

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the control plane
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Control API server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Container engine settings
    #[serde(default)]
    pub docker: DockerConfig,

    /// Port allocation ranges for managed servers
    #[serde(default)]
    pub ports: PortConfig,

    /// Persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Proxy config synthesis and reload settings
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Reconciliation and retry settings
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address for the control API (default: 127.0.0.1)
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Control API port (default: 8800)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Docker endpoint ('unix:///path' or 'tcp://host:port').
    /// Falls back to DOCKER_HOST, then the platform default socket.
    pub host: Option<String>,

    /// Grace period given to a container on stop before escalation
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Overall timeout for a single runtime call
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortConfig {
    /// Host-side port range, inclusive start, exclusive end
    #[serde(default = "default_host_range")]
    pub host_range: (u16, u16),

    /// Game port range, inclusive start, exclusive end
    #[serde(default = "default_game_range")]
    pub game_range: (u16, u16),
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base directory for server data volumes
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Where the synthesized routing config is written
    #[serde(default = "default_proxy_config_path")]
    pub config_path: String,

    /// Command run after writing the config to make the proxy reload it
    /// (e.g. "nginx -s reload"). When unset, only the file is written.
    pub reload_command: Option<String>,

    /// Debounce window for coalescing bursts of registry changes
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Attempts per config apply before giving up
    #[serde(default = "default_apply_attempts")]
    pub apply_attempts: u32,

    /// Base backoff between apply attempts (doubles each attempt)
    #[serde(default = "default_apply_backoff_ms")]
    pub apply_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Interval between reconciliation passes
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,

    /// Attempts for a runtime call that fails as retryable
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff between retries (doubles each attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8800
}

fn default_stop_grace_secs() -> u64 {
    30
}

fn default_operation_timeout_secs() -> u64 {
    60
}

fn default_host_range() -> (u16, u16) {
    (25565, 25665)
}

fn default_game_range() -> (u16, u16) {
    (8100, 8200)
}

fn default_db_path() -> String {
    "./fleetgate.db".to_string()
}

fn default_data_dir() -> String {
    "./server_data".to_string()
}

fn default_proxy_config_path() -> String {
    "./proxy_routes.toml".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_apply_attempts() -> u32 {
    3
}

fn default_apply_backoff_ms() -> u64 {
    250
}

fn default_reconcile_interval_secs() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_api_port(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            stop_grace_secs: default_stop_grace_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            host_range: default_host_range(),
            game_range: default_game_range(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config_path: default_proxy_config_path(),
            reload_command: None,
            debounce_ms: default_debounce_ms(),
            apply_attempts: default_apply_attempts(),
            apply_backoff_ms: default_apply_backoff_ms(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let (hs, he) = self.ports.host_range;
        let (gs, ge) = self.ports.game_range;
        if hs >= he {
            anyhow::bail!("ports.host_range start must be below end");
        }
        if gs >= ge {
            anyhow::bail!("ports.game_range start must be below end");
        }
        if self.proxy.apply_attempts == 0 {
            anyhow::bail!("proxy.apply_attempts must be at least 1");
        }
        Ok(())
    }
}

impl DockerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl ProxyConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn apply_backoff(&self) -> Duration {
        Duration::from_millis(self.apply_backoff_ms)
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8800);
        assert_eq!(config.proxy.debounce_ms, 500);
        assert_eq!(config.proxy.apply_attempts, 3);
        assert_eq!(config.reconcile.interval_secs, 10);
        assert_eq!(config.ports.host_range, (25565, 25665));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [server]
            port = 9000

            [proxy]
            config_path = "/etc/proxy/routes.toml"
            reload_command = "nginx -s reload"
            debounce_ms = 100
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.proxy.config_path, "/etc/proxy/routes.toml");
        assert_eq!(config.proxy.debounce_ms, 100);
        // Unspecified sections keep their defaults
        assert_eq!(config.reconcile.retry_attempts, 4);
        assert_eq!(config.docker.stop_grace_secs, 30);
    }

    #[test]
    fn test_validate_rejects_empty_range() {
        let mut config = Config::default();
        config.ports.host_range = (9000, 9000);
        assert!(config.validate().is_err());
    }
}
