//! Configuration management for Holdgate.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

use crate::error::{GateError, Result};

/// Main configuration for the Holdgate service.
///
/// Built once at startup (file, then environment overrides, then
/// validation) and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Gate policy configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for HoldgateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gate: GateConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Base URL of the protected upstream that gated requests forward to
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream_url: default_upstream_url(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

/// Gate policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Shared secret the signal caller must present
    #[serde(default = "default_boot_secret")]
    pub boot_secret: String,

    /// Seconds an entitlement stays open after each ready signal
    #[serde(default = "default_ready_ttl_sec")]
    pub ready_ttl_sec: u64,

    /// Sliding window length in seconds
    #[serde(default = "default_window_sec")]
    pub window_sec: u64,

    /// Maximum requests per identity within the window
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Ban duration in seconds once the limit is breached
    #[serde(default = "default_ban_sec")]
    pub ban_sec: u64,

    /// Exact paths exempt from the gate
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: HashSet<String>,

    /// Path prefixes exempt from the gate
    #[serde(default = "default_bypass_prefixes")]
    pub bypass_prefixes: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            boot_secret: default_boot_secret(),
            ready_ttl_sec: default_ready_ttl_sec(),
            window_sec: default_window_sec(),
            limit: default_limit(),
            ban_sec: default_ban_sec(),
            bypass_paths: default_bypass_paths(),
            bypass_prefixes: default_bypass_prefixes(),
        }
    }
}

impl GateConfig {
    /// Whether a request path skips the gate entirely.
    pub fn is_bypass(&self, path: &str) -> bool {
        self.bypass_paths.contains(path)
            || self.bypass_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn default_boot_secret() -> String {
    "dev-secret".to_string()
}

fn default_ready_ttl_sec() -> u64 {
    600
}

fn default_window_sec() -> u64 {
    10
}

fn default_limit() -> usize {
    10
}

fn default_ban_sec() -> u64 {
    10
}

fn default_bypass_paths() -> HashSet<String> {
    ["/health".to_string()].into_iter().collect()
}

fn default_bypass_prefixes() -> Vec<String> {
    vec!["/signal/".to_string()]
}

/// Which backend holds the gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process maps; valid only for single-instance deployments
    Memory,
    /// Shared Redis store; required when running more than one instance
    Redis,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Selected backend
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL (redis backend only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Deadline for a single store round trip, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

impl HoldgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: HoldgateConfig =
            serde_yaml::from_str(&contents).map_err(|e| GateError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Apply the recognized environment variables on top of the current
    /// values. Unset variables leave the existing value untouched.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("BOOT_SECRET") {
            self.gate.boot_secret = v;
        }
        if let Ok(v) = std::env::var("READY_TTL_SEC") {
            self.gate.ready_ttl_sec = parse_env("READY_TTL_SEC", &v)?;
        }
        if let Ok(v) = std::env::var("WINDOW_SEC") {
            self.gate.window_sec = parse_env("WINDOW_SEC", &v)?;
        }
        if let Ok(v) = std::env::var("LIMIT") {
            self.gate.limit = parse_env("LIMIT", &v)?;
        }
        if let Ok(v) = std::env::var("BAN_SEC") {
            self.gate.ban_sec = parse_env("BAN_SEC", &v)?;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.store.redis_url = v;
            self.store.backend = StoreBackend::Redis;
        }
        Ok(())
    }

    /// Validate the assembled configuration. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.gate.boot_secret.is_empty() {
            return Err(GateError::Config("boot_secret must not be empty".into()));
        }
        if self.gate.ready_ttl_sec == 0 {
            return Err(GateError::Config("ready_ttl_sec must be positive".into()));
        }
        if self.gate.window_sec == 0 {
            return Err(GateError::Config("window_sec must be positive".into()));
        }
        if self.gate.limit == 0 {
            return Err(GateError::Config("limit must be positive".into()));
        }
        if self.gate.ban_sec == 0 {
            return Err(GateError::Config("ban_sec must be positive".into()));
        }
        if self.store.timeout_ms == 0 {
            return Err(GateError::Config("store timeout must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| GateError::Config(format!("invalid value for {}: {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HoldgateConfig::default();
        assert_eq!(config.gate.ready_ttl_sec, 600);
        assert_eq!(config.gate.limit, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bypass_matching() {
        let gate = GateConfig::default();
        assert!(gate.is_bypass("/health"));
        assert!(gate.is_bypass("/signal/ready"));
        assert!(gate.is_bypass("/signal/other"));
        assert!(!gate.is_bypass("/api/sum"));
        assert!(!gate.is_bypass("/healthz"));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let yaml = r#"
gate:
  boot_secret: s3cret
  limit: 5
store:
  backend: redis
"#;
        let config: HoldgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gate.boot_secret, "s3cret");
        assert_eq!(config.gate.limit, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.gate.window_sec, 10);
        assert_eq!(config.store.backend, StoreBackend::Redis);
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let mut config = HoldgateConfig::default();
        config.gate.limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_secret() {
        let mut config = HoldgateConfig::default();
        config.gate.boot_secret = String::new();
        assert!(config.validate().is_err());
    }
}
