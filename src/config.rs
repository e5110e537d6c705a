//! Runtime configuration (A1) and its CLI surface (A2).
//!
//! `GatewayConfig` is loaded once at startup from a TOML file, with
//! `GATEHOUSE_*` environment variables overriding individual fields, and
//! then swapped under an [`arc_swap::ArcSwap`] so a SIGHUP reload can
//! publish a new snapshot without disturbing requests already in flight —
//! each request captures its own `Arc<GatewayConfig>` at `init` and runs
//! against that snapshot to completion.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// On-disk shape: every field optional, so a file only needs to mention
/// what it overrides. [`GatewayConfig::load`] fills the rest from
/// [`GatewayConfig::default`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct RawConfig {
    bind_addr: Option<SocketAddr>,
    thread_pool_size: Option<usize>,
    op_thread_timeout_secs: Option<u64>,
    op_thread_suicide_timeout_secs: Option<u64>,
    init_timeout_secs: Option<u64>,
    max_put_size: Option<u64>,
    max_chunk_size: Option<usize>,
    max_keys_default: Option<usize>,
    multipart_min_part_size: Option<u64>,
    debug_rgw: Option<u8>,
}

/// Resolved, fully-populated runtime configuration. Mirrors the
/// `rgw_thread_pool_size`-style knobs of the system this core's operation
/// pipeline descends from, renamed to this crate's own vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub thread_pool_size: usize,
    pub op_thread_timeout: Duration,
    pub op_thread_suicide_timeout: Duration,
    pub init_timeout: Duration,
    pub max_put_size: u64,
    pub max_chunk_size: usize,
    pub max_keys_default: usize,
    pub multipart_min_part_size: u64,
    /// 0-20, maps onto the tracing level filter; higher is more verbose.
    pub debug_rgw: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7480".parse().unwrap(),
            thread_pool_size: 100,
            op_thread_timeout: Duration::from_secs(60),
            op_thread_suicide_timeout: Duration::from_secs(600),
            init_timeout: Duration::from_secs(30),
            max_put_size: 5 * 1024 * 1024 * 1024,
            max_chunk_size: 4 * 1024 * 1024,
            max_keys_default: 1000,
            multipart_min_part_size: 5 * 1024 * 1024,
            debug_rgw: 1,
        }
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl GatewayConfig {
    /// Reads `path` as TOML, falling back to defaults for absent fields,
    /// then applies `GATEHOUSE_*` environment overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str::<RawConfig>(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => RawConfig::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self::from_raw(raw).apply_env_overrides())
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: raw.bind_addr.unwrap_or(defaults.bind_addr),
            thread_pool_size: raw.thread_pool_size.unwrap_or(defaults.thread_pool_size),
            op_thread_timeout: raw
                .op_thread_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.op_thread_timeout),
            op_thread_suicide_timeout: raw
                .op_thread_suicide_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.op_thread_suicide_timeout),
            init_timeout: raw
                .init_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.init_timeout),
            max_put_size: raw.max_put_size.unwrap_or(defaults.max_put_size),
            max_chunk_size: raw.max_chunk_size.unwrap_or(defaults.max_chunk_size),
            max_keys_default: raw.max_keys_default.unwrap_or(defaults.max_keys_default),
            multipart_min_part_size: raw
                .multipart_min_part_size
                .unwrap_or(defaults.multipart_min_part_size),
            debug_rgw: raw.debug_rgw.unwrap_or(defaults.debug_rgw),
        }
    }

    fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_override::<SocketAddr>("GATEHOUSE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env_override::<usize>("GATEHOUSE_THREAD_POOL_SIZE") {
            self.thread_pool_size = v;
        }
        if let Some(v) = env_override::<u64>("GATEHOUSE_MAX_PUT_SIZE") {
            self.max_put_size = v;
        }
        if let Some(v) = env_override::<usize>("GATEHOUSE_MAX_KEYS_DEFAULT") {
            self.max_keys_default = v;
        }
        if let Some(v) = env_override::<u8>("GATEHOUSE_DEBUG_RGW") {
            self.debug_rgw = v;
        }
        self
    }

    /// Maps `debug_rgw` onto a `tracing` level filter, per the CLI/config
    /// contract: 0 is errors-only, 20+ is full trace.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.debug_rgw {
            0 => tracing::Level::ERROR,
            1..=3 => tracing::Level::WARN,
            4..=9 => tracing::Level::INFO,
            10..=15 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = GatewayConfig::load(Path::new("/nonexistent/gatehouse.toml")).unwrap();
        assert_eq!(cfg.thread_pool_size, 100);
        assert_eq!(cfg.max_keys_default, 1000);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_from_defaults() {
        let raw: RawConfig = toml::from_str("thread_pool_size = 42\n").unwrap();
        let cfg = GatewayConfig::from_raw(raw);
        assert_eq!(cfg.thread_pool_size, 42);
        assert_eq!(cfg.max_put_size, GatewayConfig::default().max_put_size);
    }

    #[test]
    fn debug_rgw_maps_to_expected_tracing_levels() {
        let mut cfg = GatewayConfig::default();
        cfg.debug_rgw = 0;
        assert_eq!(cfg.tracing_level(), tracing::Level::ERROR);
        cfg.debug_rgw = 20;
        assert_eq!(cfg.tracing_level(), tracing::Level::TRACE);
    }
}
