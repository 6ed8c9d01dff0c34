//! Node configuration from environment variables or a TOML file.
//!
//! Invalid numeric values fall back to defaults without crashing; values
//! that must be positive are floored at 1. Allow-list entries are only
//! checked by [`NodeConfig::validate`], since a bad one must stop startup.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `NODE_RPC_WORKQUEUE` | 16 | Max pending HTTP requests |
//! | `NODE_RPC_THREADS` | 4 | HTTP worker threads |
//! | `NODE_RPC_SERVER_TIMEOUT` | 30 | Per-request timeout (secs) |
//! | `NODE_RPC_ALLOW_IP` | (empty) | Comma-separated extra allowed subnets |
//! | `NODE_RPC_EVENT_LOOP_GRACE_MS` | 2000 | I/O loop exit grace period (ms) |
//! | `NODE_SCHEDULER_THREADS` | 1 | Scheduler servicing threads |
//! | `NODE_SCHEDULER_DRAIN` | false | Run pending jobs on stop |
//! | `NODE_SHUTDOWN_TIMEOUT` | 30 | In-flight request drain timeout (secs) |
//! | `NODE_LOG_FORMAT` | json | `json` or `pretty` |
//! | `NODE_LOG_LEVEL` | info | Log filter directive |
//! | `NODE_LOG_FILE` | (stderr) | Log file path |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{HttpConfig, Subnet};
use crate::scheduler::SchedulerConfig;
use crate::telemetry::{LogConfig, LogFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid -rpcallowip subnet specification: {0}")]
    InvalidSubnet(String),
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub http: HttpConfig,
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
    /// How long shutdown waits for in-flight replies.
    pub shutdown_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub work_queue_depth: usize,
    pub worker_threads: usize,
    pub server_timeout_secs: u64,
    pub max_headers_size: usize,
    pub max_body_size: usize,
    pub allow_ip: Vec<String>,
    pub event_loop_grace_ms: u64,
    pub thread_name_prefix: String,
    pub scheduler_threads: usize,
    pub scheduler_drain_on_stop: bool,
    pub shutdown_timeout_secs: u64,
    pub log_format: LogFormat,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|val| {
            val.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn load_http_config() -> HttpConfig {
    let defaults = HttpConfig::default();
    HttpConfig {
        work_queue_depth: parse_usize("NODE_RPC_WORKQUEUE", defaults.work_queue_depth),
        worker_threads: parse_usize("NODE_RPC_THREADS", defaults.worker_threads),
        server_timeout_secs: parse_u64("NODE_RPC_SERVER_TIMEOUT", defaults.server_timeout_secs),
        allow_ip: parse_list("NODE_RPC_ALLOW_IP"),
        event_loop_grace_ms: parse_u64("NODE_RPC_EVENT_LOOP_GRACE_MS", defaults.event_loop_grace_ms),
        ..defaults
    }
}

fn load_scheduler_config() -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    SchedulerConfig {
        service_threads: parse_usize("NODE_SCHEDULER_THREADS", defaults.service_threads),
        drain_on_stop: parse_bool("NODE_SCHEDULER_DRAIN", defaults.drain_on_stop),
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: std::env::var("NODE_LOG_FORMAT")
            .ok()
            .and_then(|val| LogFormat::parse(&val))
            .unwrap_or(defaults.format),
        level: std::env::var("NODE_LOG_LEVEL").unwrap_or(defaults.level),
        output_path: std::env::var_os("NODE_LOG_FILE").map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> NodeConfig {
    let mut config = NodeConfig {
        http: load_http_config(),
        scheduler: load_scheduler_config(),
        log: load_log_config(),
        shutdown_timeout_secs: parse_u64("NODE_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS),
    };
    config.apply_floors();
    config
}

impl NodeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(source)?;
        config.apply_floors();
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    fn apply_floors(&mut self) {
        self.http.apply_floors();
        self.scheduler.service_threads = self.scheduler.service_threads.max(1);
        if self.shutdown_timeout_secs == 0 {
            self.shutdown_timeout_secs = DEFAULT_SHUTDOWN_TIMEOUT_SECS;
        }
    }

    /// Reject configurations the node must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.http.allow_ip {
            entry
                .parse::<Subnet>()
                .map_err(|_| ConfigError::InvalidSubnet(entry.clone()))?;
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Return a serializable summary of all effective values.
    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig {
            work_queue_depth: self.http.work_queue_depth,
            worker_threads: self.http.worker_threads,
            server_timeout_secs: self.http.server_timeout_secs,
            max_headers_size: self.http.max_headers_size,
            max_body_size: self.http.max_body_size,
            allow_ip: self.http.allow_ip.clone(),
            event_loop_grace_ms: self.http.event_loop_grace_ms,
            thread_name_prefix: self.http.thread_name_prefix.clone(),
            scheduler_threads: self.scheduler.service_threads,
            scheduler_drain_on_stop: self.scheduler.drain_on_stop,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            log_format: self.log.format,
            log_level: self.log.level.clone(),
            log_file: self.log.output_path.clone(),
        }
    }
}
