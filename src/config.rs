//! Gateway configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! except `GATEWAY_CONFIG` for the file path and `DATABASE_URL`/`LOG_LEVEL`/
//! `BIND_ADDR`, which `main` reads directly. Every tunable named in
//! spec.md §6's Configuration table has a default here, so an empty (or
//! missing) config file is enough to start the gateway.
//!
//! Default config path: `/etc/fleet-gateway/gateway.toml`.

use serde::Deserialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Empty means unrestricted (spec.md §4.A).
    pub homebase_allowed_ips: Vec<String>,
    pub subscribe_every_default: u32,
    pub browser_port: u16,
    pub link: LinkConfig,
    pub prober: ProberConfig,
    /// `"log"` or `"postgres"` (spec.md SPEC_FULL.md Open Question 2).
    pub status_writer: String,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub stale_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_default_timeout_ms: u64,
    pub max_in_flight: usize,
    pub max_queue: usize,
    pub fast_retry_window_ms: u64,
    pub fast_retry_base_ms: u64,
    pub fast_retry_jitter_ms: u64,
    pub slow_base_backoff_ms: u64,
    pub slow_max_backoff_ms: u64,
    pub slow_jitter_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_window: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
            stale_ms: 30_000,
            connect_timeout_ms: 8_000,
            request_default_timeout_ms: 10_000,
            max_in_flight: 8,
            max_queue: 200,
            fast_retry_window_ms: 300_000,
            fast_retry_base_ms: 2_000,
            fast_retry_jitter_ms: 1_000,
            slow_base_backoff_ms: 15_000,
            slow_max_backoff_ms: 120_000,
            slow_jitter_ms: 2_000,
        }
    }
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 10_000,
            probe_timeout_ms: 500,
            probe_window: 100,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            homebase_allowed_ips: Vec::new(),
            subscribe_every_default: 1,
            browser_port: 8080,
            link: LinkConfig::default(),
            prober: ProberConfig::default(),
            status_writer: "log".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all fields optional; defaults fill gaps)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    homebase_allowed_ips: Option<Vec<String>>,
    subscribe_every_default: Option<u32>,
    browser_port: Option<u16>,
    status_writer: Option<String>,
    link: Option<RawLinkConfig>,
    prober: Option<RawProberConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawLinkConfig {
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
    stale_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    request_default_timeout_ms: Option<u64>,
    max_in_flight: Option<usize>,
    max_queue: Option<usize>,
    fast_retry_window_ms: Option<u64>,
    fast_retry_base_ms: Option<u64>,
    fast_retry_jitter_ms: Option<u64>,
    slow_base_backoff_ms: Option<u64>,
    slow_max_backoff_ms: Option<u64>,
    slow_jitter_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProberConfig {
    probe_interval_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    probe_window: Option<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load gateway config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    if !path.exists() {
        return Ok(GatewayConfig::default());
    }
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from the default path, or `GATEWAY_CONFIG` if set.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = std::env::var("GATEWAY_CONFIG")
        .unwrap_or_else(|_| "/etc/fleet-gateway/gateway.toml".to_owned());
    load_config_from_path(Path::new(&path))
}

/// Load gateway config from a TOML string, filling in defaults for
/// anything unset and validating the values that have one.
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let link = match raw.link {
        Some(l) => LinkConfig {
            heartbeat_interval_ms: l.heartbeat_interval_ms.unwrap_or(10_000),
            heartbeat_timeout_ms: l.heartbeat_timeout_ms.unwrap_or(5_000),
            stale_ms: l.stale_ms.unwrap_or(30_000),
            connect_timeout_ms: l.connect_timeout_ms.unwrap_or(8_000),
            request_default_timeout_ms: l.request_default_timeout_ms.unwrap_or(10_000),
            max_in_flight: l.max_in_flight.unwrap_or(8),
            max_queue: l.max_queue.unwrap_or(200),
            fast_retry_window_ms: l.fast_retry_window_ms.unwrap_or(300_000),
            fast_retry_base_ms: l.fast_retry_base_ms.unwrap_or(2_000),
            fast_retry_jitter_ms: l.fast_retry_jitter_ms.unwrap_or(1_000),
            slow_base_backoff_ms: l.slow_base_backoff_ms.unwrap_or(15_000),
            slow_max_backoff_ms: l.slow_max_backoff_ms.unwrap_or(120_000),
            slow_jitter_ms: l.slow_jitter_ms.unwrap_or(2_000),
        },
        None => LinkConfig::default(),
    };

    let prober = match raw.prober {
        Some(p) => ProberConfig {
            probe_interval_ms: p.probe_interval_ms.unwrap_or(10_000),
            probe_timeout_ms: p.probe_timeout_ms.unwrap_or(500),
            probe_window: p.probe_window.unwrap_or(100),
        },
        None => ProberConfig::default(),
    };

    let status_writer = raw.status_writer.unwrap_or_else(|| "log".to_owned());
    if status_writer != "log" && status_writer != "postgres" {
        return Err(ConfigError::InvalidValue(format!(
            "status_writer must be \"log\" or \"postgres\", got \"{}\"",
            status_writer
        )));
    }

    Ok(GatewayConfig {
        homebase_allowed_ips: raw.homebase_allowed_ips.unwrap_or_default(),
        subscribe_every_default: raw.subscribe_every_default.unwrap_or(1),
        browser_port: raw.browser_port.unwrap_or(8080),
        link,
        prober,
        status_writer,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "Parse error: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_absent() {
        let cfg = load_config_from_path(Path::new("/nonexistent/path.toml")).unwrap();
        assert_eq!(cfg.browser_port, 8080);
        assert_eq!(cfg.link.max_in_flight, 8);
    }

    #[test]
    fn parses_partial_overrides() {
        let toml_str = r#"
            browser_port = 9090
            [link]
            max_in_flight = 4
        "#;
        let cfg = load_config_from_str(toml_str).unwrap();
        assert_eq!(cfg.browser_port, 9090);
        assert_eq!(cfg.link.max_in_flight, 4);
        assert_eq!(cfg.link.max_queue, 200, "unset fields keep their default");
    }

    #[test]
    fn rejects_unknown_status_writer() {
        let toml_str = r#"status_writer = "carrier-pigeon""#;
        assert!(load_config_from_str(toml_str).is_err());
    }

    #[test]
    fn empty_allow_list_means_unrestricted() {
        let cfg = load_config_from_str("").unwrap();
        assert!(cfg.homebase_allowed_ips.is_empty());
    }
}
