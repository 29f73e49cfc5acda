//! # Configuration Schema
//!
//! The structure of the application's TOML configuration: one section per
//! subsystem, each with defaults matching `definitions::defaults`.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::config::schema::AppConfig;
//!
//! let config = AppConfig::default();
//! assert_eq!(config.application.log_level, "info");
//! assert_eq!(config.pool.min_req_proxy, 5);
//! ```

use crate::definitions::defaults;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Application-wide settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Direct HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Checker settings
    #[serde(default)]
    pub checker: CheckerSection,

    /// Proxy pool thresholds
    #[serde(default)]
    pub pool: PoolSection,

    /// Rotating server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Broker pacing
    #[serde(default)]
    pub broker: BrokerSection,
}

/// Application-wide configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Direct HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds for providers and judges
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: defaults::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSection {
    /// Proxies validated in parallel
    pub max_conn: usize,

    /// Attempts per (proxy, scheme)
    pub max_tries: u32,

    /// Deadline in seconds per network step
    pub timeout_secs: u64,
}

impl Default for CheckerSection {
    fn default() -> Self {
        Self {
            max_conn: defaults::DEFAULT_MAX_CONN,
            max_tries: defaults::DEFAULT_MAX_TRIES,
            timeout_secs: defaults::DEFAULT_NETWORK_TIMEOUT_SECS,
        }
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    /// Requests before a proxy is health-ranked
    pub min_req_proxy: u32,

    /// Error-rate ceiling before permanent discard
    pub max_error_rate: f64,

    /// Average response time ceiling in seconds
    pub max_resp_time_secs: f64,

    /// Bounded wait in seconds before `get` gives up
    pub wait_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            min_req_proxy: defaults::pool::MIN_REQ_PROXY,
            max_error_rate: defaults::pool::MAX_ERROR_RATE,
            max_resp_time_secs: defaults::pool::MAX_RESP_TIME_SECS,
            wait_secs: defaults::pool::WAIT_SECS,
        }
    }
}

/// Rotating server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Proxy swaps before the first byte reaches the client
    pub max_tries: u32,

    /// History cache TTL in seconds
    pub history_ttl_secs: u64,

    /// History cache capacity
    pub history_max_entries: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            max_tries: defaults::server::MAX_TRIES,
            history_ttl_secs: defaults::server::HISTORY_TTL_SECS,
            history_max_entries: defaults::server::HISTORY_MAX_ENTRIES,
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Providers fetched simultaneously
    pub max_concurrent_providers: usize,

    /// Idle seconds between refill cycles in serve mode
    pub grab_pause_secs: u64,

    /// Pool size below which serve refills
    pub min_queue: usize,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            max_concurrent_providers: defaults::broker::MAX_CONCURRENT_PROVIDERS,
            grab_pause_secs: defaults::broker::GRAB_PAUSE_SECS,
            min_queue: defaults::broker::MIN_QUEUE,
        }
    }
}

impl AppConfig {
    /// Lowers this configuration into the broker's runtime settings.
    #[must_use]
    pub fn to_broker_config(&self) -> crate::orchestration::broker::BrokerConfig {
        use std::time::Duration;

        crate::orchestration::broker::BrokerConfig {
            max_concurrent_providers: self.broker.max_concurrent_providers,
            max_conn: self.checker.max_conn,
            grab_pause: Duration::from_secs(self.broker.grab_pause_secs),
            cancel_window: Duration::from_secs(defaults::broker::CANCEL_WINDOW_SECS),
            checker: crate::orchestration::checker::CheckerConfig {
                timeout: Duration::from_secs(self.checker.timeout_secs),
                max_tries: self.checker.max_tries,
            },
            pool: crate::orchestration::pool::PoolConfig {
                min_req_proxy: self.pool.min_req_proxy,
                max_error_rate: self.pool.max_error_rate,
                max_resp_time: self.pool.max_resp_time_secs,
                wait: Duration::from_secs(self.pool.wait_secs),
            },
            server: crate::orchestration::server::ServerConfig {
                max_tries: self.server.max_tries,
                timeout: Duration::from_secs(self.checker.timeout_secs),
                history_ttl: Duration::from_secs(self.server.history_ttl_secs),
                history_max_entries: self.server.history_max_entries,
            },
        }
    }
}
