//! # Core Enumerations
//!
//! Type definitions shared across the drover-proxy system: the transport
//! schemes a proxy can speak, the anonymity classification assigned by the
//! checker, and the log verbosity accepted on the command line.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::definitions::enums::{AnonymityLevel, Scheme};
//! use std::str::FromStr;
//!
//! let scheme = Scheme::from_str("connect:80").unwrap();
//! assert_eq!(scheme, Scheme::Connect80);
//! assert_eq!(scheme.to_string(), "CONNECT:80");
//!
//! assert!(AnonymityLevel::High > AnonymityLevel::Anonymous);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// # Scheme
///
/// The transport protocol a proxy supports.
///
/// HTTP forwards plain requests; HTTPS is an HTTP proxy validated through
/// `CONNECT`; `CONNECT:80` and `CONNECT:25` distinguish proxies that only
/// tunnel to those ports; SOCKS4 and SOCKS5 carry arbitrary TCP streams.
///
/// ## Examples
///
/// ```
/// use drover_proxy::definitions::enums::Scheme;
/// use std::str::FromStr;
///
/// assert_eq!(Scheme::from_str("socks5").unwrap(), Scheme::Socks5);
/// assert_eq!(Scheme::Socks5.to_string(), "SOCKS5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scheme {
    /// Plain HTTP proxying of absolute-URI requests
    Http,

    /// HTTP proxy reached through a `CONNECT` tunnel (port 443 targets)
    Https,

    /// Proxy that tunnels `CONNECT` only to port 80
    Connect80,

    /// Proxy that tunnels `CONNECT` only to port 25
    Connect25,

    /// SOCKS4 protocol (TCP, IPv4 targets only)
    Socks4,

    /// SOCKS5 protocol (TCP, IPv4/IPv6 targets)
    Socks5,
}

impl Scheme {
    /// Number of scheme variants; sizes the per-scheme arrays on `Proxy`.
    pub const COUNT: usize = 6;

    /// All schemes in declaration order.
    pub const ALL: [Scheme; Scheme::COUNT] = [
        Scheme::Http,
        Scheme::Https,
        Scheme::Connect80,
        Scheme::Connect25,
        Scheme::Socks4,
        Scheme::Socks5,
    ];

    /// Scheme family tried by the server for HTTPS (`CONNECT`) client
    /// requests, in priority order.
    pub const HTTPS_FAMILY: [Scheme; 3] = [Scheme::Https, Scheme::Socks5, Scheme::Socks4];

    /// Scheme family tried by the server for plain HTTP client requests,
    /// in priority order.
    pub const HTTP_FAMILY: [Scheme; 4] = [
        Scheme::Http,
        Scheme::Connect80,
        Scheme::Socks5,
        Scheme::Socks4,
    ];

    /// Stable index of this scheme into per-scheme arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Scheme::Http => 0,
            Scheme::Https => 1,
            Scheme::Connect80 => 2,
            Scheme::Connect25 => 3,
            Scheme::Socks4 => 4,
            Scheme::Socks5 => 5,
        }
    }

    /// Whether validating this scheme ends with a judge probe through the
    /// proxied stream. Only plain HTTP is probed; the other schemes are
    /// validated by their handshake alone.
    #[must_use]
    pub fn probes_judge(self) -> bool {
        matches!(self, Scheme::Http)
    }

    /// Whether anonymity classification applies to this scheme. SOCKS and
    /// CONNECT tunnels never relay client-identifying headers, so their
    /// anonymity is inherent.
    #[must_use]
    pub fn classifies_anonymity(self) -> bool {
        matches!(self, Scheme::Http)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "HTTP"),
            Scheme::Https => write!(f, "HTTPS"),
            Scheme::Connect80 => write!(f, "CONNECT:80"),
            Scheme::Connect25 => write!(f, "CONNECT:25"),
            Scheme::Socks4 => write!(f, "SOCKS4"),
            Scheme::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "connect:80" | "connect80" => Ok(Scheme::Connect80),
            "connect:25" | "connect25" => Ok(Scheme::Connect25),
            "socks4" => Ok(Scheme::Socks4),
            "socks5" => Ok(Scheme::Socks5),
            _ => Err(format!("Unknown scheme: {s}")),
        }
    }
}

/// Represents the anonymity level assigned to an HTTP proxy.
///
/// Classification compares the IP a judge observed against this host's
/// external IP and scans the echoed request headers for proxy indicators.
///
/// # Variants
///
/// * `Transparent` - The proxy leaks the client's IP address.
/// * `Anonymous` - The proxy hides the client IP but advertises itself.
/// * `High` - Neither the client IP nor proxy usage is detectable.
///
/// # Examples
///
/// ```
/// use drover_proxy::definitions::enums::AnonymityLevel;
///
/// assert_eq!(AnonymityLevel::High.to_string(), "High");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnonymityLevel {
    /// Your real IP address is visible to the target (least anonymous)
    Transparent,

    /// Your real IP is hidden but the target knows a proxy is in use
    Anonymous,

    /// Neither your IP nor proxy usage is detectable (most anonymous)
    High,
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Transparent => write!(f, "Transparent"),
            AnonymityLevel::Anonymous => write!(f, "Anonymous"),
            AnonymityLevel::High => write!(f, "High"),
        }
    }
}

impl std::str::FromStr for AnonymityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transparent" => Ok(AnonymityLevel::Transparent),
            "anonymous" => Ok(AnonymityLevel::Anonymous),
            "high" | "elite" | "high anonymous" | "high_anonymous" => Ok(AnonymityLevel::High),
            _ => Err(format!("Unknown anonymity level: {s}")),
        }
    }
}

/// High > Anonymous > Transparent
impl Ord for AnonymityLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(level: AnonymityLevel) -> u8 {
            match level {
                AnonymityLevel::Transparent => 0,
                AnonymityLevel::Anonymous => 1,
                AnonymityLevel::High => 2,
            }
        }
        rank(*self).cmp(&rank(*other))
    }
}

impl PartialOrd for AnonymityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// # Log Level
///
/// Verbosity accepted by the `drover` binary and mapped onto the `log`
/// facade's filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
pub enum LogLevel {
    /// Critical errors that may cause application failure
    Error,
    /// Issues that should be addressed but don't prevent operation
    Warn,
    /// General operational messages about system state
    #[default]
    Info,
    /// Detailed information for debugging purposes
    Debug,
    /// Extremely verbose information for tracing execution
    Trace,
}

impl LogLevel {
    /// The `log` crate filter equivalent of this level.
    #[must_use]
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Trace => write!(f, "TRACE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn scheme_round_trips_through_display() {
        for scheme in Scheme::ALL {
            let parsed = Scheme::from_str(&scheme.to_string()).unwrap();
            assert_eq!(parsed, scheme);
        }
    }

    #[test]
    fn scheme_indices_are_distinct() {
        let mut seen = [false; Scheme::COUNT];
        for scheme in Scheme::ALL {
            assert!(!seen[scheme.index()]);
            seen[scheme.index()] = true;
        }
    }

    #[test]
    fn anonymity_orders_high_first() {
        assert!(AnonymityLevel::High > AnonymityLevel::Anonymous);
        assert!(AnonymityLevel::Anonymous > AnonymityLevel::Transparent);
    }

    #[test]
    fn anonymity_parses_legacy_elite() {
        assert_eq!(
            AnonymityLevel::from_str("elite").unwrap(),
            AnonymityLevel::High
        );
    }
}
