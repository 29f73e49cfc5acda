//! # Proxy Module
//!
//! The `Proxy` struct is the central entity of the system: one candidate
//! proxy server with its resolved address, the transport schemes the
//! checker has validated, running health metrics, and the transient byte
//! stream held while the proxy is in use.
//!
//! ## Overview
//!
//! A proxy is created once a scraped `(host, port)` candidate passes
//! deduplication and DNS resolution. The checker mutates its scheme map
//! and runtimes; the server appends runtimes and errors while forwarding
//! client traffic. A proxy is discarded when its error rate crosses the
//! pool ceiling or on explicit removal.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::definitions::enums::{AnonymityLevel, Scheme};
//! use drover_proxy::definitions::proxy::Proxy;
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let mut proxy = Proxy::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 8080);
//! proxy.types.insert(Scheme::Http, Some(AnonymityLevel::High));
//!
//! assert!(proxy.supports(Scheme::Http));
//! assert_eq!(proxy.to_string(), "HTTP://1.2.3.4:8080");
//! ```

use crate::definitions::{
    defaults,
    enums::{AnonymityLevel, Scheme},
    errors::{UtilError, UtilResult},
};
use crate::utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Membership and anonymity for the fixed set of schemes.
///
/// The semantic set is small and closed, so membership is a bitset with a
/// parallel array of anonymity levels. `None` for a member scheme means
/// anonymity is inherent to the transport (SOCKS and CONNECT tunnels) and
/// is rendered as `—`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeMap {
    supported: u8,
    levels: [Option<AnonymityLevel>; Scheme::COUNT],
}

impl SchemeMap {
    /// An empty map; the proxy is not yet validated for anything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `scheme` as supported with the given anonymity level.
    pub fn insert(&mut self, scheme: Scheme, level: Option<AnonymityLevel>) {
        self.supported |= 1 << scheme.index();
        self.levels[scheme.index()] = level;
    }

    /// Whether `scheme` has been validated.
    #[must_use]
    pub fn contains(&self, scheme: Scheme) -> bool {
        self.supported & (1 << scheme.index()) != 0
    }

    /// Anonymity recorded for `scheme`; `None` when the scheme is not
    /// supported or anonymity is inherent.
    #[must_use]
    pub fn level(&self, scheme: Scheme) -> Option<AnonymityLevel> {
        if self.contains(scheme) {
            self.levels[scheme.index()]
        } else {
            None
        }
    }

    /// Supported schemes in declaration order.
    #[must_use]
    pub fn schemes(&self) -> Vec<Scheme> {
        Scheme::ALL
            .into_iter()
            .filter(|s| self.contains(*s))
            .collect()
    }

    /// True when no scheme has been validated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.supported == 0
    }
}

/// One diagnostic event in a proxy's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Scheme the event relates to
    pub scheme: Scheme,
    /// Short event description ("handshake ok", "judge timeout", ...)
    pub event: String,
    /// Duration of the operation in seconds
    pub duration: f64,
}

/// A candidate proxy server with validated schemes and health metrics.
///
/// Identity is the resolved `(host, port)` pair. The scheme map is set
/// only by the checker; once it is non-empty the proxy counts as working
/// for the enumerated schemes. `avg_resp_time` is always derived from the
/// bounded runtime window, never stored.
///
/// Exactly one byte stream may be open at a time; attaching a new stream
/// drops (and thereby closes) any prior one.
#[derive(Debug, Serialize, Deserialize)]
pub struct Proxy {
    /// Resolved IP address of the proxy server
    pub host: IpAddr,

    /// Port the proxy listens on
    pub port: u16,

    /// Validated schemes with their anonymity levels; set by the checker
    pub types: SchemeMap,

    /// Candidate country reported by the injected geo lookup, if any
    pub country: Option<String>,

    /// When the proxy entered the system
    pub added_at: DateTime<Utc>,

    /// When the proxy last completed a successful operation
    pub last_seen_at: Option<DateTime<Utc>>,

    n_req: u32,
    n_err: u32,
    scheme_errors: [u32; Scheme::COUNT],
    runtimes: VecDeque<f64>,
    log: VecDeque<LogEntry>,

    /// Open duplex stream while the proxy is in use
    #[serde(skip)]
    stream: Option<TcpStream>,
}

impl Proxy {
    /// Creates a proxy with zeroed statistics and an empty scheme map.
    #[must_use]
    pub fn new(host: IpAddr, port: u16) -> Self {
        Proxy {
            host,
            port,
            types: SchemeMap::new(),
            country: None,
            added_at: Utc::now(),
            last_seen_at: None,
            n_req: 0,
            n_err: 0,
            scheme_errors: [0; Scheme::COUNT],
            runtimes: VecDeque::with_capacity(defaults::RUNTIME_WINDOW),
            log: VecDeque::new(),
            stream: None,
        }
    }

    /// The socket address of this proxy.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the checker validated `scheme` for this proxy.
    #[must_use]
    pub fn supports(&self, scheme: Scheme) -> bool {
        self.types.contains(scheme)
    }

    /// Total validation/use attempts.
    #[must_use]
    pub fn n_req(&self) -> u32 {
        self.n_req
    }

    /// Total failed attempts across all schemes.
    #[must_use]
    pub fn n_err(&self) -> u32 {
        self.n_err
    }

    /// Failed attempts recorded against one scheme.
    #[must_use]
    pub fn scheme_errors(&self, scheme: Scheme) -> u32 {
        self.scheme_errors[scheme.index()]
    }

    /// Mean of the retained runtimes; positive infinity until the first
    /// measurement so unmeasured proxies sort last in the pool.
    #[must_use]
    pub fn avg_resp_time(&self) -> f64 {
        if self.runtimes.is_empty() {
            return f64::INFINITY;
        }
        self.runtimes.iter().sum::<f64>() / self.runtimes.len() as f64
    }

    /// `n_err / max(n_req, 1)`
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        f64::from(self.n_err) / f64::from(self.n_req.max(1))
    }

    /// Records a successful operation: bumps the request counter, retains
    /// the runtime, and stamps `last_seen_at`.
    pub fn record_success(&mut self, scheme: Scheme, runtime: Duration) {
        self.n_req += 1;
        self.push_runtime(runtime.as_secs_f64());
        self.last_seen_at = Some(Utc::now());
        self.log_event(scheme, "ok", runtime);
    }

    /// Records a failed operation against `scheme`.
    pub fn record_failure(&mut self, scheme: Scheme, event: &str, runtime: Duration) {
        self.n_req += 1;
        self.n_err += 1;
        self.scheme_errors[scheme.index()] += 1;
        self.log_event(scheme, event, runtime);
    }

    fn push_runtime(&mut self, secs: f64) {
        if self.runtimes.len() == defaults::RUNTIME_WINDOW {
            self.runtimes.pop_front();
        }
        self.runtimes.push_back(secs);
    }

    /// Appends a diagnostic event, evicting the oldest past the cap.
    pub fn log_event(&mut self, scheme: Scheme, event: &str, duration: Duration) {
        if self.log.len() == defaults::PROXY_LOG_CAP {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            scheme,
            event: event.to_string(),
            duration: duration.as_secs_f64(),
        });
    }

    /// The retained diagnostic events, oldest first.
    #[must_use]
    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    /// Attaches an open stream, dropping (closing) any prior one.
    pub fn attach_stream(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
    }

    /// Takes ownership of the open stream, if any.
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.take()
    }

    /// Drops the open stream, closing the connection.
    pub fn close_stream(&mut self) {
        self.stream = None;
    }

    /// Parses the text form produced by `Display`:
    /// `[SCHEME,...]://host:port` or bare `host:port`.
    ///
    /// # Errors
    ///
    /// Returns a `UtilError` when the address, port, or scheme list is
    /// malformed.
    pub fn from_text(text: &str) -> UtilResult<Self> {
        let (schemes, addr) = match text.split_once("://") {
            Some((prefix, rest)) => (Some(prefix), rest),
            None => (None, text),
        };

        let (host, port) = utils::split_host_port(addr)?;
        let host: IpAddr = host
            .parse()
            .map_err(|_| UtilError::InvalidIpAddress(host.clone()))?;

        let mut proxy = Proxy::new(host, port);
        if let Some(schemes) = schemes {
            for name in schemes.split(',').filter(|s| !s.is_empty()) {
                let scheme = Scheme::from_str(name).map_err(UtilError::InvalidScheme)?;
                proxy.types.insert(scheme, None);
            }
        }
        Ok(proxy)
    }

    /// Serializes the proxy to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserializes a proxy from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid `Proxy` document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Clone for Proxy {
    /// The transient stream is single-owner and never cloned.
    fn clone(&self) -> Self {
        Proxy {
            host: self.host,
            port: self.port,
            types: self.types.clone(),
            country: self.country.clone(),
            added_at: self.added_at,
            last_seen_at: self.last_seen_at,
            n_req: self.n_req,
            n_err: self.n_err,
            scheme_errors: self.scheme_errors,
            runtimes: self.runtimes.clone(),
            log: self.log.clone(),
            stream: None,
        }
    }
}

impl PartialEq for Proxy {
    /// Equality is identity plus validated schemes; transient state and
    /// metrics do not participate.
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.types == other.types
    }
}

impl Eq for Proxy {}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemes = self.types.schemes();
        if !schemes.is_empty() {
            let names: Vec<String> = schemes.iter().map(ToString::to_string).collect();
            write!(f, "{}://", names.join(","))?;
        }
        // SocketAddr brackets IPv6 hosts, keeping the text form parseable.
        write!(f, "{}", self.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn proxy() -> Proxy {
        Proxy::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 8080)
    }

    #[test]
    fn avg_resp_time_is_infinite_until_measured() {
        let mut p = proxy();
        assert!(p.avg_resp_time().is_infinite());

        p.record_success(Scheme::Http, Duration::from_millis(500));
        p.record_success(Scheme::Http, Duration::from_millis(1500));
        let avg = p.avg_resp_time();
        assert!((avg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn runtime_window_is_bounded() {
        let mut p = proxy();
        for _ in 0..defaults::RUNTIME_WINDOW * 2 {
            p.record_success(Scheme::Http, Duration::from_secs(1));
        }
        assert_eq!(p.runtimes.len(), defaults::RUNTIME_WINDOW);
    }

    #[test]
    fn error_rate_counts_failures() {
        let mut p = proxy();
        p.record_success(Scheme::Http, Duration::from_secs(1));
        p.record_failure(Scheme::Http, "connect refused", Duration::ZERO);
        assert!((p.error_rate() - 0.5).abs() < 1e-9);
        assert_eq!(p.scheme_errors(Scheme::Http), 1);
    }

    #[test]
    fn text_round_trip_preserves_identity_and_schemes() {
        let mut p = proxy();
        p.types.insert(Scheme::Socks5, None);
        p.types.insert(Scheme::Http, Some(AnonymityLevel::Anonymous));

        let text = p.to_string();
        let back = Proxy::from_text(&text).unwrap();
        assert_eq!(back.host, p.host);
        assert_eq!(back.port, p.port);
        assert_eq!(back.types.schemes(), p.types.schemes());
    }

    #[test]
    fn json_round_trip_preserves_identity_and_schemes() {
        let mut p = proxy();
        p.types.insert(Scheme::Connect80, None);
        p.record_success(Scheme::Connect80, Duration::from_millis(250));

        let json = p.to_json().unwrap();
        let back = Proxy::from_json(&json).unwrap();
        assert_eq!(back.host, p.host);
        assert_eq!(back.port, p.port);
        assert_eq!(back.types.schemes(), p.types.schemes());
        assert_eq!(back.n_req(), 1);
    }

    #[test]
    fn bare_host_port_parses_without_schemes() {
        let p = Proxy::from_text("5.6.7.8:3128").unwrap();
        assert_eq!(p.port, 3128);
        assert!(p.types.is_empty());
    }

    #[test]
    fn ipv6_hosts_round_trip_bracketed() {
        let mut p = Proxy::new("2001:db8::7".parse().unwrap(), 1080);
        p.types.insert(Scheme::Socks5, None);
        let text = p.to_string();
        assert_eq!(text, "SOCKS5://[2001:db8::7]:1080");
        let back = Proxy::from_text(&text).unwrap();
        assert_eq!(back.host, p.host);
        assert_eq!(back.port, p.port);
    }
}
