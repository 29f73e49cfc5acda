//! # Resolver Module
//!
//! Hostname resolution for scraped candidates, plus the one-shot
//! external-IP lookup the anonymity classifier depends on.
//!
//! ## Overview
//!
//! Providers emit hosts that are usually IPv4 literals but occasionally
//! hostnames. Literals are classified without touching DNS; everything
//! else goes through async DNS with a TTL cache so repeated candidates
//! from overlapping providers resolve once.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::io::resolver::Resolver;
//!
//! assert!(Resolver::host_is_ip("203.0.113.7"));
//! assert!(Resolver::host_is_ip("2001:db8::1"));
//! assert!(!Resolver::host_is_ip("proxy.example.com"));
//! ```

use crate::definitions::{
    defaults,
    errors::{ResolveError, ResolveResult},
};
use crate::io::http::Requestor;
use crate::utils;
use ahash::AHashMap;
use rand::prelude::*;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    ip: IpAddr,
    resolved_at: Instant,
}

/// Async DNS resolver with a TTL cache.
pub struct Resolver {
    cache: Mutex<AHashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Creates a resolver with the default cache TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(defaults::DEFAULT_DNS_TTL_SECS))
    }

    /// Creates a resolver with a custom cache TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Resolver {
            cache: Mutex::new(AHashMap::new()),
            ttl,
        }
    }

    /// Whether `host` is an IPv4 or IPv6 literal.
    #[must_use]
    pub fn host_is_ip(host: &str) -> bool {
        utils::is_valid_ip(host)
    }

    /// Resolves `host` to a single IP address.
    ///
    /// IP literals are parsed without DNS. Hostnames are resolved via the
    /// system resolver; the first returned address wins and is cached for
    /// the TTL.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError` when DNS fails or yields no records.
    /// Callers drop the candidate and continue.
    pub async fn resolve(&self, host: &str) -> ResolveResult<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        if let Some(ip) = self.cached(host) {
            return Ok(ip);
        }

        let mut addrs = tokio::net::lookup_host((host, 0u16))
            .await
            .map_err(|_| ResolveError::DnsFailure(host.to_string()))?;

        let ip = addrs
            .next()
            .map(|sockaddr| sockaddr.ip())
            .ok_or_else(|| ResolveError::NoRecords(host.to_string()))?;

        self.cache
            .lock()
            .expect("resolver cache lock poisoned")
            .insert(
                host.to_string(),
                CacheEntry {
                    ip,
                    resolved_at: Instant::now(),
                },
            );
        Ok(ip)
    }

    fn cached(&self, host: &str) -> Option<IpAddr> {
        let mut cache = self.cache.lock().expect("resolver cache lock poisoned");
        match cache.get(host) {
            Some(entry) if entry.resolved_at.elapsed() < self.ttl => Some(entry.ip),
            Some(_) => {
                cache.remove(host);
                None
            }
            None => None,
        }
    }

    /// Number of cached hostnames, expired entries included.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("resolver cache lock poisoned").len()
    }

    /// Determines the public IP of the host running this system.
    ///
    /// Queries a small rotating set of what's-my-IP endpoints and returns
    /// the first parseable answer. Called once at checker startup; the
    /// result is the baseline for anonymity classification.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::ExternalIpUnavailable` when every endpoint
    /// fails. This is fatal for the checker.
    pub async fn external_ip(requestor: &Requestor) -> ResolveResult<IpAddr> {
        let mut urls: Vec<&str> = defaults::EXTERNAL_IP_URLS.to_vec();
        urls.shuffle(&mut rand::rng());

        for url in urls {
            match requestor.get(url, utils::random_user_agent()).await {
                Ok(body) => {
                    if let Ok(ip) = body.trim().parse::<IpAddr>() {
                        log::info!("external IP {ip} (via {url})");
                        return Ok(ip);
                    }
                    log::debug!("{url}: unparseable external IP body");
                }
                Err(err) => log::debug!("{url}: {err}"),
            }
        }
        Err(ResolveError::ExternalIpUnavailable)
    }
}
