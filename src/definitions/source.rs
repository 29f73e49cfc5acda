//! # Provider Module
//!
//! Types for proxy providers - the public listing sites and APIs from
//! which candidate `(host, port)` pairs are scraped.
//!
//! ## Overview
//!
//! The module centers on the `Provider` struct: a URL, the User-Agent to
//! present, and a regex extractor that turns the fetched body into a
//! finite stream of `Candidate` values. Providers track reliability
//! statistics (use counts, failures, proxies found) so flaky sources can
//! be identified over time.
//!
//! Candidates are transient: they exist between a provider page and the
//! broker's dedup/resolve stage, after which surviving candidates become
//! `Proxy` entities.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::definitions::source::Provider;
//!
//! let provider = Provider::new(
//!     "https://example.com/proxy-list".to_string(),
//!     r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{2,5})".to_string(),
//! )
//! .unwrap();
//!
//! let candidates = provider.extract("node 1.2.3.4:8080 up\n");
//! assert_eq!(candidates.len(), 1);
//! assert_eq!(candidates[0].port, 8080);
//! ```

use crate::definitions::{
    defaults,
    enums::Scheme,
    errors::{SourceError, SourceResult},
};
use crate::io::http::Requestor;
use crate::utils::{self, SerializableRegex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transient scraped candidate flowing from a provider to the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Host as scraped: an IP literal or a hostname needing resolution
    pub host: String,

    /// Port as scraped
    pub port: u16,

    /// Schemes the provider claims the proxy speaks; empty means unknown
    pub schemes: Vec<Scheme>,

    /// URL of the provider the candidate came from
    pub source: String,
}

/// A source of proxy candidates.
///
/// A provider defines where and how to obtain candidates: the URL to
/// fetch, the User-Agent to present, and the regex whose first two
/// capture groups yield host and port. Reliability statistics accumulate
/// across fetches.
///
/// # Examples
///
/// ```
/// use drover_proxy::definitions::source::Provider;
///
/// let provider = Provider::new(
///     "https://example.com/list.txt".to_string(),
///     r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{2,5})".to_string(),
/// )
/// .unwrap();
/// assert_eq!(provider.success_rate(), 0.0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// The URL of the provider page or API.
    pub url: String,

    /// The User-Agent string presented when fetching.
    pub user_agent: String,

    /// Extraction pattern; capture group 1 is the host, group 2 the port.
    pub pattern: SerializableRegex,

    /// Schemes this provider claims to list; attached to every candidate.
    pub schemes: Vec<Scheme>,

    /// When the provider was last fetched
    pub last_used_at: Option<DateTime<Utc>>,

    /// Number of times the provider has been fetched
    pub use_count: usize,

    /// Number of failed fetches
    pub failure_count: usize,

    /// Last failure reason
    pub last_failure_reason: Option<String>,

    /// Total candidates extracted from this provider
    pub proxies_found: usize,
}

impl Provider {
    /// Creates a provider with the default extraction pattern semantics.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is not http(s) or the pattern does
    /// not compile.
    pub fn new(url: String, pattern: String) -> SourceResult<Self> {
        if !utils::is_valid_url(&url) {
            return Err(SourceError::InvalidUrl(url));
        }

        let pattern = SerializableRegex::new(&pattern)
            .map_err(|err| SourceError::InvalidRegexPattern(err.to_string()))?;

        Ok(Provider {
            url,
            user_agent: utils::random_user_agent().to_string(),
            pattern,
            schemes: Vec::new(),
            last_used_at: None,
            use_count: 0,
            failure_count: 0,
            last_failure_reason: None,
            proxies_found: 0,
        })
    }

    /// Sets the schemes this provider claims to list.
    #[must_use]
    pub fn with_schemes(mut self, schemes: Vec<Scheme>) -> Self {
        self.schemes = schemes;
        self
    }

    /// Extracts candidates from a fetched body, in source order, with
    /// in-page duplicates removed.
    #[must_use]
    pub fn extract(&self, body: &str) -> Vec<Candidate> {
        let mut seen = ahash::AHashSet::new();
        let mut out = Vec::new();

        for captures in self.pattern.captures_iter(body) {
            let Ok(captures) = captures else { continue };
            let (Some(host), Some(port)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let Ok(port) = port.as_str().parse::<u16>() else {
                continue;
            };
            if port == 0 {
                continue;
            }
            let host = host.as_str().to_string();
            if seen.insert((host.clone(), port)) {
                out.push(Candidate {
                    host,
                    port,
                    schemes: self.schemes.clone(),
                    source: self.url.clone(),
                });
            }
        }
        out
    }

    /// Fetches the provider page and extracts candidates, updating the
    /// reliability statistics.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::FetchFailure` when the page cannot be
    /// retrieved; extraction itself never fails (a non-matching page
    /// yields zero candidates).
    pub async fn fetch(&mut self, requestor: &Requestor) -> SourceResult<Vec<Candidate>> {
        self.last_used_at = Some(Utc::now());
        self.use_count += 1;

        let body = match requestor.get(&self.url, &self.user_agent).await {
            Ok(body) => body,
            Err(err) => {
                self.failure_count += 1;
                self.last_failure_reason = Some(err.to_string());
                return Err(SourceError::FetchFailure(err.to_string()));
            }
        };

        let candidates = self.extract(&body);
        self.proxies_found += candidates.len();
        log::debug!("{}: extracted {} candidates", self.url, candidates.len());
        Ok(candidates)
    }

    /// Share of fetches that succeeded, 0.0 for an unused provider.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.use_count == 0 {
            return 0.0;
        }
        (self.use_count - self.failure_count) as f64 / self.use_count as f64
    }
}

/// The built-in provider table: public listing pages that respond to a
/// plain GET and list proxies in `IP:PORT` form.
#[must_use]
pub fn default_providers() -> Vec<Provider> {
    const URLS: &[(&str, &[Scheme])] = &[
        ("https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http", &[Scheme::Http]),
        ("https://api.proxyscrape.com/v2/?request=displayproxies&protocol=socks4", &[Scheme::Socks4]),
        ("https://api.proxyscrape.com/v2/?request=displayproxies&protocol=socks5", &[Scheme::Socks5]),
        ("https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt", &[Scheme::Http]),
        ("https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks4.txt", &[Scheme::Socks4]),
        ("https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt", &[Scheme::Socks5]),
        ("https://raw.githubusercontent.com/jetkai/proxy-list/main/online-proxies/txt/proxies-http.txt", &[Scheme::Http]),
        ("https://raw.githubusercontent.com/mmpx12/proxy-list/master/http.txt", &[Scheme::Http]),
        ("https://raw.githubusercontent.com/mmpx12/proxy-list/master/socks5.txt", &[Scheme::Socks5]),
        ("https://www.proxy-list.download/api/v1/get?type=http", &[Scheme::Http]),
        ("https://www.proxy-list.download/api/v1/get?type=https", &[Scheme::Https]),
        ("https://www.proxy-list.download/api/v1/get?type=socks4", &[Scheme::Socks4]),
        ("https://www.proxy-list.download/api/v1/get?type=socks5", &[Scheme::Socks5]),
        ("https://free-proxy-list.net/", &[]),
        ("https://www.sslproxies.org/", &[Scheme::Https]),
        ("https://www.socks-proxy.net/", &[Scheme::Socks4, Scheme::Socks5]),
    ];

    URLS.iter()
        .filter_map(|(url, schemes)| {
            Provider::new(
                (*url).to_string(),
                defaults::regex_patterns::IP_PORT.to_string(),
            )
            .ok()
            .map(|p| p.with_schemes(schemes.to_vec()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_port_provider() -> Provider {
        Provider::new(
            "https://example.com/list".to_string(),
            defaults::regex_patterns::IP_PORT.to_string(),
        )
        .unwrap()
    }

    #[test]
    fn extract_preserves_source_order() {
        let provider = ip_port_provider();
        let body = "1.2.3.4:8080\n5.6.7.8:3128\n9.9.9.9:80\n";
        let candidates = provider.extract(body);
        let hosts: Vec<&str> = candidates.iter().map(|c| c.host.as_str()).collect();
        assert_eq!(hosts, ["1.2.3.4", "5.6.7.8", "9.9.9.9"]);
    }

    #[test]
    fn extract_drops_in_page_duplicates() {
        let provider = ip_port_provider();
        let body = "1.2.3.4:8080\n1.2.3.4:8080\n1.2.3.4:3128\n";
        let candidates = provider.extract(body);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn extract_skips_invalid_ports() {
        let provider = ip_port_provider();
        let candidates = provider.extract("1.2.3.4:99999 1.2.3.4:80");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].port, 80);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(Provider::new("ftp://example.com".to_string(), r"(a)(b)".to_string()).is_err());
    }

    #[test]
    fn default_table_compiles() {
        let providers = default_providers();
        assert!(!providers.is_empty());
    }
}
