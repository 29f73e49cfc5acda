//! # Judgement Module
//!
//! Judges are external HTTP endpoints that echo request headers and the
//! observed client IP. The checker sends probe requests through candidate
//! proxies to a judge and classifies anonymity from the echo; non-HTTP
//! schemes use judges as handshake targets only.
//!
//! ## Overview
//!
//! At startup every configured judge is probed directly (no proxy) to
//! confirm it is reachable, echoes a parseable body, and sees this host's
//! external IP. Judges that fail probing are excluded from rotation. The
//! checker then picks judges round-robin, restricted to those matching
//! the scheme under test; if a requested scheme family has no working
//! judge the checker refuses to start.

use crate::definitions::{
    enums::Scheme,
    errors::{JudgementError, JudgementResult},
};
use crate::inspection::anonymity;
use crate::io::http::Requestor;
use crate::utils;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// One judge endpoint with the state learned at startup probing.
#[derive(Debug, Clone)]
pub struct Judge {
    /// Full URL of the judge endpoint
    pub url: Url,

    /// Hostname portion, used as a handshake target for non-HTTP schemes
    pub host: String,

    /// The IP the judge reported when contacted directly; reference value
    /// for leak detection
    pub observed_ip: Option<IpAddr>,

    /// Whether the startup probe succeeded
    pub is_working: bool,

    /// Direct-probe round trip, for diagnostics
    pub response_time: Option<Duration>,
}

impl Judge {
    /// Parses a judge URL.
    ///
    /// # Errors
    ///
    /// Returns `JudgementError::ParseError` for non-http(s) or malformed
    /// URLs.
    pub fn new(url: &str) -> JudgementResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| JudgementError::ParseError(format!("judge URL {url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(JudgementError::ParseError(format!(
                "judge URL {url}: unsupported scheme"
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| JudgementError::ParseError(format!("judge URL {url}: no host")))?
            .to_string();

        Ok(Judge {
            url: parsed,
            host,
            observed_ip: None,
            is_working: false,
            response_time: None,
        })
    }

    /// Whether this judge can probe the given scheme. Plain-HTTP probes
    /// need an `http://` judge (the probe request is cleartext through
    /// the proxy); every judge works as a handshake target for the other
    /// schemes.
    #[must_use]
    pub fn matches(&self, scheme: Scheme) -> bool {
        match scheme {
            Scheme::Http | Scheme::Connect80 => self.url.scheme() == "http",
            _ => true,
        }
    }

    /// Probes the judge directly and records what it observed.
    ///
    /// A working judge answers with a body that parses into an echo and
    /// sees this host's external IP, confirming it reports real client
    /// addresses.
    pub async fn probe(&mut self, requestor: &Requestor, external_ip: IpAddr) -> bool {
        let started = std::time::Instant::now();
        let body = match requestor
            .get(self.url.as_str(), utils::random_user_agent())
            .await
        {
            Ok(body) => body,
            Err(err) => {
                log::debug!("judge {} failed probe: {err}", self.host);
                self.is_working = false;
                return false;
            }
        };

        match anonymity::parse_echo(&body) {
            Ok(echo) => {
                let sees_us = echo.origin == Some(external_ip)
                    || body.contains(&external_ip.to_string());
                self.observed_ip = echo.origin;
                self.response_time = Some(started.elapsed());
                self.is_working = sees_us;
                if !sees_us {
                    log::debug!("judge {} does not echo our external IP", self.host);
                }
            }
            Err(err) => {
                log::debug!("judge {} echo unparseable: {err}", self.host);
                self.is_working = false;
            }
        }
        self.is_working
    }
}

/// The pool of judges the checker rotates through.
pub struct JudgeSet {
    judges: Vec<Judge>,
    cursor: AtomicUsize,
}

impl JudgeSet {
    /// Builds a set from judge URLs; malformed URLs are skipped with a
    /// warning.
    #[must_use]
    pub fn from_urls(urls: &[&str]) -> Self {
        let judges = urls
            .iter()
            .filter_map(|url| match Judge::new(url) {
                Ok(judge) => Some(judge),
                Err(err) => {
                    log::warn!("skipping judge: {err}");
                    None
                }
            })
            .collect();
        JudgeSet {
            judges,
            cursor: AtomicUsize::new(0),
        }
    }

    /// The default judge set.
    #[must_use]
    pub fn new_default() -> Self {
        Self::from_urls(crate::definitions::defaults::PROXY_JUDGE_URLS)
    }

    /// Probes every judge directly, concurrently, keeping only working
    /// ones in rotation.
    pub async fn probe_all(&mut self, requestor: &Requestor, external_ip: IpAddr) {
        let probes = self.judges.iter_mut().map(|judge| {
            let requestor = requestor.clone();
            async move {
                judge.probe(&requestor, external_ip).await;
            }
        });
        futures::future::join_all(probes).await;

        let working = self.judges.iter().filter(|j| j.is_working).count();
        log::info!("{working}/{} judges working", self.judges.len());
    }

    /// Verifies at least one working judge exists for every requested
    /// scheme.
    ///
    /// # Errors
    ///
    /// Returns `JudgementError::NoJudgeFor` naming the first uncovered
    /// scheme; the checker treats this as fatal.
    pub fn ensure_coverage(&self, schemes: &[Scheme]) -> JudgementResult<()> {
        for scheme in schemes {
            if !self
                .judges
                .iter()
                .any(|j| j.is_working && j.matches(*scheme))
            {
                return Err(JudgementError::NoJudgeFor(scheme.to_string()));
            }
        }
        Ok(())
    }

    /// Picks the next working judge for `scheme`, round-robin.
    #[must_use]
    pub fn pick(&self, scheme: Scheme) -> Option<Judge> {
        let matching: Vec<&Judge> = self
            .judges
            .iter()
            .filter(|j| j.is_working && j.matches(scheme))
            .collect();
        if matching.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % matching.len();
        Some(matching[idx].clone())
    }

    /// Number of working judges.
    #[must_use]
    pub fn working(&self) -> usize {
        self.judges.iter().filter(|j| j.is_working).count()
    }

    /// Marks a judge as broken mid-run; rare path taken by the checker
    /// when a judge repeatedly answers garbage through healthy proxies.
    pub fn mark_broken(&mut self, host: &str) {
        for judge in &mut self.judges {
            if judge.host == host {
                judge.is_working = false;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_all_working(&mut self) {
        for judge in &mut self.judges {
            judge.is_working = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn working_set() -> JudgeSet {
        let mut set = JudgeSet::from_urls(&[
            "http://one.example/azenv.php",
            "http://two.example/azenv.php",
            "https://three.example/judge",
        ]);
        for judge in &mut set.judges {
            judge.is_working = true;
        }
        set
    }

    #[test]
    fn malformed_urls_are_skipped() {
        let set = JudgeSet::from_urls(&["not a url", "ftp://x.example", "http://ok.example"]);
        assert_eq!(set.judges.len(), 1);
    }

    #[test]
    fn http_probes_require_http_judges() {
        let https_only = JudgeSet::from_urls(&["https://secure.example/judge"]);
        let mut set = https_only;
        set.judges[0].is_working = true;

        assert!(set.ensure_coverage(&[Scheme::Socks5]).is_ok());
        assert!(matches!(
            set.ensure_coverage(&[Scheme::Http]),
            Err(JudgementError::NoJudgeFor(_))
        ));
    }

    #[test]
    fn pick_rotates_round_robin() {
        let set = working_set();
        let first = set.pick(Scheme::Http).unwrap();
        let second = set.pick(Scheme::Http).unwrap();
        let third = set.pick(Scheme::Http).unwrap();
        // Two http judges match; the third pick wraps around.
        assert_ne!(first.host, second.host);
        assert_eq!(first.host, third.host);
    }

    #[test]
    fn broken_judges_leave_rotation() {
        let mut set = working_set();
        set.mark_broken("one.example");
        assert_eq!(set.working(), 2);
        for _ in 0..4 {
            assert_ne!(set.pick(Scheme::Http).unwrap().host, "one.example");
        }
    }
}
