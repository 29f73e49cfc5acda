//! # Anonymity Classification
//!
//! Parsing of judge echo bodies and the classification of what an HTTP
//! proxy reveals about its client.
//!
//! ## Overview
//!
//! A judge echoes two things: the client IP it observed (`origin`) and
//! the request headers it received. Classification compares the origin
//! against this host's external IP and scans the headers for the pinned
//! proxy-indicator set {`Via`, `X-Forwarded-For`, `Forwarded`,
//! `Proxy-Connection`}:
//!
//! * a pinned indicator present, or the client IP visible anywhere →
//!   `Transparent`
//! * no pinned indicator and no leak, but another header name hinting at
//!   a proxy (`X-Proxy-Id`, `Proxy-Agent`, `X-Via`, ...) → `Anonymous`
//! * nothing proxy-shaped at all → `High`
//!
//! Adding an indicator header to an echo can only lower the resulting
//! level, never raise it.
//!
//! Echo bodies arrive as JSON (`headers` object plus `origin`) or as
//! azenv-style key/value dumps; both parse into the same `JudgeEcho`.

use crate::definitions::enums::AnonymityLevel;
use crate::definitions::errors::{JudgementError, JudgementResult};
use lazy_static::lazy_static;
use std::net::IpAddr;

lazy_static! {
    static ref INDICATORS: Vec<&'static str> =
        vec!["via", "x-forwarded-for", "forwarded", "proxy-connection"];
}

/// A parsed judge response: observed client IP plus echoed headers.
#[derive(Debug, Clone, Default)]
pub struct JudgeEcho {
    /// The client IP the judge observed, when the body carried one
    pub origin: Option<IpAddr>,

    /// Echoed request headers with normalized (lowercase, dashed) names
    pub headers: Vec<(String, String)>,
}

impl JudgeEcho {
    /// The value of a header by normalized name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = normalize_header_name(name);
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Lowercases a header or CGI-variable name and maps `HTTP_FOO_BAR` to
/// `foo-bar`.
fn normalize_header_name(raw: &str) -> String {
    let raw = raw.trim();
    let stripped = raw
        .strip_prefix("HTTP_")
        .or_else(|| raw.strip_prefix("http_"))
        .unwrap_or(raw);
    stripped.to_lowercase().replace('_', "-")
}

/// Parses a judge echo body, accepting JSON and azenv-style dumps.
///
/// # Errors
///
/// Returns `JudgementError::ParseError` when the body yields neither an
/// origin IP nor a single recognizable header.
pub fn parse_echo(body: &str) -> JudgementResult<JudgeEcho> {
    if let Some(echo) = parse_json_echo(body) {
        return Ok(echo);
    }
    let echo = parse_keyvalue_echo(body);
    if echo.origin.is_none() && echo.headers.is_empty() {
        return Err(JudgementError::ParseError(
            "echo body has no origin and no headers".to_string(),
        ));
    }
    Ok(echo)
}

/// JSON echoes carry a `headers` object and an `origin`/`ip` field
/// (httpbin-style). `origin` may be a comma list; the first entry wins.
fn parse_json_echo(body: &str) -> Option<JudgeEcho> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let object = value.as_object()?;

    let mut echo = JudgeEcho::default();
    if let Some(headers) = object.get("headers").and_then(|h| h.as_object()) {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                echo.headers
                    .push((normalize_header_name(name), value.to_string()));
            }
        }
    }

    let origin = object
        .get("origin")
        .or_else(|| object.get("ip"))
        .and_then(|o| o.as_str());
    if let Some(origin) = origin {
        echo.origin = origin
            .split(',')
            .next()
            .and_then(|ip| ip.trim().parse().ok());
    }

    if echo.origin.is_none() && echo.headers.is_empty() {
        return None;
    }
    Some(echo)
}

/// azenv-style dumps print one `NAME = value` (or `NAME: value`) pair per
/// line, CGI-spelled (`HTTP_VIA`, `REMOTE_ADDR`), frequently wrapped in
/// minimal HTML.
fn parse_keyvalue_echo(body: &str) -> JudgeEcho {
    let mut echo = JudgeEcho::default();

    for line in body.lines() {
        let line = strip_tags(line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() || value.is_empty() || name.contains(' ') {
            continue;
        }

        if name.eq_ignore_ascii_case("REMOTE_ADDR") {
            echo.origin = value.parse().ok();
        } else if name.starts_with("HTTP_") || name.starts_with("http_") {
            echo.headers
                .push((normalize_header_name(name), value.to_string()));
        }
    }
    echo
}

/// Drops anything between `<` and `>` so tag-wrapped azenv lines parse.
fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for ch in line.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// A header name outside the pinned set that still betrays a proxy hop,
/// e.g. `x-proxy-id` or `proxy-agent`.
fn secondary_hint(name: &str) -> bool {
    !INDICATORS.contains(&name) && (name.contains("proxy") || name.contains("via"))
}

/// Classifies what the proxy revealed, given this host's external IP.
///
/// Presence of any pinned indicator header is sufficient for
/// `Transparent` on its own; those headers exist to carry the forwarding
/// chain, whether or not this particular hop filled in the client IP.
#[must_use]
pub fn classify(echo: &JudgeEcho, external_ip: IpAddr) -> AnonymityLevel {
    let external = external_ip.to_string();

    let ip_leaked = echo.origin == Some(external_ip)
        || echo
            .headers
            .iter()
            .any(|(_, value)| value.contains(&external));

    let indicator_present = echo
        .headers
        .iter()
        .any(|(name, _)| INDICATORS.contains(&name.as_str()));

    if ip_leaked || indicator_present {
        return AnonymityLevel::Transparent;
    }

    if echo.headers.iter().any(|(name, _)| secondary_hint(name)) {
        AnonymityLevel::Anonymous
    } else {
        AnonymityLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTERNAL: &str = "198.51.100.7";
    const PROXY: &str = "203.0.113.50";

    fn external() -> IpAddr {
        EXTERNAL.parse().unwrap()
    }

    #[test]
    fn parses_httpbin_style_json() {
        let body = format!(
            r#"{{"headers": {{"Host": "judge", "Via": "1.1 cache"}}, "origin": "{PROXY}"}}"#
        );
        let echo = parse_echo(&body).unwrap();
        assert_eq!(echo.origin, Some(PROXY.parse().unwrap()));
        assert_eq!(echo.header("Via"), Some("1.1 cache"));
    }

    #[test]
    fn parses_azenv_dump_with_markup() {
        let body = format!(
            "<html><body>\nREMOTE_ADDR = {PROXY}\nHTTP_USER_AGENT = Lynx\nHTTP_X_FORWARDED_FOR = {EXTERNAL}\n</body></html>"
        );
        let echo = parse_echo(&body).unwrap();
        assert_eq!(echo.origin, Some(PROXY.parse().unwrap()));
        assert_eq!(echo.header("X-Forwarded-For"), Some(EXTERNAL));
    }

    #[test]
    fn unparseable_body_is_an_error() {
        assert!(parse_echo("it works!").is_err());
    }

    #[test]
    fn origin_match_is_transparent() {
        let echo = JudgeEcho {
            origin: Some(external()),
            headers: vec![],
        };
        assert_eq!(classify(&echo, external()), AnonymityLevel::Transparent);
    }

    #[test]
    fn header_leak_is_transparent() {
        let echo = JudgeEcho {
            origin: Some(PROXY.parse().unwrap()),
            headers: vec![("x-forwarded-for".to_string(), EXTERNAL.to_string())],
        };
        assert_eq!(classify(&echo, external()), AnonymityLevel::Transparent);
    }

    #[test]
    fn bare_via_without_leak_is_transparent() {
        // A forwarding header alone marks the proxy, even when the
        // client IP stays hidden.
        let echo = JudgeEcho {
            origin: Some(PROXY.parse().unwrap()),
            headers: vec![("via".to_string(), "1.1 testproxy".to_string())],
        };
        assert_eq!(classify(&echo, external()), AnonymityLevel::Transparent);
    }

    #[test]
    fn secondary_proxy_hint_is_anonymous() {
        let echo = JudgeEcho {
            origin: Some(PROXY.parse().unwrap()),
            headers: vec![("x-proxy-id".to_string(), "a1b2c3".to_string())],
        };
        assert_eq!(classify(&echo, external()), AnonymityLevel::Anonymous);
    }

    #[test]
    fn clean_echo_is_high() {
        let echo = JudgeEcho {
            origin: Some(PROXY.parse().unwrap()),
            headers: vec![("user-agent".to_string(), "Lynx".to_string())],
        };
        assert_eq!(classify(&echo, external()), AnonymityLevel::High);
    }

    #[test]
    fn adding_indicators_never_raises_the_level() {
        let bases = [
            JudgeEcho {
                origin: Some(PROXY.parse().unwrap()),
                headers: vec![],
            },
            JudgeEcho {
                origin: Some(PROXY.parse().unwrap()),
                headers: vec![("x-proxy-id".to_string(), "a1b2c3".to_string())],
            },
            JudgeEcho {
                origin: Some(PROXY.parse().unwrap()),
                headers: vec![("via".to_string(), "1.1 hop".to_string())],
            },
            JudgeEcho {
                origin: Some(external()),
                headers: vec![],
            },
        ];

        for base in bases {
            let before = classify(&base, external());
            for added in ["via", "x-forwarded-for", "forwarded", "proxy-connection"] {
                let mut echo = base.clone();
                echo.headers.push((added.to_string(), "indicator".to_string()));
                assert!(classify(&echo, external()) <= before);
            }
        }
    }
}
