//! # Utility Module
//!
//! Common helpers used throughout the drover-proxy system: URL and
//! address validation, `host:port` splitting, user-agent rotation, and a
//! serializable regex wrapper for provider extraction patterns.
//!
//! ## Examples
//!
//! ```
//! use drover_proxy::utils;
//!
//! assert!(utils::is_valid_url("https://example.com"));
//! assert_eq!(utils::split_host_port("1.2.3.4:8080").unwrap().1, 8080);
//! ```

use crate::definitions::{
    defaults,
    errors::{UtilError, UtilResult},
};
use fancy_regex::Regex;
use rand::prelude::*;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use url::Url;

/// A wrapper around `fancy_regex::Regex` that supports serde, `PartialEq`,
/// and `Hash` by keying on the pattern string.
///
/// Provider definitions carry their extraction pattern through TOML and
/// JSON; the compiled regex is rebuilt on deserialization.
///
/// # Examples
///
/// ```
/// use drover_proxy::utils::SerializableRegex;
///
/// let regex = SerializableRegex::new(r"\d{3}").unwrap();
/// assert!(regex.is_match("123").unwrap());
/// ```
#[derive(Clone, Debug)]
pub struct SerializableRegex {
    /// The pattern string used to create the regex
    pattern: String,

    /// The compiled regex object
    regex: Regex,
}

impl SerializableRegex {
    /// Compiles a pattern into a `SerializableRegex`.
    ///
    /// # Errors
    ///
    /// Returns `UtilError::InvalidRegex` if the pattern does not compile.
    pub fn new(pattern: &str) -> UtilResult<Self> {
        let regex = validate_regex(pattern)?;
        Ok(SerializableRegex {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The pattern string used to create this regex.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// A reference to the compiled regex.
    #[must_use]
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Checks whether the given text matches this regex.
    ///
    /// # Errors
    ///
    /// Returns the underlying engine error on catastrophic backtracking.
    pub fn is_match(&self, text: &str) -> Result<bool, Box<fancy_regex::Error>> {
        self.regex.is_match(text).map_err(Box::new)
    }

    /// Iterates over all capture groups in the given text.
    pub fn captures_iter<'r, 't>(&'r self, text: &'t str) -> fancy_regex::CaptureMatches<'r, 't> {
        self.regex.captures_iter(text)
    }
}

impl PartialEq for SerializableRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for SerializableRegex {}

impl Hash for SerializableRegex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

impl fmt::Display for SerializableRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl FromStr for SerializableRegex {
    type Err = UtilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SerializableRegex::new(s)
    }
}

impl serde::Serialize for SerializableRegex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> serde::Deserialize<'de> for SerializableRegex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        SerializableRegex::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Validates whether a given string is an http(s) URL
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.scheme() == "http" || parsed.scheme() == "https",
        Err(_) => false,
    }
}

/// Validates and compiles a regex pattern
///
/// # Errors
///
/// Returns `UtilError::InvalidRegex` if the pattern is invalid.
pub fn validate_regex(pattern: &str) -> UtilResult<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Ok(regex),
        Err(e) => Err(UtilError::InvalidRegex(e.to_string())),
    }
}

/// Returns a random User-Agent string from the default list
#[must_use]
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    defaults::DEFAULT_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or("Mozilla/5.0 (compatible; drover-proxy/0.3)")
}

/// Checks if a string is a valid IPv4 or IPv6 address
#[must_use]
pub fn is_valid_ip(ip_str: &str) -> bool {
    ip_str.parse::<std::net::IpAddr>().is_ok()
}

/// Splits a `host:port` pair, accepting bracketed IPv6 literals.
///
/// # Errors
///
/// Returns `UtilError::InvalidHostPort` when the separator is missing and
/// `UtilError::InvalidPort` when the port is absent, zero, or not a
/// number.
///
/// # Examples
///
/// ```
/// use drover_proxy::utils::split_host_port;
///
/// assert_eq!(
///     split_host_port("[::1]:8080").unwrap(),
///     ("::1".to_string(), 8080)
/// );
/// ```
pub fn split_host_port(input: &str) -> UtilResult<(String, u16)> {
    let (host, port) = if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| UtilError::InvalidHostPort(input.to_string()))?;
        let host = &rest[..end];
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| UtilError::InvalidHostPort(input.to_string()))?;
        (host.to_string(), port)
    } else {
        let idx = input
            .rfind(':')
            .ok_or_else(|| UtilError::InvalidHostPort(input.to_string()))?;
        (input[..idx].to_string(), &input[idx + 1..])
    };

    let port: u16 = port
        .parse()
        .map_err(|_| UtilError::InvalidPort(port.to_string()))?;
    if port == 0 {
        return Err(UtilError::InvalidPort("0".to_string()));
    }
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_port_accepts_v4_and_v6() {
        assert_eq!(
            split_host_port("1.2.3.4:8080").unwrap(),
            ("1.2.3.4".to_string(), 8080)
        );
        assert_eq!(
            split_host_port("[2001:db8::1]:3128").unwrap(),
            ("2001:db8::1".to_string(), 3128)
        );
    }

    #[test]
    fn split_host_port_rejects_garbage() {
        assert!(split_host_port("no-port").is_err());
        assert!(split_host_port("host:0").is_err());
        assert!(split_host_port("host:http").is_err());
    }

    #[test]
    fn regex_wrapper_round_trips_serde() {
        let regex = SerializableRegex::new(r"(\d+):(\d+)").unwrap();
        let json = serde_json::to_string(&regex).unwrap();
        let back: SerializableRegex = serde_json::from_str(&json).unwrap();
        assert_eq!(regex, back);
        assert!(back.is_match("12:34").unwrap());
    }
}
