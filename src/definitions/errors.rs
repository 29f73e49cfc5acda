//! # Error Types
//!
//! Error enums for every subsystem of the drover-proxy crate, each with a
//! matching `Result` alias. Failure locality follows a strict policy: an
//! error at the granularity of one (proxy, scheme, attempt) never
//! propagates past the checker task that produced it; the broker and
//! server surface only aggregate outcomes.
//!
//! ## Overview
//!
//! - `ResolveError`: DNS and IP-literal classification failures
//! - `RequestorError`: direct HTTP request failures (providers, judges)
//! - `NegotiateError`: protocol handshake failures on a proxied stream
//! - `JudgementError`: judge probing and echo-parse failures
//! - `CheckError`: per-proxy validation failures and startup invariants
//! - `SourceError`: provider fetch and extraction failures
//! - `PoolError`: proxy pool exhaustion and shutdown
//! - `ServerError`: listener and per-connection failures
//! - `BrokerError`: orchestration-level failures
//! - `ConfigError`: configuration parsing and validation (fatal at startup)
//! - `UtilError`: validation helpers

use reqwest::StatusCode;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving candidate hostnames.
///
/// A resolve failure is local to one candidate; the broker drops the
/// candidate and continues.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// All DNS attempts for the hostname failed.
    #[error("DNS resolution failed for {0}")]
    DnsFailure(String),

    /// The resolver produced no address for the hostname.
    #[error("No address records for {0}")]
    NoRecords(String),

    /// None of the configured what's-my-IP endpoints answered; fatal for
    /// the checker at startup.
    #[error("Could not determine external IP address")]
    ExternalIpUnavailable,
}

/// Result type for resolver operations
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Error types that can occur during direct HTTP requests
#[derive(Debug, Error)]
pub enum RequestorError {
    /// Encapsulates an underlying reqwest library error.
    ///
    /// This typically occurs for network-level issues such as DNS
    /// failures, connection problems, or TLS errors.
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// The request did not complete within the configured deadline.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server responded with a non-success status code.
    #[error("Server returned status code {0}: {1}")]
    StatusError(StatusCode, String),
}

/// Result type for direct HTTP requests
pub type RequestResult<T> = Result<T, RequestorError>;

/// Errors raised by a protocol negotiator on an open byte stream.
///
/// Negotiators never retry; the checker owns the retry budget.
#[derive(Debug, Error)]
pub enum NegotiateError {
    /// I/O failed mid-handshake.
    #[error("Handshake I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with bytes that violate the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer refused the request (well-formed negative reply).
    #[error("Handshake refused: {0}")]
    Refused(String),

    /// The handshake did not finish within the configured deadline.
    #[error("Handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The scheme cannot express the requested target, e.g. SOCKS4 with
    /// an IPv6 address.
    #[error("Target not supported by scheme: {0}")]
    UnsupportedTarget(String),
}

/// Result type for negotiator operations
pub type NegotiateResult<T> = Result<T, NegotiateError>;

/// Error types that can occur while probing judges or parsing their echo
#[derive(Debug, Error)]
pub enum JudgementError {
    /// Encapsulates an underlying requestor error from a direct probe.
    #[error("Request error: {0}")]
    RequestError(#[from] RequestorError),

    /// No working judge is available for the requested scheme family.
    ///
    /// Raised at checker startup; the checker refuses to run without
    /// judge coverage for every requested scheme.
    #[error("No working judge for scheme family {0}")]
    NoJudgeFor(String),

    /// The echo body could not be parsed into headers and an origin IP.
    #[error("Failed to parse judge response: {0}")]
    ParseError(String),

    /// The judge answered with a malformed or non-success HTTP response.
    #[error("Judge failure: {0}")]
    JudgeFailure(String),
}

/// Result type for judgement operations
pub type JudgementResult<T> = Result<T, JudgementError>;

/// Errors covering one (proxy, scheme) validation attempt
#[derive(Debug, Error)]
pub enum CheckError {
    /// TCP connect to the proxy failed.
    #[error("Connect error: {0}")]
    Connect(String),

    /// The scheme handshake failed.
    #[error("Handshake error: {0}")]
    Handshake(#[from] NegotiateError),

    /// The judge probe through the proxied stream failed.
    #[error("Judge error: {0}")]
    Judge(#[from] JudgementError),

    /// A network operation hit its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer sent a response that is not valid HTTP.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for checker operations
pub type CheckResult<T> = Result<T, CheckError>;

/// Represents an error that can occur when working with proxy providers
#[derive(Debug, Error)]
pub enum SourceError {
    /// The provider URL is invalid or malformed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The extraction pattern is not a valid regular expression.
    #[error("Invalid regex pattern: {0}")]
    InvalidRegexPattern(String),

    /// Fetching the provider page failed.
    ///
    /// This could be due to network issues, rate limiting, or the source
    /// being offline.
    #[error("Failed to fetch from provider: {0}")]
    FetchFailure(String),

    /// The provider's response couldn't be parsed.
    #[error("Failed to parse provider response: {0}")]
    ParseError(String),
}

/// Result type for provider operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by the proxy pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// Both tiers stayed empty (or scheme-incompatible) for the full
    /// bounded wait.
    #[error("No proxy available for {scheme} within {waited:?}")]
    NoProxyAvailable {
        /// The scheme family that was requested
        scheme: String,
        /// How long the caller waited before giving up
        waited: std::time::Duration,
    },

    /// The pool was closed while a getter was waiting.
    #[error("Proxy pool is closed")]
    Closed,
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the rotating proxy server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    /// A connection-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent a request head the server cannot parse.
    #[error("Malformed request: {0}")]
    BadRequest(String),

    /// The chosen upstream proxy failed before the response started;
    /// retryable with another proxy.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// No proxy could serve the request; the client received 502.
    #[error(transparent)]
    NoProxy(#[from] PoolError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the broker
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Encapsulates a judgement error from checker startup.
    #[error("Judgement error: {0}")]
    Judgement(#[from] JudgementError),

    /// Encapsulates a resolver error from startup (external IP).
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Encapsulates a requestor construction error.
    #[error("Requestor error: {0}")]
    Requestor(#[from] RequestorError),

    /// Encapsulates a server error from `serve`.
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// No providers are configured for a discovery run.
    #[error("No providers configured")]
    NoProviders,
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur during configuration operations.
///
/// Configuration errors at startup are fatal; the process aborts with a
/// descriptive message.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Encapsulates an underlying I/O error from the standard library.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serializing configuration data to TOML failed.
    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// The TOML configuration content doesn't match the expected
    /// structure.
    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    /// A required configuration file was not found.
    #[error("Missing required configuration file: {0}")]
    MissingConfig(PathBuf),

    /// A configuration value is invalid or out of acceptable range.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error types for utility functions
#[derive(Debug, Error)]
pub enum UtilError {
    /// The URL doesn't follow RFC 3986.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The address doesn't follow IPv4 or IPv6 format.
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    /// Port numbers must be between 1 and 65535.
    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    /// The regex pattern failed to compile.
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    /// A `host:port` pair could not be split.
    #[error("Invalid host:port: {0}")]
    InvalidHostPort(String),

    /// A scheme name was not recognized.
    #[error("Invalid scheme: {0}")]
    InvalidScheme(String),
}

/// Result type for utility functions
pub type UtilResult<T> = Result<T, UtilError>;
