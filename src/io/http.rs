//! # HTTP Module
//!
//! Direct (unproxied) HTTP fetching for the parts of the system that talk
//! to the outside world on their own behalf: provider pages, judge
//! startup probes, and the external-IP lookup. Per-proxy traffic never
//! goes through here; that is raw-socket work owned by the negotiators.
//!
//! ## Examples
//!
//! ```no_run
//! use drover_proxy::io::http::Requestor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let requestor = Requestor::new()?;
//!     let body = requestor.get("https://example.com", "Mozilla/5.0").await?;
//!     println!("{body}");
//!     Ok(())
//! }
//! ```

use crate::definitions::{
    defaults,
    errors::{RequestResult, RequestorError},
};
use reqwest::Client;
use std::time::Duration;

/// Simple HTTP requestor for direct requests.
///
/// Wraps a shared `reqwest::Client` with a configurable timeout and
/// consistent error mapping. Cheap to clone.
#[derive(Clone)]
pub struct Requestor {
    /// The HTTP client for making requests
    client: Client,

    /// Request timeout duration
    timeout: Duration,
}

impl Requestor {
    /// Creates a requestor with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> RequestResult<Self> {
        Self::with_timeout(defaults::DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    /// Creates a requestor with a custom timeout in seconds.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(timeout_secs: u64) -> RequestResult<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Requestor { client, timeout })
    }

    /// Makes a GET request and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The request fails to send or times out
    /// * The response has a non-success status code
    /// * The response body cannot be read as text
    pub async fn get(&self, url: &str, user_agent: &str) -> RequestResult<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RequestorError::Timeout(self.timeout.as_secs())
                } else {
                    RequestorError::RequestError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RequestorError::StatusError(status, status.to_string()));
        }

        let body = response.text().await?;
        Ok(body)
    }

    /// The configured request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
