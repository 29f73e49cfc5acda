//! # Checker Module
//!
//! Validates candidate proxies across requested schemes: opens a fresh
//! connection per scheme, runs the scheme's negotiator, and for plain
//! HTTP sends a judge probe through the proxied stream to classify
//! anonymity.
//!
//! ## Overview
//!
//! The checker owns the retry budget (`max_tries` per (proxy, scheme))
//! and the failure taxonomy: connect errors, handshake errors, judge
//! errors, timeouts, and protocol errors are all local to one attempt and
//! never abort a run. Judges rotate round-robin, so a retry after a
//! judge-side failure lands on a different judge. A proxy that survives
//! with at least one validated scheme is emitted; the rest are discarded
//! by the caller.
//!
//! HTTPS and the explicit CONNECT schemes are validated by the handshake
//! alone - a successful `CONNECT` marks HTTPS with High anonymity and no
//! probe is driven through the tunnel. SOCKS schemes likewise succeed on
//! handshake completion with inherent anonymity.

use crate::definitions::{
    defaults,
    enums::{AnonymityLevel, Scheme},
    errors::{CheckError, JudgementError},
    proxy::Proxy,
};
use crate::inspection::{anonymity, judgement::JudgeSet};
use crate::io::negotiate::{Negotiator, Target};
use crate::io::resolver::Resolver;
use crate::utils;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Cap on a judge response read through a proxied stream.
const MAX_PROBE_BODY: usize = 64 * 1024;

/// Checker settings.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Deadline for each network step: connect, handshake, probe
    pub timeout: Duration,

    /// Validation attempts per (proxy, scheme)
    pub max_tries: u32,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        CheckerConfig {
            timeout: Duration::from_secs(defaults::DEFAULT_NETWORK_TIMEOUT_SECS),
            max_tries: defaults::DEFAULT_MAX_TRIES,
        }
    }
}

/// Validates proxies against judges and assigns schemes and anonymity.
pub struct Checker {
    judges: Arc<JudgeSet>,
    resolver: Arc<Resolver>,
    external_ip: IpAddr,
    config: CheckerConfig,
}

impl Checker {
    /// Creates a checker over a probed judge set.
    ///
    /// `external_ip` is the baseline for anonymity classification,
    /// obtained once at startup; without it the checker cannot run.
    #[must_use]
    pub fn new(
        judges: Arc<JudgeSet>,
        resolver: Arc<Resolver>,
        external_ip: IpAddr,
        config: CheckerConfig,
    ) -> Self {
        Checker {
            judges,
            resolver,
            external_ip,
            config,
        }
    }

    /// The judge set this checker rotates through.
    #[must_use]
    pub fn judges(&self) -> &Arc<JudgeSet> {
        &self.judges
    }

    /// Validates `proxy` for each requested scheme, mutating its scheme
    /// map with the subset that passed. Schemes are tried sequentially on
    /// independent connection lifecycles; runtimes and errors land in the
    /// proxy's metrics either way.
    pub async fn check(&self, proxy: &mut Proxy, schemes: &[Scheme]) {
        for scheme in schemes {
            let mut validated = false;
            for attempt in 1..=self.config.max_tries {
                let started = Instant::now();
                match self.check_scheme(proxy, *scheme).await {
                    Ok(level) => {
                        proxy.types.insert(*scheme, level);
                        proxy.record_success(*scheme, started.elapsed());
                        validated = true;
                        break;
                    }
                    Err(err) => {
                        log::debug!(
                            "{} {scheme} attempt {attempt}/{}: {err}",
                            proxy.addr(),
                            self.config.max_tries
                        );
                        proxy.record_failure(*scheme, &err.to_string(), started.elapsed());
                    }
                }
            }
            proxy.close_stream();
            if !validated {
                log::debug!("{} does not speak {scheme}", proxy.addr());
            }
        }
    }

    /// One validation attempt for one scheme. Returns the anonymity level
    /// to record: `Some` for judge-probed HTTP and the CONNECT-validated
    /// HTTPS path, `None` (inherent) for SOCKS and the explicit CONNECT
    /// ports.
    async fn check_scheme(
        &self,
        proxy: &mut Proxy,
        scheme: Scheme,
    ) -> Result<Option<AnonymityLevel>, CheckError> {
        let judge = self
            .judges
            .pick(scheme)
            .ok_or_else(|| JudgementError::NoJudgeFor(scheme.to_string()))?;

        let judge_ip = self
            .resolver
            .resolve(&judge.host)
            .await
            .map_err(|e| CheckError::Judge(JudgementError::JudgeFailure(e.to_string())))?;

        let mut stream =
            tokio::time::timeout(self.config.timeout, TcpStream::connect(proxy.addr()))
                .await
                .map_err(|_| CheckError::Timeout(self.config.timeout))?
                .map_err(|e| CheckError::Connect(e.to_string()))?;

        // The handshake target is the judge's endpoint: port 443 for the
        // HTTPS tunnel, the judge's own port otherwise.
        let judge_port = judge.url.port_or_known_default().unwrap_or(80);
        let target_port = if scheme == Scheme::Https {
            443
        } else {
            judge_port
        };
        let target = Target::new(judge_ip, target_port).with_host(judge.host.clone());

        Negotiator::for_scheme(scheme)
            .negotiate(&mut stream, &target, self.config.timeout)
            .await?;

        let level = if scheme.probes_judge() {
            Some(self.probe_through(&mut stream, &judge.url).await?)
        } else if scheme == Scheme::Https {
            // CONNECT-only validation path: the tunnel hides the client
            // entirely.
            Some(AnonymityLevel::High)
        } else {
            None
        };

        proxy.attach_stream(stream);
        Ok(level)
    }

    /// Sends an absolute-URI GET for the judge through the proxied stream
    /// and classifies the echoed response.
    async fn probe_through(
        &self,
        stream: &mut TcpStream,
        judge_url: &url::Url,
    ) -> Result<AnonymityLevel, CheckError> {
        let host = judge_url.host_str().unwrap_or_default();
        let request = format!(
            "GET {judge_url} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            utils::random_user_agent()
        );

        let probe = async {
            stream.write_all(request.as_bytes()).await?;
            let mut body = Vec::with_capacity(4096);
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
                if body.len() > MAX_PROBE_BODY {
                    break;
                }
            }
            Ok::<Vec<u8>, std::io::Error>(body)
        };

        let raw = tokio::time::timeout(self.config.timeout, probe)
            .await
            .map_err(|_| CheckError::Timeout(self.config.timeout))?
            .map_err(|e| CheckError::Judge(JudgementError::JudgeFailure(e.to_string())))?;

        let text = String::from_utf8_lossy(&raw);
        let (status, body) = split_http_response(&text)?;
        if !(200..300).contains(&status) {
            return Err(CheckError::Judge(JudgementError::JudgeFailure(format!(
                "judge answered {status}"
            ))));
        }

        let echo = anonymity::parse_echo(body).map_err(CheckError::Judge)?;
        Ok(anonymity::classify(&echo, self.external_ip))
    }
}

/// Splits a raw HTTP/1.x response into status code and body.
fn split_http_response(text: &str) -> Result<(u16, &str), CheckError> {
    let head_end = text
        .find("\r\n\r\n")
        .ok_or_else(|| CheckError::Protocol("response head unterminated".to_string()))?;
    let head = &text[..head_end];
    let body = &text[head_end + 4..];

    let status_line = head.lines().next().unwrap_or("");
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            let status = code
                .parse::<u16>()
                .map_err(|_| CheckError::Protocol(format!("bad status in {status_line:?}")))?;
            Ok((status, body))
        }
        _ => Err(CheckError::Protocol(format!(
            "bad status line {status_line:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    const EXTERNAL: &str = "198.51.100.7";

    /// Judge hosts are IP literals so no DNS runs in tests.
    fn checker(judge_url: &str) -> Checker {
        let mut set = JudgeSet::from_urls(&[judge_url]);
        set.force_all_working();
        Checker::new(
            Arc::new(set),
            Arc::new(Resolver::new()),
            EXTERNAL.parse().unwrap(),
            CheckerConfig {
                timeout: Duration::from_secs(2),
                max_tries: 1,
            },
        )
    }

    enum MockBehavior {
        HttpEcho { body: String },
        ConnectOk,
        Socks5Ok,
    }

    /// A loopback proxy that accepts one connection, answers the given
    /// scheme's handshake, and (for HTTP) serves a canned judge echo.
    async fn spawn_mock_proxy(behavior: MockBehavior) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            match behavior {
                MockBehavior::HttpEcho { body } => {
                    let mut reader = BufReader::new(stream);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        reader.read_line(&mut line).await.unwrap();
                        if line == "\r\n" || line.is_empty() {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
                        body.len()
                    );
                    reader
                        .into_inner()
                        .write_all(response.as_bytes())
                        .await
                        .unwrap();
                }
                MockBehavior::ConnectOk => {
                    let mut stream = stream;
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await.unwrap();
                    stream
                        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                        .await
                        .unwrap();
                }
                MockBehavior::Socks5Ok => {
                    let mut stream = stream;
                    let mut methods = [0u8; 3];
                    stream.read_exact(&mut methods).await.unwrap();
                    stream.write_all(&[0x05, 0x00]).await.unwrap();
                    let mut head = [0u8; 4];
                    stream.read_exact(&mut head).await.unwrap();
                    let mut rest = [0u8; 6];
                    stream.read_exact(&mut rest).await.unwrap();
                    stream
                        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                        .await
                        .unwrap();
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn http_with_via_header_is_transparent() {
        // A bare forwarding header, no client-IP leak anywhere in the
        // echo: the indicator alone settles the classification.
        let body = "REMOTE_ADDR = 203.0.113.5\nHTTP_VIA = 1.1 testproxy\n".to_string();
        let addr = spawn_mock_proxy(MockBehavior::HttpEcho { body }).await;

        let checker = checker("http://192.0.2.10/azenv.php");
        let mut proxy = Proxy::new(addr.ip(), addr.port());
        checker.check(&mut proxy, &[Scheme::Http]).await;

        assert!(proxy.supports(Scheme::Http));
        assert_eq!(
            proxy.types.level(Scheme::Http),
            Some(AnonymityLevel::Transparent)
        );
    }

    #[tokio::test]
    async fn http_with_clean_echo_is_high() {
        let body = "REMOTE_ADDR = 203.0.113.5\nHTTP_USER_AGENT = Lynx\n".to_string();
        let addr = spawn_mock_proxy(MockBehavior::HttpEcho { body }).await;

        let checker = checker("http://192.0.2.10/azenv.php");
        let mut proxy = Proxy::new(addr.ip(), addr.port());
        checker.check(&mut proxy, &[Scheme::Http]).await;

        assert_eq!(proxy.types.level(Scheme::Http), Some(AnonymityLevel::High));
        assert_eq!(proxy.n_req(), 1);
    }

    #[tokio::test]
    async fn connect_accepting_proxy_validates_https_as_high() {
        let addr = spawn_mock_proxy(MockBehavior::ConnectOk).await;

        let checker = checker("http://192.0.2.10/azenv.php");
        let mut proxy = Proxy::new(addr.ip(), addr.port());
        checker.check(&mut proxy, &[Scheme::Https]).await;

        assert!(proxy.supports(Scheme::Https));
        assert_eq!(proxy.types.level(Scheme::Https), Some(AnonymityLevel::High));
    }

    #[tokio::test]
    async fn socks5_validates_without_judge_probe() {
        let addr = spawn_mock_proxy(MockBehavior::Socks5Ok).await;

        let checker = checker("http://192.0.2.10/azenv.php");
        let mut proxy = Proxy::new(addr.ip(), addr.port());
        checker.check(&mut proxy, &[Scheme::Socks5]).await;

        assert!(proxy.supports(Scheme::Socks5));
        assert_eq!(proxy.types.level(Scheme::Socks5), None);
    }

    #[tokio::test]
    async fn dead_proxy_accumulates_failures_and_no_schemes() {
        let checker = checker("http://192.0.2.10/azenv.php");
        // Nothing listens on loopback port 1.
        let mut proxy = Proxy::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1);
        checker
            .check(&mut proxy, &[Scheme::Http, Scheme::Socks5])
            .await;

        assert!(proxy.types.is_empty());
        assert_eq!(proxy.n_err(), 2);
    }

    #[test]
    fn response_splitter_requires_a_status_line() {
        assert!(split_http_response("garbage\r\n\r\nbody").is_err());
        let (status, body) = split_http_response("HTTP/1.1 200 OK\r\nX: y\r\n\r\nhello").unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "hello");
    }
}
