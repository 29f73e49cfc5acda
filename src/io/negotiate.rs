//! # Negotiators
//!
//! Protocol handshakes performed on an open byte stream toward a proxy:
//! plain HTTP, HTTPS via `CONNECT`, explicit `CONNECT:80`/`CONNECT:25`
//! tunnels, SOCKS4, and SOCKS5.
//!
//! ## Overview
//!
//! The five schemes form a closed set, so the negotiator is a sum type
//! with a single `negotiate` operation rather than trait objects. Each
//! handshake is a pure state machine over the stream: it consumes exactly
//! the protocol bytes it needs, never retries (the checker owns the retry
//! budget), and fails with a typed error on any protocol violation or on
//! hitting the handshake deadline.
//!
//! Negotiators are generic over the stream type so the byte-level tests
//! run on in-memory duplex pipes.

use crate::definitions::{
    enums::Scheme,
    errors::{NegotiateError, NegotiateResult},
};
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Cap on a CONNECT reply head; anything longer is a protocol error.
const MAX_REPLY_HEAD: usize = 8 * 1024;

/// The endpoint a handshake should open a path to.
#[derive(Debug, Clone)]
pub struct Target {
    /// Resolved address of the endpoint
    pub ip: IpAddr,

    /// Endpoint port
    pub port: u16,

    /// Hostname for `CONNECT` request lines when one is known; falls back
    /// to the IP literal
    pub host: Option<String>,
}

impl Target {
    /// A target addressed by IP alone.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Target {
            ip,
            port,
            host: None,
        }
    }

    /// Attaches the hostname used on `CONNECT` request lines.
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    fn host_str(&self) -> String {
        self.host.clone().unwrap_or_else(|| self.ip.to_string())
    }
}

/// Handshake state machine for one scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiator {
    /// No handshake; requests are forwarded in absolute-URI form
    Http,
    /// `CONNECT` tunnel to the target's own port
    Https,
    /// `CONNECT` tunnel pinned to port 80
    Connect80,
    /// `CONNECT` tunnel pinned to port 25
    Connect25,
    /// SOCKS4 greeting/reply exchange
    Socks4,
    /// SOCKS5 method negotiation plus connect request
    Socks5,
}

impl Negotiator {
    /// The negotiator for a scheme.
    #[must_use]
    pub fn for_scheme(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Http => Negotiator::Http,
            Scheme::Https => Negotiator::Https,
            Scheme::Connect80 => Negotiator::Connect80,
            Scheme::Connect25 => Negotiator::Connect25,
            Scheme::Socks4 => Negotiator::Socks4,
            Scheme::Socks5 => Negotiator::Socks5,
        }
    }

    /// The scheme this negotiator handles.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        match self {
            Negotiator::Http => Scheme::Http,
            Negotiator::Https => Scheme::Https,
            Negotiator::Connect80 => Scheme::Connect80,
            Negotiator::Connect25 => Scheme::Connect25,
            Negotiator::Socks4 => Scheme::Socks4,
            Negotiator::Socks5 => Scheme::Socks5,
        }
    }

    /// Runs the handshake on `stream` toward `target` under `deadline`.
    ///
    /// On success the stream carries tunneled bytes (CONNECT/SOCKS) or is
    /// ready for absolute-URI requests (HTTP).
    ///
    /// # Errors
    ///
    /// * `NegotiateError::Timeout` when the deadline elapses
    /// * `NegotiateError::Refused` on a well-formed negative reply
    /// * `NegotiateError::Protocol` on malformed bytes
    /// * `NegotiateError::UnsupportedTarget` e.g. SOCKS4 with IPv6
    pub async fn negotiate<S>(
        &self,
        stream: &mut S,
        target: &Target,
        deadline: Duration,
    ) -> NegotiateResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tokio::time::timeout(deadline, self.run(stream, target))
            .await
            .map_err(|_| NegotiateError::Timeout(deadline))?
    }

    async fn run<S>(&self, stream: &mut S, target: &Target) -> NegotiateResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Negotiator::Http => Ok(()),
            Negotiator::Https => connect_handshake(stream, &target.host_str(), target.port).await,
            Negotiator::Connect80 => connect_handshake(stream, &target.host_str(), 80).await,
            Negotiator::Connect25 => connect_handshake(stream, &target.host_str(), 25).await,
            Negotiator::Socks4 => socks4_handshake(stream, target).await,
            Negotiator::Socks5 => socks5_handshake(stream, target).await,
        }
    }
}

/// Sends `CONNECT host:port` and expects a `2xx` reply head.
async fn connect_handshake<S>(stream: &mut S, host: &str, port: u16) -> NegotiateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_reply_head(stream).await?;
    let status = parse_status_code(&head)?;
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(NegotiateError::Refused(format!(
            "CONNECT answered {status}"
        )))
    }
}

/// Reads response bytes until the blank line ending the head.
async fn read_reply_head<S>(stream: &mut S) -> NegotiateResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(NegotiateError::Protocol(
                "connection closed mid-reply".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_REPLY_HEAD {
            return Err(NegotiateError::Protocol("reply head too large".to_string()));
        }
    }
}

/// Extracts the status code from an `HTTP/1.x NNN ...` status line.
fn parse_status_code(head: &[u8]) -> NegotiateResult<u16> {
    let text = std::str::from_utf8(head)
        .map_err(|_| NegotiateError::Protocol("non-UTF8 reply head".to_string()))?;
    let line = text.lines().next().unwrap_or("");
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| NegotiateError::Protocol(format!("bad status code in {line:?}"))),
        _ => Err(NegotiateError::Protocol(format!(
            "bad status line {line:?}"
        ))),
    }
}

/// SOCKS4 greeting: `[0x04, 0x01, port, ipv4, 0x00]`, success reply 0x5A.
async fn socks4_handshake<S>(stream: &mut S, target: &Target) -> NegotiateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let IpAddr::V4(ip) = target.ip else {
        return Err(NegotiateError::UnsupportedTarget(
            "SOCKS4 cannot address IPv6".to_string(),
        ));
    };

    let mut greeting = Vec::with_capacity(9);
    greeting.extend_from_slice(&[0x04, 0x01]);
    greeting.extend_from_slice(&target.port.to_be_bytes());
    greeting.extend_from_slice(&ip.octets());
    greeting.push(0x00);
    stream.write_all(&greeting).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[1] == 0x5A {
        Ok(())
    } else {
        Err(NegotiateError::Refused(format!(
            "SOCKS4 reply 0x{:02X}",
            reply[1]
        )))
    }
}

/// SOCKS5: method negotiation then a connect request.
async fn socks5_handshake<S>(stream: &mut S, target: &Target) -> NegotiateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Version 5, one method, no authentication.
    stream.write_all(&[0x05, 0x01, 0x00]).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != 0x05 {
        return Err(NegotiateError::Protocol(format!(
            "SOCKS5 bad version 0x{:02X}",
            choice[0]
        )));
    }
    if choice[1] != 0x00 {
        return Err(NegotiateError::Refused(
            "SOCKS5 rejected no-auth method".to_string(),
        ));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    match target.ip {
        IpAddr::V4(ip) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            request.push(0x04);
            request.extend_from_slice(&ip.octets());
        }
    }
    request.extend_from_slice(&target.port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x05 {
        return Err(NegotiateError::Protocol(format!(
            "SOCKS5 bad version 0x{:02X}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(NegotiateError::Refused(format!(
            "SOCKS5 reply 0x{:02X}",
            reply[1]
        )));
    }

    // Drain the bound address so tunneled bytes start clean.
    let addr_len = match reply[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0])
        }
        other => {
            return Err(NegotiateError::Protocol(format!(
                "SOCKS5 bad address type 0x{other:02X}"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::duplex;

    const DEADLINE: Duration = Duration::from_secs(1);

    fn target() -> Target {
        Target::new(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)), 443)
    }

    #[tokio::test]
    async fn http_needs_no_handshake() {
        let (mut client, _server) = duplex(64);
        Negotiator::Http
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connect_accepts_2xx() {
        let (mut client, mut server) = duplex(1024);
        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = server.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            server
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            head
        });

        Negotiator::Https
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap();
        let head = peer.await.unwrap();
        assert!(head.starts_with("CONNECT 93.184.216.34:443 HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn connect_80_pins_the_port() {
        let (mut client, mut server) = duplex(1024);
        let peer = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let n = server.read(&mut buf).await.unwrap();
            server.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        Negotiator::Connect80
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap();
        assert!(peer.await.unwrap().starts_with("CONNECT 93.184.216.34:80 "));
    }

    #[tokio::test]
    async fn connect_rejects_5xx() {
        let (mut client, mut server) = duplex(1024);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                .await
                .unwrap();
        });

        let err = Negotiator::Https
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiateError::Refused(_)));
    }

    #[tokio::test]
    async fn socks4_sends_expected_greeting() {
        let (mut client, mut server) = duplex(64);
        let peer = tokio::spawn(async move {
            let mut greeting = [0u8; 9];
            server.read_exact(&mut greeting).await.unwrap();
            server
                .write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            greeting
        });

        Negotiator::Socks4
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap();

        let greeting = peer.await.unwrap();
        assert_eq!(greeting[0], 0x04);
        assert_eq!(greeting[1], 0x01);
        assert_eq!(u16::from_be_bytes([greeting[2], greeting[3]]), 443);
        assert_eq!(&greeting[4..8], &[93, 184, 216, 34]);
        assert_eq!(greeting[8], 0x00);
    }

    #[tokio::test]
    async fn socks4_rejects_ipv6_targets() {
        let (mut client, _server) = duplex(64);
        let target = Target::new("2001:db8::1".parse().unwrap(), 443);
        let err = Negotiator::Socks4
            .negotiate(&mut client, &target, DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiateError::UnsupportedTarget(_)));
    }

    #[tokio::test]
    async fn socks4_refusal_is_typed() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut greeting = [0u8; 9];
            server.read_exact(&mut greeting).await.unwrap();
            server
                .write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let err = Negotiator::Socks4
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiateError::Refused(_)));
    }

    #[tokio::test]
    async fn socks5_full_exchange() {
        let (mut client, mut server) = duplex(128);
        let peer = tokio::spawn(async move {
            let mut methods = [0u8; 3];
            server.read_exact(&mut methods).await.unwrap();
            assert_eq!(methods, [0x05, 0x01, 0x00]);
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request = [0u8; 10];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x01]);
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            request
        });

        Negotiator::Socks5
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap();

        let request = peer.await.unwrap();
        assert_eq!(&request[4..8], &[93, 184, 216, 34]);
        assert_eq!(u16::from_be_bytes([request[8], request[9]]), 443);
    }

    #[tokio::test]
    async fn socks5_auth_rejection_is_refused() {
        let (mut client, mut server) = duplex(64);
        tokio::spawn(async move {
            let mut methods = [0u8; 3];
            server.read_exact(&mut methods).await.unwrap();
            server.write_all(&[0x05, 0xFF]).await.unwrap();
        });

        let err = Negotiator::Socks5
            .negotiate(&mut client, &target(), DEADLINE)
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiateError::Refused(_)));
    }

    #[tokio::test]
    async fn handshake_deadline_is_enforced() {
        let (mut client, _server) = duplex(64);
        let err = Negotiator::Socks5
            .negotiate(&mut client, &target(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiateError::Timeout(_)));
    }
}
