//! # Rotating Proxy Server
//!
//! A listening proxy endpoint that serves each client request through a
//! proxy pulled from the pool, reports the outcome back into the proxy's
//! health metrics, and re-queues the proxy for future use.
//!
//! ## Overview
//!
//! The listener accepts raw TCP connections and reads one HTTP/1.1
//! request head per connection. Three paths follow:
//!
//! * `Host: proxycontrol` - the control API: proxy removal and history
//!   lookups over plain HTTP on the same listener
//! * `CONNECT host:port` - tunnel mode, served through the
//!   HTTPS/SOCKS5/SOCKS4 scheme family
//! * anything else - forward mode for absolute-URI requests, served
//!   through HTTP/CONNECT:80/SOCKS5/SOCKS4
//!
//! Every successfully proxied response carries exactly one
//! `X-Proxy-Info: host:port` header (tunnel mode puts it in the
//! `200 Connection established` head). A proxy that fails before any
//! bytes reach the client is swapped for another, up to `max_tries`;
//! after first byte, failure terminates the connection. Served requests
//! land in a bounded TTL history cache keyed by URL (forward) or
//! authority (tunnel) for control-API queries.

use crate::definitions::{
    defaults,
    enums::Scheme,
    errors::{ServerError, ServerResult},
    proxy::Proxy,
};
use crate::io::negotiate::{Negotiator, Target};
use crate::io::resolver::Resolver;
use crate::orchestration::pool::PoolHandle;
use crate::orchestration::threading::TaskManager;
use crate::utils;
use ahash::AHashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Rotating server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Proxy swaps allowed before the first byte reaches the client
    pub max_tries: u32,

    /// Deadline for connects, handshakes, and upstream head reads
    pub timeout: Duration,

    /// How long a history entry stays queryable
    pub history_ttl: Duration,

    /// History cache capacity
    pub history_max_entries: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_tries: defaults::server::MAX_TRIES,
            timeout: Duration::from_secs(defaults::DEFAULT_NETWORK_TIMEOUT_SECS),
            history_ttl: Duration::from_secs(defaults::server::HISTORY_TTL_SECS),
            history_max_entries: defaults::server::HISTORY_MAX_ENTRIES,
        }
    }
}

/// Bounded TTL map of `request_key -> proxy_used`.
struct HistoryCache {
    entries: AHashMap<String, (String, Instant)>,
    ttl: Duration,
    cap: usize,
}

impl HistoryCache {
    fn new(ttl: Duration, cap: usize) -> Self {
        HistoryCache {
            entries: AHashMap::new(),
            ttl,
            cap,
        }
    }

    fn insert(&mut self, key: String, proxy: String) {
        if self.entries.len() >= self.cap && !self.entries.contains_key(&key) {
            self.prune();
            if self.entries.len() >= self.cap {
                // Still full of live entries: drop an arbitrary one to
                // stay bounded.
                if let Some(evict) = self.entries.keys().next().cloned() {
                    self.entries.remove(&evict);
                }
            }
        }
        self.entries.insert(key, (proxy, Instant::now()));
    }

    fn get(&mut self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some((proxy, stored)) if stored.elapsed() < self.ttl => Some(proxy.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored)| stored.elapsed() < ttl);
    }
}

/// A parsed HTTP/1.x request head.
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn parse_request_head(bytes: &[u8]) -> ServerResult<RequestHead> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ServerError::BadRequest("non-UTF8 request head".to_string()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| ServerError::BadRequest("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if v.starts_with("HTTP/") => (m, t),
        _ => {
            return Err(ServerError::BadRequest(format!(
                "bad request line {request_line:?}"
            )));
        }
    };

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(ServerError::BadRequest(format!("bad header {line:?}")));
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        headers,
    })
}

/// Reads a request or response head, returning the head bytes and any
/// bytes read past the blank line.
async fn read_head<S>(stream: &mut S) -> ServerResult<(Vec<u8>, Vec<u8>)>
where
    S: AsyncReadExt + Unpin,
{
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find_head_end(&buffer) {
            let leftover = buffer.split_off(pos);
            return Ok((buffer, leftover));
        }
        if buffer.len() > defaults::server::MAX_HEAD_BYTES {
            return Err(ServerError::BadRequest("head too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ServerError::BadRequest("connection closed mid-head".to_string()));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// The rotating proxy listener.
pub struct Server {
    listener: TcpListener,
    pool: PoolHandle,
    resolver: Arc<Resolver>,
    history: Arc<Mutex<HistoryCache>>,
    config: ServerConfig,
}

impl Server {
    /// Binds the listener and wires it to the pool.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` when the address is unavailable.
    pub async fn bind(
        addr: SocketAddr,
        pool: PoolHandle,
        resolver: Arc<Resolver>,
        config: ServerConfig,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(addr, e))?;
        log::info!("listening on {}", listener.local_addr()?);

        let history = Arc::new(Mutex::new(HistoryCache::new(
            config.history_ttl,
            config.history_max_entries,
        )));
        Ok(Server {
            listener,
            pool,
            resolver,
            history,
            config,
        })
    }

    /// The bound address.
    ///
    /// # Errors
    ///
    /// Propagates the underlying socket error.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until `shutdown` flips; in-flight connection
    /// tasks are aborted on the way out, which closes both sockets of any
    /// active splice.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = TaskManager::new();
        let state = Arc::new(ConnectionState {
            pool: self.pool,
            resolver: self.resolver,
            history: self.history,
            config: self.config,
        });

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    connections.reap();
                    match accepted {
                        Ok((stream, peer)) => {
                            log::debug!("accepted {peer}");
                            let state = Arc::clone(&state);
                            connections.spawn(async move {
                                if let Err(err) = handle_connection(state, stream).await {
                                    log::debug!("{peer}: {err}");
                                }
                            });
                        }
                        Err(err) => log::warn!("accept failed: {err}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        connections.cancel_all();
        log::info!("server drained");
    }
}

/// Everything a connection handler needs, shared across tasks.
struct ConnectionState {
    pool: PoolHandle,
    resolver: Arc<Resolver>,
    history: Arc<Mutex<HistoryCache>>,
    config: ServerConfig,
}

async fn handle_connection(state: Arc<ConnectionState>, mut client: TcpStream) -> ServerResult<()> {
    let (head, client_leftover) = read_head(&mut client).await?;
    let request = parse_request_head(&head)?;

    if let Some(host) = request.header("Host") {
        let host = host.split(':').next().unwrap_or(host);
        if host == defaults::server::CONTROL_HOST {
            return handle_control(&state, &request, &mut client).await;
        }
    }

    if request.method.eq_ignore_ascii_case("CONNECT") {
        handle_tunnel(&state, &request, client, client_leftover).await
    } else {
        handle_forward(&state, &request, &head, client, client_leftover).await
    }
}

/// Control API on the reserved `proxycontrol` virtual host.
async fn handle_control(
    state: &ConnectionState,
    request: &RequestHead,
    client: &mut TcpStream,
) -> ServerResult<()> {
    if let Some(addr) = request.target.strip_prefix("/api/remove/") {
        if let Ok((host, port)) = utils::split_host_port(addr) {
            if let Ok(ip) = host.parse() {
                state.pool.remove(ip, port);
                log::info!("control: removed {addr}");
            }
        }
        // Removal silently succeeds whether or not the proxy was pooled.
        client
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await?;
        return Ok(());
    }

    if let Some(key) = request.target.strip_prefix("/api/history/url:") {
        let found = state
            .history
            .lock()
            .expect("history lock poisoned")
            .get(key);
        let body = match found {
            Some(proxy) => serde_json::json!({ "proxy": proxy }).to_string(),
            None => serde_json::json!({ "proxy": null }).to_string(),
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        client.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    client
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
        .await?;
    Ok(())
}

async fn write_bad_gateway(client: &mut TcpStream) -> ServerResult<()> {
    client
        .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
        .await?;
    Ok(())
}

/// Forwards bytes in both directions until either side half-closes or an
/// error occurs. Per-direction byte order is preserved.
async fn splice(client: &mut TcpStream, upstream: &mut TcpStream) -> std::io::Result<u64> {
    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();
    tokio::select! {
        done = tokio::io::copy(&mut upstream_read, &mut client_write) => done,
        done = tokio::io::copy(&mut client_read, &mut upstream_write) => done,
    }
}

/// Picks the first scheme of `family` the proxy supports. The pool only
/// returns proxies matching at least one, so this cannot miss.
fn scheme_for(proxy: &Proxy, family: &[Scheme]) -> Scheme {
    family
        .iter()
        .copied()
        .find(|s| proxy.supports(*s))
        .expect("pool returned a proxy outside the requested family")
}

/// `CONNECT` tunnel mode.
async fn handle_tunnel(
    state: &ConnectionState,
    request: &RequestHead,
    mut client: TcpStream,
    client_leftover: Vec<u8>,
) -> ServerResult<()> {
    let Ok((host, port)) = utils::split_host_port(&request.target) else {
        return Err(ServerError::BadRequest(format!(
            "bad CONNECT target {:?}",
            request.target
        )));
    };

    for _ in 0..state.config.max_tries {
        let mut proxy = match state.pool.get(&Scheme::HTTPS_FAMILY).await {
            Ok(proxy) => proxy,
            Err(err) => {
                log::warn!("no proxy for CONNECT {host}:{port}: {err}");
                return write_bad_gateway(&mut client).await;
            }
        };
        let scheme = scheme_for(&proxy, &Scheme::HTTPS_FAMILY);
        let started = Instant::now();

        match establish_tunnel(state, &proxy, scheme, &host, port).await {
            Ok(mut upstream) => {
                let established = started.elapsed();
                state
                    .history
                    .lock()
                    .expect("history lock poisoned")
                    .insert(format!("{host}:{port}"), proxy.addr().to_string());

                let ok_head = format!(
                    "HTTP/1.1 200 Connection established\r\nX-Proxy-Info: {}\r\n\r\n",
                    proxy.addr()
                );
                client.write_all(ok_head.as_bytes()).await?;
                if !client_leftover.is_empty() {
                    upstream.write_all(&client_leftover).await?;
                }

                match splice(&mut client, &mut upstream).await {
                    Ok(_) => proxy.record_success(scheme, established),
                    Err(err) => {
                        proxy.record_failure(scheme, &format!("splice: {err}"), established);
                    }
                }
                state.pool.put(proxy);
                return Ok(());
            }
            Err(err) => {
                log::debug!("{} {scheme} tunnel failed: {err}", proxy.addr());
                proxy.record_failure(scheme, &err.to_string(), started.elapsed());
                state.pool.put(proxy);
            }
        }
    }

    write_bad_gateway(&mut client).await
}

/// Opens a path to `host:port` through `proxy` for tunnel mode.
async fn establish_tunnel(
    state: &ConnectionState,
    proxy: &Proxy,
    scheme: Scheme,
    host: &str,
    port: u16,
) -> ServerResult<TcpStream> {
    let mut upstream = tokio::time::timeout(state.config.timeout, TcpStream::connect(proxy.addr()))
        .await
        .map_err(|_| ServerError::Upstream(format!("connect timeout to {}", proxy.addr())))??;

    let target = match scheme {
        // CONNECT carries the hostname; no resolution needed.
        Scheme::Https => Target::new(proxy.host, port).with_host(host.to_string()),
        // SOCKS addresses by IP.
        _ => {
            let ip = state
                .resolver
                .resolve(host)
                .await
                .map_err(|e| ServerError::Upstream(e.to_string()))?;
            Target::new(ip, port)
        }
    };

    Negotiator::for_scheme(scheme)
        .negotiate(&mut upstream, &target, state.config.timeout)
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;
    Ok(upstream)
}

/// Plain HTTP forward mode for absolute-URI requests.
async fn handle_forward(
    state: &ConnectionState,
    request: &RequestHead,
    raw_head: &[u8],
    mut client: TcpStream,
    client_leftover: Vec<u8>,
) -> ServerResult<()> {
    let url = url::Url::parse(&request.target)
        .map_err(|_| ServerError::BadRequest(format!("not an absolute URI: {}", request.target)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ServerError::BadRequest("URI without host".to_string()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let request_key = request.target.clone();

    for _ in 0..state.config.max_tries {
        let mut proxy = match state.pool.get(&Scheme::HTTP_FAMILY).await {
            Ok(proxy) => proxy,
            Err(err) => {
                log::warn!("no proxy for {request_key}: {err}");
                return write_bad_gateway(&mut client).await;
            }
        };
        let scheme = scheme_for(&proxy, &Scheme::HTTP_FAMILY);
        let started = Instant::now();

        match establish_forward(
            state,
            &proxy,
            scheme,
            &url,
            &host,
            port,
            raw_head,
            &client_leftover,
        )
        .await
        {
            Ok((mut upstream, response_head, response_leftover)) => {
                let established = started.elapsed();
                state
                    .history
                    .lock()
                    .expect("history lock poisoned")
                    .insert(request_key.clone(), proxy.addr().to_string());

                let annotated = inject_proxy_info(&response_head, &proxy.addr().to_string());
                client.write_all(&annotated).await?;
                if !response_leftover.is_empty() {
                    client.write_all(&response_leftover).await?;
                }

                match splice(&mut client, &mut upstream).await {
                    Ok(_) => proxy.record_success(scheme, established),
                    Err(err) => {
                        proxy.record_failure(scheme, &format!("splice: {err}"), established);
                    }
                }
                state.pool.put(proxy);
                return Ok(());
            }
            Err(err) => {
                log::debug!("{} {scheme} forward failed: {err}", proxy.addr());
                proxy.record_failure(scheme, &err.to_string(), started.elapsed());
                state.pool.put(proxy);
            }
        }
    }

    write_bad_gateway(&mut client).await
}

/// Connects through `proxy`, sends the client's request, and reads the
/// upstream response head. Everything here happens before the first byte
/// reaches the client, so failures are retryable.
#[allow(clippy::too_many_arguments)]
async fn establish_forward(
    state: &ConnectionState,
    proxy: &Proxy,
    scheme: Scheme,
    url: &url::Url,
    host: &str,
    port: u16,
    raw_head: &[u8],
    client_leftover: &[u8],
) -> ServerResult<(TcpStream, Vec<u8>, Vec<u8>)> {
    let mut upstream = tokio::time::timeout(state.config.timeout, TcpStream::connect(proxy.addr()))
        .await
        .map_err(|_| ServerError::Upstream(format!("connect timeout to {}", proxy.addr())))??;

    let request_bytes = match scheme {
        // HTTP proxies take the request exactly as the client sent it:
        // absolute URI and all.
        Scheme::Http => raw_head.to_vec(),
        // Tunneled paths talk to the origin directly, so the request
        // line is rewritten to origin-form.
        _ => {
            let target = match scheme {
                Scheme::Connect80 => Target::new(proxy.host, 80).with_host(host.to_string()),
                _ => {
                    let ip = state
                        .resolver
                        .resolve(host)
                        .await
                        .map_err(|e| ServerError::Upstream(e.to_string()))?;
                    Target::new(ip, port)
                }
            };
            Negotiator::for_scheme(scheme)
                .negotiate(&mut upstream, &target, state.config.timeout)
                .await
                .map_err(|e| ServerError::Upstream(e.to_string()))?;
            rewrite_to_origin_form(raw_head, url)?
        }
    };

    let exchange = async {
        upstream.write_all(&request_bytes).await?;
        if !client_leftover.is_empty() {
            upstream.write_all(client_leftover).await?;
        }
        Ok::<(), std::io::Error>(())
    };
    tokio::time::timeout(state.config.timeout, exchange)
        .await
        .map_err(|_| ServerError::Upstream("send timeout".to_string()))??;

    let (response_head, response_leftover) =
        tokio::time::timeout(state.config.timeout, read_head(&mut upstream))
            .await
            .map_err(|_| ServerError::Upstream("response head timeout".to_string()))??;

    Ok((upstream, response_head, response_leftover))
}

/// Swaps the absolute-URI request line for origin-form, leaving the rest
/// of the head untouched.
fn rewrite_to_origin_form(raw_head: &[u8], url: &url::Url) -> ServerResult<Vec<u8>> {
    let text = std::str::from_utf8(raw_head)
        .map_err(|_| ServerError::BadRequest("non-UTF8 request head".to_string()))?;
    let Some((request_line, rest)) = text.split_once("\r\n") else {
        return Err(ServerError::BadRequest("unterminated request line".to_string()));
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(_target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ServerError::BadRequest(format!(
            "bad request line {request_line:?}"
        )));
    };

    let mut origin = url.path().to_string();
    if let Some(query) = url.query() {
        origin.push('?');
        origin.push_str(query);
    }

    Ok(format!("{method} {origin} {version}\r\n{rest}").into_bytes())
}

/// Inserts `X-Proxy-Info` immediately after the status line.
fn inject_proxy_info(response_head: &[u8], proxy_addr: &str) -> Vec<u8> {
    let Some(line_end) = response_head.windows(2).position(|w| w == b"\r\n") else {
        return response_head.to_vec();
    };
    let mut out = Vec::with_capacity(response_head.len() + 32);
    out.extend_from_slice(&response_head[..line_end + 2]);
    out.extend_from_slice(format!("X-Proxy-Info: {proxy_addr}\r\n").as_bytes());
    out.extend_from_slice(&response_head[line_end + 2..]);
    out
}
