//! # Broker Module
//!
//! The orchestrator tying discovery, validation, pooling, and serving
//! together.
//!
//! ## Overview
//!
//! * [`Broker::grab`] scrapes providers under a concurrency cap, dedups
//!   by scraped `(host, port)`, resolves hostnames, applies the country
//!   filter, and streams unchecked proxies to the caller.
//! * [`Broker::find`] runs the same discovery front but pushes every
//!   candidate through the checker, emitting only proxies with at least
//!   one validated scheme.
//! * [`Broker::serve`] keeps a [`ProxyPool`] filled with checked proxies
//!   and runs the rotating [`Server`] on top of it, refilling whenever
//!   the pool drops below `min_queue`.
//! * [`Broker::stop`] cancels provider fetches, checker attempts, and the
//!   accept loop, joining children within the cancellation window.
//!
//! Checker startup is fatal when the external IP cannot be determined or
//! a requested scheme has no working judge; everything after startup
//! degrades per candidate, never globally.

use crate::definitions::{
    defaults,
    enums::{AnonymityLevel, Scheme},
    errors::BrokerResult,
    proxy::Proxy,
    source::{Candidate, Provider},
};
use crate::inspection::judgement::JudgeSet;
use crate::io::http::Requestor;
use crate::io::resolver::Resolver;
use crate::orchestration::checker::{Checker, CheckerConfig};
use crate::orchestration::pool::{PoolConfig, PoolHandle, ProxyPool};
use crate::orchestration::server::{Server, ServerConfig};
use crate::orchestration::threading::{self, TaskManager};
use ahash::AHashSet;
use futures::StreamExt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Opaque country-of-IP function; GeoIP backends plug in here.
pub type GeoLookup = Arc<dyn Fn(IpAddr) -> Option<String> + Send + Sync>;

/// Broker pacing and concurrency settings.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Providers fetched simultaneously
    pub max_concurrent_providers: usize,

    /// Proxies checked in parallel
    pub max_conn: usize,

    /// Idle pause between refill cycles in `serve` mode
    pub grab_pause: Duration,

    /// Window children get to acknowledge cancellation
    pub cancel_window: Duration,

    /// Checker settings applied by `find` and `serve`
    pub checker: CheckerConfig,

    /// Pool thresholds applied by `serve`
    pub pool: PoolConfig,

    /// Server settings applied by `serve`
    pub server: ServerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            max_concurrent_providers: defaults::broker::MAX_CONCURRENT_PROVIDERS,
            max_conn: defaults::DEFAULT_MAX_CONN,
            grab_pause: Duration::from_secs(defaults::broker::GRAB_PAUSE_SECS),
            cancel_window: Duration::from_secs(defaults::broker::CANCEL_WINDOW_SECS),
            checker: CheckerConfig::default(),
            pool: PoolConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Options for a `grab` run.
#[derive(Clone, Default)]
pub struct GrabOptions {
    /// Stop after this many proxies; 0 means exhaust the providers
    pub limit: usize,

    /// Country codes to keep; empty keeps everything
    pub countries: Vec<String>,
}

/// Options for a `find` run.
#[derive(Clone)]
pub struct FindOptions {
    /// Schemes to validate each candidate against
    pub schemes: Vec<Scheme>,

    /// Stop after this many validated proxies; 0 means exhaust
    pub limit: usize,

    /// Country codes to keep; empty keeps everything
    pub countries: Vec<String>,

    /// Anonymity levels to keep; empty keeps everything. Schemes with
    /// inherent anonymity (SOCKS, explicit CONNECT) always pass.
    pub anonymity: Vec<AnonymityLevel>,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            schemes: vec![Scheme::Http, Scheme::Https],
            limit: 0,
            countries: Vec::new(),
            anonymity: Vec::new(),
        }
    }
}

/// Options for a `serve` run.
#[derive(Clone)]
pub struct ServeOptions {
    /// Address the rotating server binds
    pub bind: SocketAddr,

    /// Schemes to validate candidates against
    pub schemes: Vec<Scheme>,

    /// Pool size below which a refill cycle starts
    pub min_queue: usize,

    /// Country codes to keep; empty keeps everything
    pub countries: Vec<String>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        ServeOptions {
            bind: "127.0.0.1:8000".parse().expect("valid literal"),
            schemes: vec![Scheme::Http, Scheme::Https],
            min_queue: defaults::broker::MIN_QUEUE,
            countries: Vec::new(),
        }
    }
}

/// Shared context cloned into discovery tasks.
#[derive(Clone)]
struct DiscoveryCtx {
    providers: Arc<tokio::sync::Mutex<Vec<Provider>>>,
    requestor: Requestor,
    resolver: Arc<Resolver>,
    geo: Option<GeoLookup>,
    seen: Arc<Mutex<AHashSet<(String, u16)>>>,
    max_concurrent_providers: usize,
}

/// The orchestrator.
pub struct Broker {
    ctx: DiscoveryCtx,
    config: BrokerConfig,
    tasks: TaskManager,
    pools: Vec<PoolHandle>,
    shutdown: watch::Sender<bool>,
}

impl Broker {
    /// Creates a broker over a provider set.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(providers: Vec<Provider>, config: BrokerConfig) -> BrokerResult<Self> {
        let requestor = Requestor::new()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Broker {
            ctx: DiscoveryCtx {
                providers: Arc::new(tokio::sync::Mutex::new(providers)),
                requestor,
                resolver: Arc::new(Resolver::new()),
                geo: None,
                seen: Arc::new(Mutex::new(AHashSet::new())),
                max_concurrent_providers: config.max_concurrent_providers,
            },
            config,
            tasks: TaskManager::new(),
            pools: Vec::new(),
            shutdown,
        })
    }

    /// Creates a broker over the built-in provider table with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn with_defaults() -> BrokerResult<Self> {
        Self::new(
            crate::definitions::source::default_providers(),
            BrokerConfig::default(),
        )
    }

    /// Installs the country-of-IP lookup used by the country filter.
    pub fn set_geo_lookup(&mut self, geo: GeoLookup) {
        self.ctx.geo = Some(geo);
    }

    /// Scrapes providers and streams deduplicated, resolved proxies
    /// without checking them.
    pub fn grab(&mut self, opts: GrabOptions) -> mpsc::Receiver<Proxy> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.subscribe();
        self.tasks.spawn(async move {
            run_grab(ctx, opts, out_tx, shutdown).await;
        });
        out_rx
    }

    /// Scrapes, checks, and streams proxies with at least one validated
    /// scheme.
    ///
    /// # Errors
    ///
    /// Fatal at startup when the external IP cannot be determined or a
    /// requested scheme lacks judge coverage.
    pub async fn find(&mut self, opts: FindOptions) -> BrokerResult<mpsc::Receiver<Proxy>> {
        let checker = self.startup_checker(&opts.schemes).await?;
        Ok(self.find_with(checker, opts))
    }

    /// `find` with an injected, already-probed checker.
    pub fn find_with(&mut self, checker: Arc<Checker>, opts: FindOptions) -> mpsc::Receiver<Proxy> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let ctx = self.ctx.clone();
        let max_conn = self.config.max_conn;
        let shutdown = self.shutdown.subscribe();
        self.tasks.spawn(async move {
            run_find(ctx, checker, opts, max_conn, out_tx, shutdown).await;
        });
        out_rx
    }

    /// Starts the rotating server and keeps its pool refilled until
    /// `stop`. Returns the bound address and the pool handle.
    ///
    /// # Errors
    ///
    /// Fatal on checker startup failure or when the address cannot be
    /// bound.
    pub async fn serve(&mut self, opts: ServeOptions) -> BrokerResult<(SocketAddr, PoolHandle)> {
        let checker = self.startup_checker(&opts.schemes).await?;
        self.serve_with(checker, opts).await
    }

    /// `serve` with an injected, already-probed checker.
    ///
    /// # Errors
    ///
    /// Returns an error when the listen address cannot be bound.
    pub async fn serve_with(
        &mut self,
        checker: Arc<Checker>,
        opts: ServeOptions,
    ) -> BrokerResult<(SocketAddr, PoolHandle)> {
        let pool = ProxyPool::new(self.config.pool.clone());
        self.pools.push(Arc::clone(&pool));

        let server = Server::bind(
            opts.bind,
            Arc::clone(&pool),
            Arc::clone(&self.ctx.resolver),
            self.config.server.clone(),
        )
        .await?;
        let addr = server.local_addr()?;

        let server_shutdown = self.shutdown.subscribe();
        self.tasks.spawn(async move {
            server.run(server_shutdown).await;
        });

        let ctx = self.ctx.clone();
        let refill_pool = Arc::clone(&pool);
        let max_conn = self.config.max_conn;
        let grab_pause = self.config.grab_pause;
        let shutdown = self.shutdown.subscribe();
        self.tasks.spawn(async move {
            run_refill(ctx, checker, opts, refill_pool, max_conn, grab_pause, shutdown).await;
        });

        Ok((addr, pool))
    }

    /// Cancels everything: provider fetches, checker attempts, the accept
    /// loop, and any refill cycle. Children get the cancellation window
    /// before being detached; the dedup filter is cleared. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        for pool in self.pools.drain(..) {
            pool.close();
        }
        self.tasks.join_within(self.config.cancel_window).await;
        self.ctx
            .seen
            .lock()
            .expect("dedup lock poisoned")
            .clear();
        log::debug!("broker stopped");
    }

    /// Builds the checker: external IP (fatal on failure), judge probing,
    /// and the per-scheme coverage invariant.
    async fn startup_checker(&self, schemes: &[Scheme]) -> BrokerResult<Arc<Checker>> {
        let external_ip = Resolver::external_ip(&self.ctx.requestor).await?;

        let mut judges = JudgeSet::new_default();
        judges.probe_all(&self.ctx.requestor, external_ip).await;
        judges.ensure_coverage(schemes)?;

        Ok(Arc::new(Checker::new(
            Arc::new(judges),
            Arc::clone(&self.ctx.resolver),
            external_ip,
            self.config.checker.clone(),
        )))
    }
}

/// Fetches every provider once, capped, pushing candidates into `tx`.
/// Provider statistics are written back after each fetch.
async fn run_provider_cycle(ctx: &DiscoveryCtx, tx: mpsc::Sender<Candidate>) {
    let snapshot: Vec<(usize, Provider)> = ctx
        .providers
        .lock()
        .await
        .iter()
        .cloned()
        .enumerate()
        .collect();
    if snapshot.is_empty() {
        log::warn!("no providers configured");
        return;
    }

    let providers_ref = Arc::clone(&ctx.providers);
    let requestor = ctx.requestor.clone();
    threading::run_concurrent_batch(
        snapshot,
        ctx.max_concurrent_providers,
        move |(idx, mut provider)| {
            let tx = tx.clone();
            let requestor = requestor.clone();
            let providers_ref = Arc::clone(&providers_ref);
            async move {
                match provider.fetch(&requestor).await {
                    Ok(candidates) => {
                        for candidate in candidates {
                            if tx.send(candidate).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => log::warn!("{}: {err}", provider.url),
                }
                let mut providers = providers_ref.lock().await;
                if let Some(slot) = providers.get_mut(idx) {
                    *slot = provider;
                }
            }
        },
    )
    .await;
}

/// Dedups, resolves, and geo-filters one candidate into a `Proxy`.
async fn admit_candidate(ctx: &DiscoveryCtx, candidate: Candidate) -> Option<Proxy> {
    {
        let mut seen = ctx.seen.lock().expect("dedup lock poisoned");
        if !seen.insert((candidate.host.clone(), candidate.port)) {
            return None;
        }
    }

    let ip = match ctx.resolver.resolve(&candidate.host).await {
        Ok(ip) => ip,
        Err(err) => {
            log::debug!("dropping {}:{}: {err}", candidate.host, candidate.port);
            return None;
        }
    };

    let mut proxy = Proxy::new(ip, candidate.port);
    if let Some(geo) = &ctx.geo {
        proxy.country = geo(ip);
    }
    Some(proxy)
}

fn country_allowed(proxy: &Proxy, countries: &[String]) -> bool {
    if countries.is_empty() {
        return true;
    }
    match &proxy.country {
        Some(country) => countries.iter().any(|c| c.eq_ignore_ascii_case(country)),
        // Without a geo verdict the filter cannot exclude.
        None => true,
    }
}

/// A validated proxy passes the anonymity filter when any of its schemes
/// reached a requested level; schemes whose anonymity is inherent always
/// qualify.
fn anonymity_allowed(proxy: &Proxy, levels: &[AnonymityLevel]) -> bool {
    if levels.is_empty() {
        return true;
    }
    proxy.types.schemes().iter().any(|scheme| {
        match proxy.types.level(*scheme) {
            Some(level) => levels.contains(&level),
            None => true,
        }
    })
}

async fn run_grab(
    ctx: DiscoveryCtx,
    opts: GrabOptions,
    out_tx: mpsc::Sender<Proxy>,
    shutdown: watch::Receiver<bool>,
) {
    let (cand_tx, mut cand_rx) = mpsc::channel(defaults::broker::CANDIDATE_QUEUE_CAP);
    let fetch_ctx = ctx.clone();
    let fetcher = tokio::spawn(async move {
        run_provider_cycle(&fetch_ctx, cand_tx).await;
    });

    let mut emitted = 0usize;
    while let Some(candidate) = cand_rx.recv().await {
        if *shutdown.borrow() {
            break;
        }
        let Some(proxy) = admit_candidate(&ctx, candidate).await else {
            continue;
        };
        if !country_allowed(&proxy, &opts.countries) {
            continue;
        }
        if out_tx.send(proxy).await.is_err() {
            break;
        }
        emitted += 1;
        if opts.limit != 0 && emitted >= opts.limit {
            break;
        }
    }

    fetcher.abort();
    let _ = fetcher.await;
    log::info!("grab finished: {emitted} proxies");
}

async fn run_find(
    ctx: DiscoveryCtx,
    checker: Arc<Checker>,
    opts: FindOptions,
    max_conn: usize,
    out_tx: mpsc::Sender<Proxy>,
    shutdown: watch::Receiver<bool>,
) {
    let (cand_tx, cand_rx) = mpsc::channel(defaults::broker::CANDIDATE_QUEUE_CAP);
    let fetch_ctx = ctx.clone();
    let fetcher = tokio::spawn(async move {
        run_provider_cycle(&fetch_ctx, cand_tx).await;
    });

    let candidates = futures::stream::unfold(cand_rx, |mut rx| async move {
        rx.recv().await.map(|candidate| (candidate, rx))
    });

    let check_ctx = ctx.clone();
    let schemes = opts.schemes.clone();
    let checked = candidates
        .map(|candidate| {
            let ctx = check_ctx.clone();
            let checker = Arc::clone(&checker);
            let schemes = schemes.clone();
            async move {
                let mut proxy = admit_candidate(&ctx, candidate).await?;
                checker.check(&mut proxy, &schemes).await;
                if proxy.types.is_empty() {
                    None
                } else {
                    Some(proxy)
                }
            }
        })
        .buffer_unordered(max_conn.max(1));
    let mut checked = std::pin::pin!(checked);

    let mut emitted = 0usize;
    while let Some(result) = checked.next().await {
        if *shutdown.borrow() {
            break;
        }
        let Some(proxy) = result else { continue };
        if !country_allowed(&proxy, &opts.countries) {
            continue;
        }
        if !anonymity_allowed(&proxy, &opts.anonymity) {
            continue;
        }
        if out_tx.send(proxy).await.is_err() {
            break;
        }
        emitted += 1;
        if opts.limit != 0 && emitted >= opts.limit {
            break;
        }
    }

    fetcher.abort();
    let _ = fetcher.await;
    log::info!("find finished: {emitted} proxies");
}

/// The `serve` refill cycle: whenever the pool is below `min_queue`, run
/// one full discovery+check pass pushing results in, then idle for the
/// grab pause.
async fn run_refill(
    ctx: DiscoveryCtx,
    checker: Arc<Checker>,
    opts: ServeOptions,
    pool: PoolHandle,
    max_conn: usize,
    grab_pause: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if pool.len() < opts.min_queue {
            log::info!(
                "pool at {}/{}, starting refill cycle",
                pool.len(),
                opts.min_queue
            );
            // Each cycle may rediscover proxies dropped from the pool.
            ctx.seen.lock().expect("dedup lock poisoned").clear();

            let (cand_tx, cand_rx) = mpsc::channel(defaults::broker::CANDIDATE_QUEUE_CAP);
            let fetch_ctx = ctx.clone();
            let fetcher = tokio::spawn(async move {
                run_provider_cycle(&fetch_ctx, cand_tx).await;
            });

            let candidates = futures::stream::unfold(cand_rx, |mut rx| async move {
                rx.recv().await.map(|candidate| (candidate, rx))
            });
            let check_ctx = ctx.clone();
            let schemes = opts.schemes.clone();
            let checker = Arc::clone(&checker);
            let checked = candidates
                .map(|candidate| {
                    let ctx = check_ctx.clone();
                    let checker = Arc::clone(&checker);
                    let schemes = schemes.clone();
                    async move {
                        let mut proxy = admit_candidate(&ctx, candidate).await?;
                        checker.check(&mut proxy, &schemes).await;
                        if proxy.types.is_empty() {
                            None
                        } else {
                            Some(proxy)
                        }
                    }
                })
                .buffer_unordered(max_conn.max(1));
            let mut checked = std::pin::pin!(checked);

            while let Some(result) = checked.next().await {
                if *shutdown.borrow() {
                    break;
                }
                if let Some(proxy) = result {
                    if country_allowed(&proxy, &opts.countries) {
                        pool.put(proxy);
                    }
                }
            }

            fetcher.abort();
            let _ = fetcher.await;
        }

        tokio::select! {
            () = tokio::time::sleep(grab_pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::source::Provider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A loopback SOCKS5 proxy that completes handshakes forever.
    async fn spawn_looping_socks5() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut methods = [0u8; 3];
                    if stream.read_exact(&mut methods).await.is_err() {
                        return;
                    }
                    let _ = stream.write_all(&[0x05, 0x00]).await;
                    let mut head = [0u8; 4];
                    if stream.read_exact(&mut head).await.is_err() {
                        return;
                    }
                    let mut rest = [0u8; 6];
                    if stream.read_exact(&mut rest).await.is_err() {
                        return;
                    }
                    let _ = stream
                        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                        .await;
                });
            }
        });
        addr
    }

    /// Serves `body` to every HTTP request on a loopback listener.
    async fn spawn_list_page(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}/list")
    }

    fn provider_for(url: &str) -> Provider {
        Provider::new(
            url.to_string(),
            defaults::regex_patterns::IP_PORT.to_string(),
        )
        .unwrap()
    }

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            cancel_window: Duration::from_millis(200),
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn grab_emits_unchecked_proxies_from_a_provider() {
        let url = spawn_list_page("1.2.3.4:8080\n5.6.7.8:3128\n").await;
        let mut broker = Broker::new(vec![provider_for(&url)], test_config()).unwrap();

        let mut rx = broker.grab(GrabOptions {
            limit: 10,
            ..GrabOptions::default()
        });

        let mut got = Vec::new();
        while let Some(proxy) = rx.recv().await {
            assert!(proxy.types.is_empty());
            got.push(format!("{}:{}", proxy.host, proxy.port));
        }
        got.sort();
        assert_eq!(got, ["1.2.3.4:8080", "5.6.7.8:3128"]);
        broker.stop().await;
    }

    #[tokio::test]
    async fn grab_respects_the_limit() {
        let url = spawn_list_page("1.1.1.1:80\n2.2.2.2:80\n3.3.3.3:80\n").await;
        let mut broker = Broker::new(vec![provider_for(&url)], test_config()).unwrap();

        let mut rx = broker.grab(GrabOptions {
            limit: 2,
            ..GrabOptions::default()
        });
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
        broker.stop().await;
    }

    #[tokio::test]
    async fn duplicates_across_providers_are_suppressed() {
        let first = spawn_list_page("9.9.9.9:80\n1.2.3.4:8080\n").await;
        let second = spawn_list_page("1.2.3.4:8080\n8.8.8.8:80\n").await;
        let mut broker = Broker::new(
            vec![provider_for(&first), provider_for(&second)],
            test_config(),
        )
        .unwrap();

        let mut rx = broker.grab(GrabOptions::default());
        let mut got = Vec::new();
        while let Some(proxy) = rx.recv().await {
            got.push(format!("{}:{}", proxy.host, proxy.port));
        }
        got.sort();
        assert_eq!(got, ["1.2.3.4:8080", "8.8.8.8:80", "9.9.9.9:80"]);
        broker.stop().await;
    }

    #[tokio::test]
    async fn country_filter_drops_known_mismatches() {
        let url = spawn_list_page("1.2.3.4:8080\n5.6.7.8:3128\n").await;
        let mut broker = Broker::new(vec![provider_for(&url)], test_config()).unwrap();
        broker.set_geo_lookup(Arc::new(|ip: IpAddr| {
            if ip.to_string().starts_with("1.") {
                Some("US".to_string())
            } else {
                Some("DE".to_string())
            }
        }));

        let mut rx = broker.grab(GrabOptions {
            countries: vec!["US".to_string()],
            ..GrabOptions::default()
        });
        let mut got = Vec::new();
        while let Some(proxy) = rx.recv().await {
            got.push(proxy.host.to_string());
        }
        assert_eq!(got, ["1.2.3.4"]);
        broker.stop().await;
    }

    #[test]
    fn anonymity_filter_passes_inherent_schemes() {
        let mut socks = Proxy::new("10.0.0.1".parse().unwrap(), 1080);
        socks.types.insert(Scheme::Socks5, None);
        assert!(anonymity_allowed(&socks, &[AnonymityLevel::High]));

        let mut transparent = Proxy::new("10.0.0.2".parse().unwrap(), 8080);
        transparent
            .types
            .insert(Scheme::Http, Some(AnonymityLevel::Transparent));
        assert!(!anonymity_allowed(&transparent, &[AnonymityLevel::High]));
        assert!(anonymity_allowed(&transparent, &[]));
    }

    #[tokio::test]
    async fn serve_refills_the_pool_from_providers() {
        let socks = spawn_looping_socks5().await;
        let body: &'static str = Box::leak(format!("{socks}\n").into_boxed_str());
        let url = spawn_list_page(body).await;

        let mut broker = Broker::new(
            vec![provider_for(&url)],
            BrokerConfig {
                grab_pause: Duration::from_millis(50),
                cancel_window: Duration::from_millis(200),
                ..BrokerConfig::default()
            },
        )
        .unwrap();

        let mut judges = JudgeSet::from_urls(&["http://192.0.2.10/azenv.php"]);
        judges.force_all_working();
        let checker = Arc::new(Checker::new(
            Arc::new(judges),
            Arc::new(Resolver::new()),
            "198.51.100.7".parse().unwrap(),
            CheckerConfig {
                timeout: Duration::from_secs(2),
                max_tries: 1,
            },
        ));

        let (addr, pool) = broker
            .serve_with(
                checker,
                ServeOptions {
                    bind: "127.0.0.1:0".parse().unwrap(),
                    schemes: vec![Scheme::Socks5],
                    min_queue: 1,
                    countries: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);

        let filled = async {
            while pool.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), filled)
            .await
            .expect("refill cycle never validated the mock proxy");

        broker.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let url = spawn_list_page("1.2.3.4:8080\n").await;
        let mut broker = Broker::new(vec![provider_for(&url)], test_config()).unwrap();
        let _rx = broker.grab(GrabOptions::default());
        broker.stop().await;
        broker.stop().await;
        assert!(broker.tasks.is_empty());
    }
}
