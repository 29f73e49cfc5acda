//! # Default Configuration Values
//!
//! Default constants for the proxy discovery, validation, pooling, and
//! serving subsystems. These serve as sensible starting points when
//! explicit values are not provided through configuration.
//!
//! ## Categories
//!
//! * **Judges** - Echo endpoints used to probe proxy anonymity
//! * **External IP** - Endpoints that report this host's public address
//! * **User Agents** - Browser User-Agent strings rotated on requests
//! * **Timeouts** - Deadlines for connects, handshakes, and probes
//! * **Pool** - Tiering and health thresholds for the proxy pool
//! * **Broker** - Concurrency caps and refill pacing
//! * **Server** - Retry and history-cache settings
//! * **Regular Expressions** - Patterns for extracting proxy candidates

/// Judge endpoints that echo request headers and the observed client IP.
///
/// Each judge is probed directly at startup; judges that fail probing are
/// excluded from rotation. The list mixes azenv-style header dumps with
/// JSON echo services so both parser paths stay exercised.
pub const PROXY_JUDGE_URLS: &[&str] = &[
    "http://proxyjudge.us/azenv.php",
    "http://azenv.net",
    "http://httpheader.net/azenv.php",
    "http://httpbin.org/get?show_env",
    "http://mojeip.net.pl/asdfa/azenv.php",
];

/// Endpoints that answer with the caller's public IP in plain text.
///
/// Queried once at startup, first success wins. The external IP is the
/// baseline for anonymity classification.
pub const EXTERNAL_IP_URLS: &[&str] = &[
    "https://api.ipify.org",
    "http://icanhazip.com",
    "http://ident.me",
    "http://ipecho.net/plain",
];

/// Default User-Agent strings rotated when making requests
///
/// Using different User-Agents helps avoid detection and blocks when
/// scraping many provider pages.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    // Chrome
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (X11; Linux i686; rv:124.0) Gecko/20100101 Firefox/124.0",
    // Edge
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/122.0.2365.80 Safari/537.36 Edg/122.0.2365.80",
    // Safari
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    // Text browsers
    "Lynx/2.9.0dev.11 libwww-FM/2.14 SSL-MM/1.4.1 GNUTLS/3.6.13",
    "Links (2.28; Linux x86_64; GNU C 9.3.0; text)",
];

/// Default timeout in seconds for direct HTTP requests (providers, judge
/// probes, external IP lookup)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default deadline in seconds for every per-proxy network operation:
/// connect, handshake, judge request, splice idle
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 8;

/// Default number of validation attempts per (proxy, scheme)
pub const DEFAULT_MAX_TRIES: u32 = 3;

/// Default number of proxies validated in parallel by the checker
pub const DEFAULT_MAX_CONN: usize = 200;

/// Seconds a resolved hostname stays in the DNS cache
pub const DEFAULT_DNS_TTL_SECS: u64 = 300;

/// Number of recent request durations retained per proxy for the running
/// average
pub const RUNTIME_WINDOW: usize = 16;

/// Number of diagnostic events retained in a proxy's log
pub const PROXY_LOG_CAP: usize = 64;

/// Proxy pool tiering and health thresholds
pub mod pool {
    /// Requests a proxy must accumulate before it is health-ranked in the
    /// established tier
    pub const MIN_REQ_PROXY: u32 = 5;

    /// Error-rate ceiling; crossing it discards the proxy permanently
    pub const MAX_ERROR_RATE: f64 = 0.5;

    /// Average response time ceiling in seconds for the established tier
    pub const MAX_RESP_TIME_SECS: f64 = 8.0;

    /// Seconds a `get` call waits on an exhausted pool before failing
    /// with `NoProxyAvailable`
    pub const WAIT_SECS: u64 = 5;

    /// Multiplier on tier length capping re-pushes per `get` call
    pub const RECYCLE_CAP_FACTOR: usize = 3;

    /// Priority penalty in seconds added when a popped proxy is re-pushed
    /// because it does not support the requested scheme
    pub const REPUSH_PENALTY_SECS: f64 = 0.1;
}

/// Broker orchestration constants
pub mod broker {
    /// Maximum providers fetched simultaneously
    pub const MAX_CONCURRENT_PROVIDERS: usize = 3;

    /// Idle seconds between refill cycles in `serve` mode
    pub const GRAB_PAUSE_SECS: u64 = 30;

    /// Capacity of the bounded candidate queue between providers and the
    /// checker
    pub const CANDIDATE_QUEUE_CAP: usize = 512;

    /// Pool size below which `serve` starts a refill cycle
    pub const MIN_QUEUE: usize = 5;

    /// Seconds the broker waits for child tasks to acknowledge
    /// cancellation before detaching them
    pub const CANCEL_WINDOW_SECS: u64 = 5;
}

/// Rotating server constants
pub mod server {
    /// Retries with another proxy before any bytes reach the client
    pub const MAX_TRIES: u32 = 3;

    /// Seconds an entry stays in the request-history cache
    pub const HISTORY_TTL_SECS: u64 = 600;

    /// Maximum entries in the request-history cache
    pub const HISTORY_MAX_ENTRIES: usize = 1000;

    /// Upper bound in bytes for a client request head
    pub const MAX_HEAD_BYTES: usize = 16 * 1024;

    /// Virtual host reserved for the control API
    pub const CONTROL_HOST: &str = "proxycontrol";
}

/// Regex patterns for extracting proxies from provider pages
pub mod regex_patterns {
    /// Basic IP:PORT pattern
    ///
    /// Matches simple IP:PORT format like "127.0.0.1:8080"
    pub const IP_PORT: &str = r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{2,5})";

    /// Pattern with proxy type (http|https|socks4|socks5)://ip:port
    ///
    /// Matches protocol-specified proxies like "http://127.0.0.1:8080"
    pub const TYPED_PROXY: &str =
        r"(https?|socks[45])://(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{2,5})";
}
