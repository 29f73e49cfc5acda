//! # Drover Proxy
//!
//! A library for discovering, validating, and rotating public proxies.
//!
//! ## Overview
//!
//! Drover scrapes candidate proxies from public listing sites, validates
//! their protocol behavior (HTTP, HTTPS via `CONNECT`, explicit CONNECT
//! ports, SOCKS4, SOCKS5) and anonymity against judge endpoints, keeps
//! working proxies in a health-ranked pool, and can expose itself as a
//! rotating local proxy server that forwards client traffic through the
//! pool.
//!
//! The three coupled subsystems:
//!
//! * The discovery/validation pipeline: concurrent provider scraping
//!   under a global cap feeding an asynchronous checker
//! * The two-tier proxy pool: newcomers queue and a response-time-ranked
//!   established heap, safe under concurrent insertion and selection
//! * The rotating server: an HTTP/HTTPS/CONNECT listener that selects a
//!   proxy per request, splices bytes, and feeds outcomes back into the
//!   pool
//!
//! ## Examples
//!
//! ```no_run
//! use drover_proxy::orchestration::broker::{Broker, FindOptions};
//! use drover_proxy::definitions::enums::Scheme;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut broker = Broker::with_defaults()?;
//!     let mut found = broker
//!         .find(FindOptions {
//!             schemes: vec![Scheme::Http, Scheme::Socks5],
//!             limit: 10,
//!             ..FindOptions::default()
//!         })
//!         .await?;
//!
//!     while let Some(proxy) = found.recv().await {
//!         println!("{proxy}");
//!     }
//!     broker.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod config;
pub mod definitions;
pub mod inspection;
pub mod io;
pub mod orchestration;
pub mod utils;

// Re-export main types for easier access
pub use config::{AppConfig, ConfigLoader};
pub use definitions::{
    defaults,
    enums::{AnonymityLevel, LogLevel, Scheme},
    errors::{BrokerError, CheckError, NegotiateError, PoolError, ResolveError, ServerError},
    proxy::Proxy,
    source::{Candidate, Provider},
};
pub use inspection::{Judge, JudgeSet};
pub use io::{Negotiator, Requestor, Resolver, Target};
pub use orchestration::{
    Broker, BrokerConfig, Checker, FindOptions, GrabOptions, PoolHandle, ProxyPool, ServeOptions,
    Server,
};
