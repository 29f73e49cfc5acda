//! # Orchestration Module
//!
//! The moving parts of the system: the checker that validates candidate
//! proxies, the health-ranked pool, the rotating server, and the broker
//! that wires them together.
//!
//! ## Components
//!
//! * **broker** - `grab`/`find`/`serve`/`stop` orchestration
//! * **checker** - Per-scheme proxy validation against judges
//! * **pool** - Two-tier priority pool shared by broker and server
//! * **server** - Rotating HTTP/CONNECT listener with the control API
//! * **threading** - Task management and capped fan-out helpers

pub mod broker;
pub mod checker;
pub mod pool;
pub mod server;
pub mod threading;

pub use broker::{Broker, BrokerConfig, FindOptions, GeoLookup, GrabOptions, ServeOptions};
pub use checker::{Checker, CheckerConfig};
pub use pool::{PoolConfig, PoolHandle, ProxyPool};
pub use server::{Server, ServerConfig};
