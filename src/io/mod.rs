//! # IO Module
//!
//! Network-facing building blocks: the direct HTTP requestor, the DNS
//! resolver with its TTL cache, and the per-scheme protocol negotiators.
//!
//! ## Components
//!
//! * **http** - Direct requests for providers, judges, and external IP
//! * **resolver** - Hostname resolution and the external-IP lookup
//! * **negotiate** - Handshake state machines over proxy byte streams

pub mod http;
pub mod negotiate;
pub mod resolver;

pub use http::Requestor;
pub use negotiate::{Negotiator, Target};
pub use resolver::Resolver;
