//! # Configuration Module
//!
//! TOML-backed application configuration: the schema with per-subsystem
//! sections and the loader that reads, writes, and default-creates the
//! configuration file.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::AppConfig;
