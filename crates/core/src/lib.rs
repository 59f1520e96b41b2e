//! Core types and shared functionality for rendergate.
//!
//! This crate provides:
//! - Content-addressed hashing for argument values
//! - Crawl-scoped argument caches (local values and remote keys)
//! - Session cookie jars with HAR-style records
//! - Configuration structures
//! - Crawl statistics counters

pub mod config;
pub mod cookies;
pub mod hash;
pub mod stats;
pub mod store;

pub use config::{ConfigError, GateConfig, SlotPolicy};
pub use cookies::{CookieRecord, SessionJar, SessionRegistry};
pub use hash::{LOCAL_FINGERPRINT_PREFIX, json_hash, local_fingerprint, seeded_hash};
pub use stats::RenderStats;
pub use store::{LocalValueStore, RemoteKeyStore};
