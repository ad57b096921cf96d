//! Keystone Core
//!
//! Archetype-based entity store:
//! - Entities, components, tags and relation links
//! - Structural changes with constant-time row compaction
//! - Live queries with chunked, contiguous iteration
//! - Batched and deferred mutation
//! - Per-entity snapshot records for external serializers

pub mod config;
pub mod ecs;

pub use config::{PidMode, StoreConfig};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
