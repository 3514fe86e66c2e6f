//! Live config: a process-local mirror of a shared configuration set.
//!
//! The config lives in a Redis hash. Every process holding a mirror
//! subscribes to one pub/sub topic; a local `set` is written to the hash
//! and, once acknowledged, broadcast so peers can apply it without polling.
//!
//! # Core Invariants
//!
//! 1. **Persisted wins at start**: values already in the hash override caller defaults
//! 2. **Write-then-publish**: a broadcast is only sent after its write was acknowledged
//! 3. **Last-broadcast-wins**: inbound updates overwrite the local value unconditionally
//! 4. **Two connections**: commands and subscriptions never share a connection
//!
//! # Architecture
//!
//! ```text
//! caller -> LiveConfig -> CommandChannel -> Redis hash / PUBLISH
//!                ^                                   |
//!                |___ NotificationChannel <__ topic _|
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod mirror;
pub mod store;

#[cfg(test)]
mod tests;

pub use config::{LiveConfigOptions, Namespace};
pub use error::{LiveConfigError, LiveConfigResult};
pub use message::{BroadcastMessage, ConfigEntry, ConfigMap};
pub use mirror::{LiveConfig, MirrorEvent, MirrorState, UpdateOrigin};
pub use store::memory::InMemoryStore;
pub use store::redis_store::RedisConnector;
pub use store::{CommandChannel, InboundMessage, NotificationChannel, StoreConnector};
