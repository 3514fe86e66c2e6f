//! Behaviour tests for the live config mirror.
//!
//! All suites run against `InMemoryStore`, which stands in for one shared
//! Redis instance, so several mirrors in one test behave like peers in a
//! fleet.
//!
//! - `harness.rs`     - Shared fixtures and wait helpers
//! - `start.rs`       - Startup merge of defaults and persisted state
//! - `set.rs`         - Write-then-broadcast
//! - `get.rs`         - Reads that bypass the local map
//! - `live_update.rs` - Applying inbound broadcasts
//! - `failures.rs`    - Error propagation, timeouts and start retry

mod get;
