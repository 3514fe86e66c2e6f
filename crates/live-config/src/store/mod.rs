//! Store channels used by the mirror.
//!
//! A mirror talks to the backing store over two independent connections:
//! a command channel for reads, writes and publishes, and a notification
//! channel dedicated to receiving broadcasts. A connection blocked on a
//! subscription cannot issue commands, so the two are never shared.

pub mod memory;
pub mod redis_store;

use crate::error::LiveConfigResult;
use crate::message::{BroadcastMessage, ConfigEntry};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// A raw message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Point reads, writes and publishes against one persisted hash.
///
/// None of the operations retry.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Upsert `key -> value` in the hash.
    async fn write(&self, key: &str, value: &str) -> LiveConfigResult<ConfigEntry>;

    /// Read one field; `None` if absent.
    async fn read(&self, key: &str) -> LiveConfigResult<Option<ConfigEntry>>;

    /// Read the whole hash; `None` if it holds no fields.
    async fn read_all(&self) -> LiveConfigResult<Option<HashMap<String, String>>>;

    /// Serialize `message` and publish it on `topic`.
    async fn broadcast(&self, topic: &str, message: &BroadcastMessage) -> LiveConfigResult<()>;
}

/// A long-lived subscription connection.
#[async_trait]
pub trait NotificationChannel: Send {
    /// Register interest in `topic`.
    async fn subscribe(&mut self, topic: &str) -> LiveConfigResult<()>;

    /// Consume the channel into a stream of inbound messages.
    ///
    /// The stream ends when the underlying connection is lost.
    fn into_messages(self: Box<Self>) -> BoxStream<'static, InboundMessage>;
}

/// Opens the connection pair for one mirror.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open a command connection bound to the hash named `record_key`.
    async fn open_commands(&self, record_key: &str) -> LiveConfigResult<Arc<dyn CommandChannel>>;

    /// Open a dedicated subscription connection.
    async fn open_notifications(&self) -> LiveConfigResult<Box<dyn NotificationChannel>>;
}
