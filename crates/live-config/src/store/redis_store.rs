//! Redis-backed store channels.
//!
//! The persisted config is a Redis hash (HSET/HGET/HGETALL) and change
//! notifications travel over Redis pub/sub (PUBLISH/SUBSCRIBE).

use super::{CommandChannel, InboundMessage, NotificationChannel, StoreConnector};
use crate::error::LiveConfigResult;
use crate::message::{BroadcastMessage, ConfigEntry};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens Redis connections for a mirror.
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// Create a connector for the given Redis URL.
    ///
    /// The URL is validated here; no connection is made until a channel is opened.
    pub fn new(redis_url: &str) -> LiveConfigResult<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn open_commands(&self, record_key: &str) -> LiveConfigResult<Arc<dyn CommandChannel>> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!(record = %record_key, "Opened Redis command connection");

        Ok(Arc::new(RedisCommandChannel {
            conn,
            record_key: record_key.to_string(),
        }))
    }

    async fn open_notifications(&self) -> LiveConfigResult<Box<dyn NotificationChannel>> {
        let pubsub = self.client.get_async_pubsub().await?;
        info!("Opened Redis subscription connection");

        Ok(Box::new(RedisNotificationChannel { pubsub }))
    }
}

/// Command connection bound to one hash.
pub struct RedisCommandChannel {
    conn: MultiplexedConnection,
    record_key: String,
}

#[async_trait]
impl CommandChannel for RedisCommandChannel {
    async fn write(&self, key: &str, value: &str) -> LiveConfigResult<ConfigEntry> {
        let _: i64 = self
            .conn
            .clone()
            .hset(&self.record_key, key, value)
            .await?;

        debug!(record = %self.record_key, key = %key, "HSET");
        Ok(ConfigEntry::new(key, value))
    }

    async fn read(&self, key: &str) -> LiveConfigResult<Option<ConfigEntry>> {
        let value: Option<String> = self.conn.clone().hget(&self.record_key, key).await?;

        debug!(record = %self.record_key, key = %key, found = value.is_some(), "HGET");
        Ok(value.map(|value| ConfigEntry::new(key, value)))
    }

    async fn read_all(&self) -> LiveConfigResult<Option<HashMap<String, String>>> {
        let entries: HashMap<String, String> = self.conn.clone().hgetall(&self.record_key).await?;

        debug!(record = %self.record_key, fields = entries.len(), "HGETALL");

        // Redis reports a missing hash as an empty one
        if entries.is_empty() {
            Ok(None)
        } else {
            Ok(Some(entries))
        }
    }

    async fn broadcast(&self, topic: &str, message: &BroadcastMessage) -> LiveConfigResult<()> {
        let payload = message.to_json()?;
        let receivers: i64 = self.conn.clone().publish(topic, payload).await?;

        debug!(topic = %topic, key = %message.key, receivers, "PUBLISH");
        Ok(())
    }
}

/// Subscription connection.
pub struct RedisNotificationChannel {
    pubsub: PubSub,
}

#[async_trait]
impl NotificationChannel for RedisNotificationChannel {
    async fn subscribe(&mut self, topic: &str) -> LiveConfigResult<()> {
        self.pubsub.subscribe(topic).await?;
        info!(topic = %topic, "Subscribed");
        Ok(())
    }

    fn into_messages(self: Box<Self>) -> BoxStream<'static, InboundMessage> {
        self.pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let topic = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(InboundMessage { topic, payload }),
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Dropping non-text pub/sub payload");
                        None
                    }
                }
            })
            .boxed()
    }
}
