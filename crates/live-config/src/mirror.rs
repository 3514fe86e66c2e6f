//! The live config mirror.
//!
//! Owns the local config map and keeps it in sync with the persisted hash
//! and with every other process attached to the same namespace:
//!
//! ```text
//! set()  -> command channel -> HSET (acked) -> PUBLISH topic
//! topic  -> notification channel -> listener task -> local map
//! ```

use crate::config::LiveConfigOptions;
use crate::error::{LiveConfigError, LiveConfigResult};
use crate::message::{persisted_text, BroadcastMessage, ConfigEntry, ConfigMap};
use crate::store::redis_store::RedisConnector;
use crate::store::{CommandChannel, InboundMessage, StoreConnector};
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 100;

/// Lifecycle of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Created, `start` not called yet.
    Constructed,
    /// `start` in progress.
    Starting,
    /// Merged and receiving broadcasts.
    Ready,
    /// `start` failed or the subscription was lost; `start` may be called again.
    Failed,
    /// `close` released the connections; `start` may be called again.
    Closed,
}

/// Where an applied update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// This process called `set`.
    Local,
    /// A broadcast received on the topic.
    Broadcast,
}

/// Events emitted by the mirror.
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    /// `start` completed with the merged config.
    Started(ConfigMap),
    /// A key in the local map changed.
    Updated {
        key: String,
        value: Value,
        origin: UpdateOrigin,
    },
    /// A failure with no caller waiting on it (lost subscription,
    /// failed background publish).
    Error(String),
}

/// Connections and tasks owned by a started mirror.
struct Channels {
    commands: Arc<dyn CommandChannel>,
    publish_tx: Option<mpsc::UnboundedSender<BroadcastMessage>>,
    listener: JoinHandle<()>,
    publisher: Option<JoinHandle<()>>,
}

impl Channels {
    /// Close the broadcast queue and wait for the publisher to send what is
    /// already queued.
    async fn shutdown(mut self) {
        self.listener.abort();
        self.publish_tx.take();
        if let Some(publisher) = self.publisher.take() {
            let _ = publisher.await;
        }
    }
}

impl Drop for Channels {
    // The publisher is detached and exits once the queue sender is gone
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Process-local mirror of a shared config set.
pub struct LiveConfig {
    options: LiveConfigOptions,
    connector: Arc<dyn StoreConnector>,
    config: Arc<RwLock<ConfigMap>>,
    state: Arc<RwLock<MirrorState>>,
    channels: Mutex<Option<Channels>>,
    event_tx: broadcast::Sender<MirrorEvent>,
}

impl LiveConfig {
    /// Create a Redis-backed mirror. Connections are opened by [`LiveConfig::start`].
    pub fn new(options: LiveConfigOptions) -> LiveConfigResult<Self> {
        let connector = RedisConnector::new(&options.redis_url)?;
        Ok(Self::with_connector(options, Arc::new(connector)))
    }

    /// Create a mirror over any store backend.
    pub fn with_connector(options: LiveConfigOptions, connector: Arc<dyn StoreConnector>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            options,
            connector,
            config: Arc::new(RwLock::new(ConfigMap::new())),
            state: Arc::new(RwLock::new(MirrorState::Constructed)),
            channels: Mutex::new(None),
            event_tx,
        }
    }

    /// Subscribe to mirror events.
    ///
    /// Subscribe before calling `start` to observe [`MirrorEvent::Started`].
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.event_tx.subscribe()
    }

    pub fn options(&self) -> &LiveConfigOptions {
        &self.options
    }

    pub async fn state(&self) -> MirrorState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        *self.state.read().await == MirrorState::Ready
    }

    /// Copy of the local config map.
    pub async fn snapshot(&self) -> ConfigMap {
        self.config.read().await.clone()
    }

    /// Look up one key in the local config map.
    pub async fn value(&self, key: &str) -> Option<Value> {
        self.config.read().await.get(key).cloned()
    }

    /// Open both connections, subscribe to the topic and merge the persisted
    /// hash over `defaults`.
    ///
    /// Persisted values win for keys present in both. Keys only present in
    /// `defaults` keep their default value and type. Returns the merged map
    /// and emits [`MirrorEvent::Started`].
    ///
    /// After a failure the mirror is left in [`MirrorState::Failed`] with no
    /// open connections, and `start` can be called again. On a ready mirror
    /// this returns the current map without reconnecting.
    pub async fn start(&self, defaults: impl Into<Option<ConfigMap>>) -> LiveConfigResult<ConfigMap> {
        {
            let mut state = self.state.write().await;
            let current = *state;
            match current {
                MirrorState::Ready => {
                    drop(state);
                    debug!("Live config already started");
                    return Ok(self.snapshot().await);
                }
                MirrorState::Starting => return Err(LiveConfigError::AlreadyStarting),
                MirrorState::Constructed | MirrorState::Failed | MirrorState::Closed => {
                    *state = MirrorState::Starting;
                }
            }
        }

        // Release whatever a previous run left open
        let previous = self.channels.lock().await.take();
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        *self.config.write().await = defaults.into().unwrap_or_default();

        match self.open_and_merge().await {
            Ok(merged) => {
                *self.state.write().await = MirrorState::Ready;
                info!(
                    record = %self.options.record_key(),
                    topic = %self.options.topic(),
                    keys = merged.len(),
                    "Live config ready"
                );
                let _ = self.event_tx.send(MirrorEvent::Started(merged.clone()));
                Ok(merged)
            }
            Err(e) => {
                *self.state.write().await = MirrorState::Failed;
                error!(error = %e, "Live config failed to start");
                Err(e)
            }
        }
    }

    async fn open_and_merge(&self) -> LiveConfigResult<ConfigMap> {
        let record_key = self.options.record_key();
        let topic = self.options.topic();

        let commands = self
            .with_timeout(self.connector.open_commands(record_key))
            .await?;
        let mut notifications = self.with_timeout(self.connector.open_notifications()).await?;
        self.with_timeout(notifications.subscribe(topic)).await?;

        // The subscription buffers messages until the listener starts, so
        // anything broadcast after the snapshot is applied on top of it.
        let persisted = self.with_timeout(commands.read_all()).await?;

        let merged = {
            let mut config = self.config.write().await;
            if let Some(persisted) = persisted {
                debug!(fields = persisted.len(), "Merging persisted config");
                for (key, value) in persisted {
                    config.insert(key, Value::String(value));
                }
            }
            config.clone()
        };

        let listener = tokio::spawn(listen(
            notifications.into_messages(),
            topic.to_string(),
            self.config.clone(),
            self.state.clone(),
            self.event_tx.clone(),
        ));

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let publisher = tokio::spawn(publish_loop(
            commands.clone(),
            topic.to_string(),
            publish_rx,
            self.options.operation_timeout,
            self.event_tx.clone(),
        ));

        *self.channels.lock().await = Some(Channels {
            commands,
            publish_tx: Some(publish_tx),
            listener,
            publisher: Some(publisher),
        });

        Ok(merged)
    }

    /// Persist `key -> value`, update the local map, then broadcast.
    ///
    /// The broadcast is queued only after the store acknowledged the write,
    /// and is published in the background; broadcasts from one mirror go
    /// out in call order. On failure the local map is unchanged.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> LiveConfigResult<ConfigEntry> {
        let value = value.into();
        let (commands, publish_tx) = {
            let channels = self.channels.lock().await;
            let channels = channels.as_ref().ok_or(LiveConfigError::NotStarted)?;
            let publish_tx = channels
                .publish_tx
                .clone()
                .ok_or(LiveConfigError::NotStarted)?;
            (channels.commands.clone(), publish_tx)
        };

        let entry = self
            .with_timeout(commands.write(key, &persisted_text(&value)))
            .await?;

        self.config
            .write()
            .await
            .insert(key.to_string(), value.clone());
        debug!(key = %key, "Set config value");

        let _ = self.event_tx.send(MirrorEvent::Updated {
            key: key.to_string(),
            value: value.clone(),
            origin: UpdateOrigin::Local,
        });

        if publish_tx.send(BroadcastMessage::new(key, value)).is_err() {
            warn!(key = %key, "Publisher stopped, broadcast not sent");
            let _ = self.event_tx.send(MirrorEvent::Error(format!(
                "broadcast of '{}' not sent: publisher stopped",
                key
            )));
        }

        Ok(entry)
    }

    /// Read `key` from the persisted hash, bypassing the local map.
    pub async fn get(&self, key: &str) -> LiveConfigResult<Option<ConfigEntry>> {
        let commands = {
            let channels = self.channels.lock().await;
            let channels = channels.as_ref().ok_or(LiveConfigError::NotStarted)?;
            channels.commands.clone()
        };

        self.with_timeout(commands.read(key)).await
    }

    /// Send any queued broadcasts, then release both connections.
    pub async fn close(&self) {
        let Some(channels) = self.channels.lock().await.take() else {
            return;
        };
        channels.shutdown().await;

        *self.state.write().await = MirrorState::Closed;
        info!("Live config closed");
    }

    async fn with_timeout<T, F>(&self, fut: F) -> LiveConfigResult<T>
    where
        F: Future<Output = LiveConfigResult<T>>,
    {
        run_with_timeout(self.options.operation_timeout, fut).await
    }
}

async fn run_with_timeout<T, F>(limit: Option<Duration>, fut: F) -> LiveConfigResult<T>
where
    F: Future<Output = LiveConfigResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| LiveConfigError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Apply inbound broadcasts to the local map until the subscription ends.
async fn listen(
    mut messages: BoxStream<'static, InboundMessage>,
    topic: String,
    config: Arc<RwLock<ConfigMap>>,
    state: Arc<RwLock<MirrorState>>,
    event_tx: broadcast::Sender<MirrorEvent>,
) {
    while let Some(msg) = messages.next().await {
        if msg.topic != topic {
            debug!(topic = %msg.topic, "Ignoring message on foreign topic");
            continue;
        }

        let Some(update) = BroadcastMessage::parse(&msg.payload) else {
            debug!(payload_len = msg.payload.len(), "Dropping malformed broadcast");
            continue;
        };

        config
            .write()
            .await
            .insert(update.key.clone(), update.value.clone());
        debug!(key = %update.key, "Applied broadcast");

        let _ = event_tx.send(MirrorEvent::Updated {
            key: update.key,
            value: update.value,
            origin: UpdateOrigin::Broadcast,
        });
    }

    warn!(topic = %topic, "Subscription connection closed");
    *state.write().await = MirrorState::Failed;
    let _ = event_tx.send(MirrorEvent::Error(format!(
        "subscription to '{}' closed",
        topic
    )));
}

/// Publish queued broadcasts one at a time.
async fn publish_loop(
    commands: Arc<dyn CommandChannel>,
    topic: String,
    mut rx: mpsc::UnboundedReceiver<BroadcastMessage>,
    limit: Option<Duration>,
    event_tx: broadcast::Sender<MirrorEvent>,
) {
    while let Some(message) = rx.recv().await {
        match run_with_timeout(limit, commands.broadcast(&topic, &message)).await {
            Ok(()) => debug!(key = %message.key, topic = %topic, "Broadcast sent"),
            Err(e) => {
                warn!(key = %message.key, error = %e, "Broadcast failed");
                let _ = event_tx.send(MirrorEvent::Error(format!(
                    "broadcast of '{}' failed: {}",
                    message.key, e
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_initial_state() {
        let mirror = LiveConfig::with_connector(
            LiveConfigOptions::default(),
            Arc::new(InMemoryStore::new()),
        );

        assert_eq!(mirror.state().await, MirrorState::Constructed);
        assert!(!mirror.is_ready().await);
        assert!(mirror.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_operations_before_start() {
        let mirror = LiveConfig::with_connector(
            LiveConfigOptions::default(),
            Arc::new(InMemoryStore::new()),
        );

        assert!(matches!(
            mirror.set("k", "v").await,
            Err(LiveConfigError::NotStarted)
        ));
        assert!(matches!(
            mirror.get("k").await,
            Err(LiveConfigError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_run_with_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, LiveConfigError>(())
        };
        let result = run_with_timeout(Some(Duration::from_millis(10)), slow).await;
        assert!(matches!(result, Err(LiveConfigError::Timeout(_))));

        let fast = async { Ok::<_, LiveConfigError>(7) };
        assert_eq!(run_with_timeout(None, fast).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_broadcasts() {
        let store = InMemoryStore::new();
        let mirror = LiveConfig::with_connector(LiveConfigOptions::default(), Arc::new(store.clone()));
        mirror.start(None).await.unwrap();

        mirror.set("a", "1").await.unwrap();
        mirror.set("b", "2").await.unwrap();
        mirror.close().await;

        assert_eq!(store.published("live-config").len(), 2);
        assert_eq!(mirror.state().await, MirrorState::Closed);
        assert!(matches!(
            mirror.set("c", "3").await,
            Err(LiveConfigError::NotStarted)
        ));

        // A closed mirror can be started again
        mirror.start(None).await.unwrap();
        assert_eq!(mirror.value("b").await, Some(Value::String("2".to_string())));
    }

    #[test]
    fn test_redis_mirror_construction() {
        assert!(LiveConfig::new(LiveConfigOptions::default()).is_ok());
        assert!(LiveConfig::new(LiveConfigOptions::new("nope")).is_err());
    }
}
