//! In-process store backend.
//!
//! Behaves like a single shared Redis instance: hashes keyed by record name
//! plus topic fan-out to every subscribed notification channel. Mirrors
//! sharing one `InMemoryStore` see each other's writes and broadcasts, which
//! makes it suitable for exercising the sync protocol without a server.
//!
//! Faults can be injected to drive failure paths.

use super::{CommandChannel, InboundMessage, NotificationChannel, StoreConnector};
use crate::error::{LiveConfigError, LiveConfigResult};
use crate::message::{BroadcastMessage, ConfigEntry};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

const TOPIC_CAPACITY: usize = 256;

/// A store operation, recorded in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Write {
        record: String,
        key: String,
        value: String,
    },
    Read {
        record: String,
        key: String,
    },
    ReadAll {
        record: String,
    },
    Publish {
        topic: String,
        payload: String,
    },
    Subscribe {
        topic: String,
    },
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_write: bool,
    fail_next_publish: bool,
    fail_reads: bool,
    hang_reads: bool,
    fail_connects: bool,
    read_all_delay: Option<Duration>,
    publish_delay: Option<Duration>,
}

struct Inner {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    topics: Mutex<broadcast::Sender<InboundMessage>>,
    ops: Mutex<Vec<StoreOp>>,
    faults: Mutex<Faults>,
    command_connections: AtomicUsize,
    notification_connections: AtomicUsize,
}

impl Inner {
    fn record(&self, op: StoreOp) {
        self.ops.lock().push(op);
    }

    fn publish(&self, topic: &str, payload: String) {
        self.record(StoreOp::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
        });

        // No receivers is not an error, same as PUBLISH returning 0
        let _ = self.topics.lock().send(InboundMessage {
            topic: topic.to_string(),
            payload,
        });
    }

    async fn read_gate(&self) -> LiveConfigResult<()> {
        let (fail, hang) = {
            let faults = self.faults.lock();
            (faults.fail_reads, faults.hang_reads)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(LiveConfigError::Store("injected read failure".to_string()));
        }
        Ok(())
    }

    fn connect_gate(&self) -> LiveConfigResult<()> {
        if self.faults.lock().fail_connects {
            return Err(LiveConfigError::ConnectionClosed(
                "injected connect failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TOPIC_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                hashes: Mutex::new(HashMap::new()),
                topics: Mutex::new(tx),
                ops: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                command_connections: AtomicUsize::new(0),
                notification_connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Set a field directly, bypassing any mirror (like a raw HSET).
    pub fn seed(&self, record: &str, key: &str, value: &str) {
        self.inner
            .hashes
            .lock()
            .entry(record.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Read a persisted field directly.
    pub fn field(&self, record: &str, key: &str) -> Option<String> {
        self.inner
            .hashes
            .lock()
            .get(record)
            .and_then(|hash| hash.get(key).cloned())
    }

    /// Snapshot of a whole persisted hash (empty if absent).
    pub fn hash(&self, record: &str) -> HashMap<String, String> {
        self.inner
            .hashes
            .lock()
            .get(record)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every record.
    pub fn flush(&self) {
        self.inner.hashes.lock().clear();
    }

    /// Publish a raw payload as an outside producer would.
    pub fn publish_raw(&self, topic: &str, payload: &str) {
        self.inner.publish(topic, payload.to_string());
    }

    /// Every operation applied so far, in order.
    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner.ops.lock().clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.inner
            .ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Publish { topic: t, payload } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn command_connections(&self) -> usize {
        self.inner.command_connections.load(Ordering::SeqCst)
    }

    pub fn notification_connections(&self) -> usize {
        self.inner.notification_connections.load(Ordering::SeqCst)
    }

    /// Make the next write fail.
    pub fn fail_next_write(&self) {
        self.inner.faults.lock().fail_next_write = true;
    }

    /// Make the next publish fail.
    pub fn fail_next_publish(&self) {
        self.inner.faults.lock().fail_next_publish = true;
    }

    /// Make every read (`read`, `read_all`) fail until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.faults.lock().fail_reads = fail;
    }

    /// Make every read hang forever until cleared.
    pub fn set_hang_reads(&self, hang: bool) {
        self.inner.faults.lock().hang_reads = hang;
    }

    /// Hold every `read_all` result for `delay` after the hash was read.
    pub fn set_read_all_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().read_all_delay = delay;
    }

    /// Wait `delay` before every publish.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().publish_delay = delay;
    }

    /// Make opening connections fail until cleared.
    pub fn set_fail_connects(&self, fail: bool) {
        self.inner.faults.lock().fail_connects = fail;
    }

    /// Drop every open subscription connection.
    ///
    /// Streams returned by existing notification channels end once they
    /// have drained what was already delivered.
    pub fn drop_subscribers(&self) {
        let (tx, _) = broadcast::channel(TOPIC_CAPACITY);
        *self.inner.topics.lock() = tx;
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for InMemoryStore {
    async fn open_commands(&self, record_key: &str) -> LiveConfigResult<Arc<dyn CommandChannel>> {
        self.inner.connect_gate()?;
        self.inner.command_connections.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(MemoryCommandChannel {
            inner: self.inner.clone(),
            record_key: record_key.to_string(),
        }))
    }

    async fn open_notifications(&self) -> LiveConfigResult<Box<dyn NotificationChannel>> {
        self.inner.connect_gate()?;
        self.inner
            .notification_connections
            .fetch_add(1, Ordering::SeqCst);

        let rx = self.inner.topics.lock().subscribe();
        Ok(Box::new(MemoryNotificationChannel {
            inner: self.inner.clone(),
            rx,
            topics: HashSet::new(),
        }))
    }
}

/// Command connection against an [`InMemoryStore`].
pub struct MemoryCommandChannel {
    inner: Arc<Inner>,
    record_key: String,
}

#[async_trait]
impl CommandChannel for MemoryCommandChannel {
    async fn write(&self, key: &str, value: &str) -> LiveConfigResult<ConfigEntry> {
        {
            let mut faults = self.inner.faults.lock();
            if faults.fail_next_write {
                faults.fail_next_write = false;
                return Err(LiveConfigError::Store("injected write failure".to_string()));
            }
        }

        self.inner
            .hashes
            .lock()
            .entry(self.record_key.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());

        self.inner.record(StoreOp::Write {
            record: self.record_key.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });

        Ok(ConfigEntry::new(key, value))
    }

    async fn read(&self, key: &str) -> LiveConfigResult<Option<ConfigEntry>> {
        self.inner.read_gate().await?;

        self.inner.record(StoreOp::Read {
            record: self.record_key.clone(),
            key: key.to_string(),
        });

        let value = self
            .inner
            .hashes
            .lock()
            .get(&self.record_key)
            .and_then(|hash| hash.get(key).cloned());

        Ok(value.map(|value| ConfigEntry::new(key, value)))
    }

    async fn read_all(&self) -> LiveConfigResult<Option<HashMap<String, String>>> {
        self.inner.read_gate().await?;

        self.inner.record(StoreOp::ReadAll {
            record: self.record_key.clone(),
        });

        let hash = self
            .inner
            .hashes
            .lock()
            .get(&self.record_key)
            .filter(|hash| !hash.is_empty())
            .cloned();

        let delay = self.inner.faults.lock().read_all_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(hash)
    }

    async fn broadcast(&self, topic: &str, message: &BroadcastMessage) -> LiveConfigResult<()> {
        let delay = {
            let mut faults = self.inner.faults.lock();
            if faults.fail_next_publish {
                faults.fail_next_publish = false;
                return Err(LiveConfigError::Store("injected publish failure".to_string()));
            }
            faults.publish_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let payload = message.to_json()?;
        self.inner.publish(topic, payload);
        Ok(())
    }
}

/// Subscription connection against an [`InMemoryStore`].
pub struct MemoryNotificationChannel {
    inner: Arc<Inner>,
    rx: broadcast::Receiver<InboundMessage>,
    topics: HashSet<String>,
}

#[async_trait]
impl NotificationChannel for MemoryNotificationChannel {
    async fn subscribe(&mut self, topic: &str) -> LiveConfigResult<()> {
        self.inner.record(StoreOp::Subscribe {
            topic: topic.to_string(),
        });
        self.topics.insert(topic.to_string());
        Ok(())
    }

    fn into_messages(self: Box<Self>) -> BoxStream<'static, InboundMessage> {
        let MemoryNotificationChannel { rx, topics, .. } = *self;

        stream::unfold((rx, topics), |(mut rx, topics)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) if topics.contains(&msg.topic) => return Some((msg, (rx, topics))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    const RECORD: &str = "live-config:test";

    #[tokio::test]
    async fn test_write_then_read() {
        let store = InMemoryStore::new();
        let commands = store.open_commands(RECORD).await.unwrap();

        let entry = commands.write("host", "http://some-host").await.unwrap();
        assert_eq!(entry, ConfigEntry::new("host", "http://some-host"));

        let read = commands.read("host").await.unwrap();
        assert_eq!(read, Some(ConfigEntry::new("host", "http://some-host")));
        assert_eq!(store.field(RECORD, "host").as_deref(), Some("http://some-host"));
    }

    #[tokio::test]
    async fn test_read_absent_and_read_all_missing_hash() {
        let store = InMemoryStore::new();
        let commands = store.open_commands(RECORD).await.unwrap();

        assert_eq!(commands.read("missing").await.unwrap(), None);
        assert_eq!(commands.read_all().await.unwrap(), None);

        store.seed(RECORD, "port", "5885");
        let all = commands.read_all().await.unwrap().unwrap();
        assert_eq!(all.get("port").map(String::as_str), Some("5885"));
    }

    #[tokio::test]
    async fn test_records_are_isolated() {
        let store = InMemoryStore::new();
        let prod = store.open_commands("live-config").await.unwrap();
        let test = store.open_commands(RECORD).await.unwrap();

        prod.write("host", "prod-host").await.unwrap();
        assert_eq!(test.read("host").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_write_failure_is_one_shot() {
        let store = InMemoryStore::new();
        let commands = store.open_commands(RECORD).await.unwrap();

        store.fail_next_write();
        assert!(commands.write("k", "v").await.is_err());
        assert!(store.hash(RECORD).is_empty());

        assert!(commands.write("k", "v").await.is_ok());
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_subscribed_topic() {
        let store = InMemoryStore::new();
        let mut notifications = store.open_notifications().await.unwrap();
        notifications.subscribe(RECORD).await.unwrap();
        let mut messages = notifications.into_messages();

        store.publish_raw("other-topic", "ignored");
        let commands = store.open_commands(RECORD).await.unwrap();
        commands
            .broadcast(RECORD, &BroadcastMessage::new("k", json!("v")))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), messages.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, RECORD);
        assert_eq!(msg.payload, r#"{"key":"k","value":"v"}"#);
    }

    #[tokio::test]
    async fn test_drop_subscribers_ends_stream() {
        let store = InMemoryStore::new();
        let mut notifications = store.open_notifications().await.unwrap();
        notifications.subscribe(RECORD).await.unwrap();
        let mut messages = notifications.into_messages();

        store.drop_subscribers();

        let next = tokio::time::timeout(Duration::from_secs(1), messages.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let store = InMemoryStore::new();
        store.set_fail_connects(true);

        assert!(store.open_commands(RECORD).await.is_err());
        assert!(store.open_notifications().await.is_err());
        assert_eq!(store.command_connections(), 0);
    }
}
