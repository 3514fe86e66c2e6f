//! `get` reads the persisted hash, not the local map.

use super::harness::{mirror, RECORD};
use crate::message::ConfigEntry;
use crate::store::memory::InMemoryStore;
use serde_json::json;

#[tokio::test]
async fn get_resolves_persisted_value() {
    let store = InMemoryStore::new();
    store.seed(RECORD, "port", "5885");
    let live = mirror(&store);
    live.start(None).await.unwrap();

    let entry = live.get("port").await.unwrap().unwrap();

    assert_eq!(entry.key, "port");
    assert_eq!(entry.value, "5885");
}

#[tokio::test]
async fn get_absent_key_resolves_none() {
    let store = InMemoryStore::new();
    store.seed(RECORD, "port", "5885");
    let live = mirror(&store);
    live.start(None).await.unwrap();

    assert_eq!(live.get("invalid-key").await.unwrap(), None);
}

#[tokio::test]
async fn get_sees_writes_the_local_map_missed() {
    let store = InMemoryStore::new();
    store.seed(RECORD, "host", "old-host");
    let live = mirror(&store);
    live.start(None).await.unwrap();

    // Written straight to the hash without a broadcast
    store.seed(RECORD, "host", "new-host");

    assert_eq!(
        live.get("host").await.unwrap(),
        Some(ConfigEntry::new("host", "new-host"))
    );
    assert_eq!(live.value("host").await, Some(json!("old-host")));
}
