//! In-memory `KvStore` for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::traits::KvStore;

/// `HashMap`-backed store. Can be switched offline to simulate an
/// unavailable backend.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, serde_json::Value>>,
    offline: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check_online()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::{get_json, set_json};

    #[tokio::test]
    async fn set_get_delete() {
        let kv = MemoryKv::new();
        assert!(kv.get("a").await.unwrap().is_none());

        kv.set("a", serde_json::json!({"n": 1})).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().unwrap()["n"], 1);

        kv.delete("a").await.unwrap();
        assert!(kv.is_empty().await);
        // deleting again is fine
        kv.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn typed_helpers() {
        let kv = MemoryKv::new();
        set_json(&kv, "ids", &vec!["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        let ids: Vec<String> = get_json(&kv, "ids").await.unwrap().unwrap();
        assert_eq!(ids, vec!["x", "y"]);

        let wrong: Result<Option<u32>, _> = get_json(&kv, "ids").await;
        assert!(matches!(wrong, Err(StoreError::Serialization { .. })));
    }

    #[tokio::test]
    async fn offline_fails_fast() {
        let kv = MemoryKv::new();
        kv.set_offline(true);
        assert!(matches!(
            kv.get("a").await,
            Err(StoreError::Unavailable(_))
        ));
        kv.set_offline(false);
        assert!(kv.get("a").await.is_ok());
    }
}
