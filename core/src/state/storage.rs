//! Key-value storage seam and the in-memory backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

pub const PLAN_PREFIX: &str = "plan/";
pub const CHECKPOINT_PREFIX: &str = "checkpoint/";
pub const CONVERSATION_PREFIX: &str = "conversation/";

pub fn plan_key(plan_id: &str) -> String {
    format!("{PLAN_PREFIX}{plan_id}")
}

pub fn checkpoint_prefix(plan_id: &str) -> String {
    format!("{CHECKPOINT_PREFIX}{plan_id}/")
}

pub fn checkpoint_key(plan_id: &str, checkpoint_id: &str) -> String {
    format!("{}{checkpoint_id}", checkpoint_prefix(plan_id))
}

pub fn conversation_key(conversation_id: &str) -> String {
    format!("{CONVERSATION_PREFIX}{conversation_id}")
}

/// Durable key-value backend.
///
/// `set_if_owner` is the single-writer guard: the first writer of a key takes
/// its lease, later writers with a different owner id get
/// [`StorageError::OwnerMismatch`] until the lease is released.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn set_if_owner(&self, key: &str, value: String, owner: &str)
        -> Result<(), StorageError>;

    /// Current lease holder of `key`, if any.
    async fn owner(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Drop the lease. `owner = None` releases regardless of the holder.
    /// Returns whether a lease was removed.
    async fn release_owner(&self, key: &str, owner: Option<&str>) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: BTreeMap<String, String>,
    owners: HashMap<String, String>,
}

/// Process-local storage. State is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.inner.write().await.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_owner(
        &self,
        key: &str,
        value: String,
        owner: &str,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        match inner.owners.get(key) {
            Some(holder) if holder != owner => {
                return Err(StorageError::OwnerMismatch {
                    key: key.to_string(),
                    holder: holder.clone(),
                });
            }
            Some(_) => {}
            None => {
                inner.owners.insert(key.to_string(), owner.to_string());
            }
        }
        inner.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn owner(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.read().await.owners.get(key).cloned())
    }

    async fn release_owner(&self, key: &str, owner: Option<&str>) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        match (inner.owners.get(key), owner) {
            (None, _) => Ok(false),
            (Some(holder), Some(owner)) if holder != owner => Err(StorageError::OwnerMismatch {
                key: key.to_string(),
                holder: holder.clone(),
            }),
            _ => Ok(inner.owners.remove(key).is_some()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        inner.owners.remove(key);
        Ok(inner.values.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .values
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_blocks_other_writers_until_released() {
        let storage = MemoryStorage::new();
        storage.set_if_owner("plan/p", "v1".into(), "a").await.unwrap();
        storage.set_if_owner("plan/p", "v2".into(), "a").await.unwrap();

        let err = storage
            .set_if_owner("plan/p", "v3".into(), "b")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StorageError::OwnerMismatch {
                key: "plan/p".into(),
                holder: "a".into()
            }
        );
        assert_eq!(storage.get("plan/p").await.unwrap().as_deref(), Some("v2"));

        assert!(storage.release_owner("plan/p", Some("b")).await.is_err());
        assert!(storage.release_owner("plan/p", None).await.unwrap());
        storage.set_if_owner("plan/p", "v3".into(), "b").await.unwrap();
        assert_eq!(storage.owner("plan/p").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn keys_are_prefix_scoped() {
        let storage = MemoryStorage::new();
        for key in ["checkpoint/p1/a", "checkpoint/p1/b", "checkpoint/p10/a", "plan/p1"] {
            storage.set(key, String::new()).await.unwrap();
        }
        assert_eq!(
            storage.keys(&checkpoint_prefix("p1")).await.unwrap(),
            vec!["checkpoint/p1/a", "checkpoint/p1/b"]
        );
        assert!(storage.delete("plan/p1").await.unwrap());
        assert!(!storage.delete("plan/p1").await.unwrap());
    }
}
