//! Key-value persistence.
//!
//! The client treats storage as a single-writer async key-value store. Table
//! writes are coalesced per mutation and flushed before the corresponding
//! event is emitted, so an observer reading storage after an event sees the
//! update.
//!
//! Layout (`{context}` defaults to `client`):
//!
//! - `wc@2:{context}//pairing:settled` — list of settled pairings
//! - `wc@2:{context}//pairing:pending` — list of pending pairings
//! - `wc@2:{context}//session:settled` — list of settled sessions
//! - `wc@2:{context}//session:pending` — list of pending sessions

use {
    async_trait::async_trait,
    dashmap::DashMap,
    serde::{de::DeserializeOwned, Serialize},
    std::sync::Arc,
};

pub const STORAGE_PROTOCOL: &str = "wc";
pub const STORAGE_VERSION: u32 = 2;
pub const DEFAULT_CONTEXT: &str = "client";

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored value is not valid JSON: {0}")]
    Corrupted(#[from] serde_json::Error),
}

/// The abstract key-value store the client persists into.
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn del(&self, key: &str) -> Result<(), StorageError>;
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-process storage. The default backend, also used by the test suites.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Typed view over the storage for one sequence kind.
#[derive(Clone)]
pub struct SequenceStorage {
    storage: Arc<dyn KeyValueStorage>,
    settled_key: String,
    pending_key: String,
}

impl SequenceStorage {
    pub fn new(storage: Arc<dyn KeyValueStorage>, context: &str, sequence: &str) -> Self {
        let prefix = format!("{STORAGE_PROTOCOL}@{STORAGE_VERSION}:{context}//{sequence}");

        Self {
            storage,
            settled_key: format!("{prefix}:settled"),
            pending_key: format!("{prefix}:pending"),
        }
    }

    pub async fn load_settled<S>(&self) -> Result<Vec<S>, StorageError>
    where
        S: DeserializeOwned,
    {
        self.load(&self.settled_key).await
    }

    pub async fn load_pending<P>(&self) -> Result<Vec<P>, StorageError>
    where
        P: DeserializeOwned,
    {
        self.load(&self.pending_key).await
    }

    pub async fn save_settled<S>(&self, records: Vec<&S>) -> Result<(), StorageError>
    where
        S: Serialize,
    {
        self.save(&self.settled_key, records).await
    }

    pub async fn save_pending<P>(&self, records: Vec<&P>) -> Result<(), StorageError>
    where
        P: Serialize,
    {
        self.save(&self.pending_key, records).await
    }

    async fn load<T>(&self, key: &str) -> Result<Vec<T>, StorageError>
    where
        T: DeserializeOwned,
    {
        match self.storage.get(key).await? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save<T>(&self, key: &str, records: Vec<&T>) -> Result<(), StorageError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec(&records)?;
        self.storage.set(key, data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryStorage::default();

        storage.set("wc@2:client//pairing:settled", b"[]".to_vec())
            .await
            .unwrap();

        assert_eq!(
            storage.get("wc@2:client//pairing:settled").await.unwrap(),
            Some(b"[]".to_vec())
        );

        let keys = storage.keys("wc@2:client//pairing").await.unwrap();
        assert_eq!(keys, vec!["wc@2:client//pairing:settled".to_owned()]);

        storage.del("wc@2:client//pairing:settled").await.unwrap();
        assert_eq!(
            storage.get("wc@2:client//pairing:settled").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn sequence_storage_round_trip() {
        let storage = Arc::new(MemoryStorage::default());
        let sequences = SequenceStorage::new(storage, DEFAULT_CONTEXT, "session");

        sequences
            .save_settled(vec![&"record".to_owned()])
            .await
            .unwrap();

        let loaded: Vec<String> = sequences.load_settled().await.unwrap();
        assert_eq!(loaded, vec!["record".to_owned()]);

        let empty: Vec<String> = sequences.load_pending().await.unwrap();
        assert!(empty.is_empty());
    }
}
