//! Shared sequence lifecycle machinery.
//!
//! A sequence (pairing or session) moves through `Proposed` → `Responded` →
//! settled; the two controllers differ in constants, wire methods and
//! validation hooks but share the pending/settled tables, the per-topic lock
//! discipline and the settlement waiter plumbing defined here.

pub mod pairing;
pub mod session;

use {
    crate::{
        error::ClientError,
        event::EventSink,
        relay::RelayClient,
        storage::{KeyValueStorage, SequenceStorage, StorageError},
        subscription::SubscriptionRegistry,
    },
    client_rpc::{domain::Topic, rpc::AppMetadata},
    dashmap::DashMap,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    tokio::sync::oneshot,
};

/// Proposal lifetime, seconds.
pub const PROPOSAL_TTL: u64 = 300;

/// Settled pairing lifetime, seconds (30 days).
pub const PAIRING_TTL: u64 = 30 * 24 * 60 * 60;

/// Settled session lifetime, seconds (7 days).
pub const SESSION_TTL: u64 = 7 * 24 * 60 * 60;

/// Reason codes attached to wire-level errors, rejections and deletions.
pub mod reason {
    pub const NO_MATCHING_TOPIC: i64 = 1301;
    pub const EXPIRED: i64 = 1302;
    pub const SETTLEMENT_FAILED: i64 = 1401;
    pub const UNAUTHORIZED_RPC_METHOD: i64 = 3001;
    pub const UNAUTHORIZED_NOTIFICATION_TYPE: i64 = 3002;
    pub const UNAUTHORIZED_UPDATE: i64 = 3003;
    pub const USER_REJECTED: i64 = 5000;
    pub const USER_DISCONNECTED: i64 = 6000;
}

/// Monotonic UTC seconds.
pub(crate) fn now_seconds() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Collaborators shared by the sequence controllers. Passing this context in
/// at construction keeps the controllers free of references back into the
/// facade.
pub(crate) struct Context {
    pub relay: RelayClient,
    pub storage: Arc<dyn KeyValueStorage>,
    pub subscriptions: SubscriptionRegistry,
    pub events: EventSink,
    /// The local application's description, shared with peers on settlement.
    pub metadata: Option<AppMetadata>,
    /// Storage context segment, `client` unless overridden.
    pub storage_context: String,
}

/// Status of a pending record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PendingStatus {
    /// Proposal created locally, awaiting the peer's response.
    Proposed,
    /// Peer's proposal responded to locally, awaiting settle acknowledgement.
    #[serde(rename_all = "camelCase")]
    Responded { settled_topic: Topic },
    /// Terminal failure.
    Failed { reason: String },
}

/// Storable record keyed by topic.
pub(crate) trait SequenceRecord {
    fn record_topic(&self) -> Topic;
}

/// Pending and settled tables of one sequence kind, with persistence.
///
/// A topic lives in at most one of the two tables at any moment: proposal
/// topics key the pending table, derived settled topics key the settled one.
pub(crate) struct SequenceTables<P, S> {
    pub pending: DashMap<Topic, P>,
    pub settled: DashMap<Topic, S>,
    storage: SequenceStorage,
}

impl<P, S> SequenceTables<P, S>
where
    P: Serialize + DeserializeOwned + Clone + SequenceRecord,
    S: Serialize + DeserializeOwned + Clone + SequenceRecord,
{
    pub fn new(storage: SequenceStorage) -> Self {
        Self {
            pending: DashMap::new(),
            settled: DashMap::new(),
            storage,
        }
    }

    /// Rehydrates both tables from storage, returning the loaded records for
    /// the caller to re-subscribe and expiry-check.
    pub async fn load(&self) -> Result<(Vec<P>, Vec<S>), StorageError> {
        let pending: Vec<P> = self.storage.load_pending().await?;
        let settled: Vec<S> = self.storage.load_settled().await?;

        for record in &pending {
            self.pending.insert(record.record_topic(), record.clone());
        }
        for record in &settled {
            self.settled.insert(record.record_topic(), record.clone());
        }

        Ok((pending, settled))
    }

    pub async fn persist_pending(&self) -> Result<(), StorageError> {
        let records: Vec<P> = self.pending.iter().map(|e| e.value().clone()).collect();
        self.storage.save_pending(records.iter().collect()).await
    }

    pub async fn persist_settled(&self) -> Result<(), StorageError> {
        let records: Vec<S> = self.settled.iter().map(|e| e.value().clone()).collect();
        self.storage.save_settled(records.iter().collect()).await
    }

    pub async fn persist(&self) -> Result<(), StorageError> {
        self.persist_pending().await?;
        self.persist_settled().await
    }
}

/// Per-topic mutexes serialising every state mutation of one topic while
/// permitting parallelism across topics. Tokio mutexes are fair, so within a
/// topic the acquisition order matches arrival order.
#[derive(Default)]
pub(crate) struct TopicLocks {
    locks: DashMap<Topic, Arc<tokio::sync::Mutex<()>>>,
}

impl TopicLocks {
    pub async fn lock(&self, topic: &Topic) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let entry = self.locks.entry(topic.clone()).or_default();
            Arc::clone(entry.value())
        };

        lock.lock_owned().await
    }

    /// Drops the lock of a topic that no longer exists in any table.
    pub fn forget(&self, topic: &Topic) {
        self.locks.remove(topic);
    }
}

/// One-shot settlement waiters keyed by proposal topic. `propose` registers a
/// waiter; the inbound approve/reject (or expiry) resolves it.
pub(crate) struct SettlementWaiters<S> {
    waiters: Mutex<HashMap<Topic, oneshot::Sender<Result<S, ClientError>>>>,
}

impl<S> Default for SettlementWaiters<S> {
    fn default() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> SettlementWaiters<S> {
    pub fn register(&self, topic: Topic) -> oneshot::Receiver<Result<S, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(topic, tx);
        rx
    }

    pub fn resolve(&self, topic: &Topic, result: Result<S, ClientError>) {
        let sender = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);

        if let Some(sender) = sender {
            sender.send(result).ok();
        }
    }
}

/// Serde helper storing symmetric keys as hex.
pub(crate) mod serde_sym_key {
    use {
        crate::crypto::key::SymKey,
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S>(key: &SymKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SymKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let bytes = hex::decode(&value).map_err(serde::de::Error::custom)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid symmetric key length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn topic_locks_serialize_per_topic() {
        let locks = Arc::new(TopicLocks::default());
        let topic = Topic::generate();

        let guard = locks.lock(&topic).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let topic = topic.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&topic).await;
            })
        };

        // The contender cannot finish while the guard is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn waiters_resolve_once() {
        let waiters = SettlementWaiters::<u32>::default();
        let topic = Topic::generate();

        let rx = waiters.register(topic.clone());
        waiters.resolve(&topic, Ok(7));
        // Resolving again is a no-op.
        waiters.resolve(&topic, Ok(8));

        assert_eq!(rx.await.unwrap().unwrap(), 7);
    }
}
