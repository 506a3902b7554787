//! Active topic registry.
//!
//! Tracks every topic the client listens on together with its decryption key,
//! expiry and owning sequence kind. Inbound envelopes are only accepted for
//! topics present here; the sweeper drops entries past their expiry.

use {
    crate::crypto::key::SymKey,
    client_rpc::domain::{SubscriptionId, Topic},
    dashmap::DashMap,
    std::sync::Arc,
};

/// Which sequence controller owns a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Pairing,
    Session,
}

#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub id: SubscriptionId,
    /// Symmetric key of the topic. `None` on public proposal topics, where
    /// traffic travels as plain JSON.
    pub sym_key: Option<SymKey>,
    /// UTC seconds after which the subscription is swept.
    pub expiry: u64,
    pub kind: SequenceKind,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<DashMap<Topic, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    pub fn insert(&self, topic: Topic, entry: SubscriptionEntry) {
        self.entries.insert(topic, entry);
    }

    pub fn remove(&self, topic: &Topic) -> Option<SubscriptionEntry> {
        self.entries.remove(topic).map(|(_, entry)| entry)
    }

    pub fn get(&self, topic: &Topic) -> Option<SubscriptionEntry> {
        self.entries.get(topic).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn sym_key(&self, topic: &Topic) -> Option<SymKey> {
        self.entries.get(topic).and_then(|entry| entry.sym_key)
    }

    /// Entries past their expiry, to be unsubscribed by the sweeper.
    pub fn expired(&self, now: u64) -> Vec<(Topic, SubscriptionId)> {
        self.entries
            .iter()
            .filter(|entry| entry.value().expiry <= now)
            .map(|entry| (entry.key().clone(), entry.value().id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(expiry: u64) -> SubscriptionEntry {
        SubscriptionEntry {
            id: SubscriptionId::generate(),
            sym_key: Some([7u8; 32]),
            expiry,
            kind: SequenceKind::Pairing,
        }
    }

    #[test]
    fn keys_are_tracked_per_topic() {
        let registry = SubscriptionRegistry::default();
        let topic = Topic::generate();

        registry.insert(topic.clone(), entry(100));

        assert!(registry.contains(&topic));
        assert_eq!(registry.sym_key(&topic), Some([7u8; 32]));
        assert!(registry.sym_key(&Topic::generate()).is_none());
    }

    #[test]
    fn expired_entries_are_reported() {
        let registry = SubscriptionRegistry::default();
        let expired = Topic::generate();
        let live = Topic::generate();

        registry.insert(expired.clone(), entry(10));
        registry.insert(live, entry(1000));

        let swept = registry.expired(10);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept.first().map(|(t, _)| t.clone()), Some(expired));
    }
}
