//! In-process relay.
//!
//! A loopback message bus for test suites and demos: every endpoint created
//! from the same [`MemoryRelay`] sees messages published by the others on
//! topics it subscribed to. Delivery is immediate and in publish order;
//! `ttl`/`prompt` hints have no effect as there is no offline mailbox.

use {
    super::{PublishedMessage, Transport, TransportError},
    async_trait::async_trait,
    client_rpc::domain::{SubscriptionId, Topic},
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

/// The shared bus. Clone-cheap; hand one clone to each client under test and
/// call [`MemoryRelay::endpoint`] per client.
#[derive(Default, Clone)]
pub struct MemoryRelay {
    shared: Arc<Mutex<Shared>>,
}

#[derive(Default)]
struct Shared {
    next_endpoint: u64,
    endpoints: HashMap<u64, EndpointHandle>,
}

struct EndpointHandle {
    sender: UnboundedSender<PublishedMessage>,
    topics: HashMap<Topic, SubscriptionId>,
}

impl MemoryRelay {
    /// Creates a new endpoint attached to this bus.
    pub fn endpoint(&self) -> MemoryEndpoint {
        let (sender, receiver) = unbounded_channel();

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let id = shared.next_endpoint;
        shared.next_endpoint += 1;
        shared.endpoints.insert(
            id,
            EndpointHandle {
                sender,
                topics: HashMap::new(),
            },
        );

        MemoryEndpoint {
            id,
            shared: Arc::clone(&self.shared),
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

/// One client's attachment to a [`MemoryRelay`].
pub struct MemoryEndpoint {
    id: u64,
    shared: Arc<Mutex<Shared>>,
    receiver: Mutex<Option<UnboundedReceiver<PublishedMessage>>>,
}

#[async_trait]
impl Transport for MemoryEndpoint {
    async fn publish(
        &self,
        topic: Topic,
        message: Arc<str>,
        _ttl: u64,
        _prompt: bool,
    ) -> Result<(), TransportError> {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());

        for (id, endpoint) in &shared.endpoints {
            if *id != self.id && endpoint.topics.contains_key(&topic) {
                endpoint
                    .sender
                    .send(PublishedMessage {
                        topic: topic.clone(),
                        message: message.clone(),
                    })
                    .ok();
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionId, TransportError> {
        let subscription_id = SubscriptionId::generate();

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared
            .endpoints
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::Subscription("endpoint detached".to_owned()))?
            .topics
            .insert(topic, subscription_id.clone());

        Ok(subscription_id)
    }

    async fn unsubscribe(
        &self,
        topic: Topic,
        subscription_id: SubscriptionId,
    ) -> Result<(), TransportError> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(endpoint) = shared.endpoints.get_mut(&self.id) {
            if endpoint.topics.get(&topic) == Some(&subscription_id) {
                endpoint.topics.remove(&topic);
            }
        }

        Ok(())
    }

    fn messages(&self) -> UnboundedReceiver<PublishedMessage> {
        self.receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| {
                // The stream was already claimed; yield an empty, closed one.
                let (_sender, receiver) = unbounded_channel();
                receiver
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_messages() {
        let relay = MemoryRelay::default();
        let a = relay.endpoint();
        let b = relay.endpoint();

        let topic = Topic::generate();
        b.subscribe(topic.clone()).await.unwrap();
        let mut inbound = b.messages();

        a.publish(topic.clone(), Arc::from("hello"), 300, false)
            .await
            .unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.topic, topic);
        assert_eq!(message.message.as_ref(), "hello");
    }

    #[tokio::test]
    async fn publisher_does_not_hear_itself() {
        let relay = MemoryRelay::default();
        let a = relay.endpoint();

        let topic = Topic::generate();
        a.subscribe(topic.clone()).await.unwrap();
        let mut inbound = a.messages();

        a.publish(topic, Arc::from("echo"), 300, false)
            .await
            .unwrap();

        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribed_topics_are_silent() {
        let relay = MemoryRelay::default();
        let a = relay.endpoint();
        let b = relay.endpoint();

        let topic = Topic::generate();
        let subscription_id = b.subscribe(topic.clone()).await.unwrap();
        b.unsubscribe(topic.clone(), subscription_id).await.unwrap();
        let mut inbound = b.messages();

        a.publish(topic, Arc::from("lost"), 300, false)
            .await
            .unwrap();

        assert!(inbound.try_recv().is_err());
    }
}
