//! Relay access: bit-opaque publish/subscribe with transparent symmetric
//! encryption and JSON RPC request/response correlation.
//!
//! The concrete wire (websocket, in-process, ...) is an implementer-provided
//! [`Transport`]; the relay sees only opaque envelopes addressed by topic.

pub mod memory;

use {
    crate::{
        crypto::envelope,
        error::ClientError,
        subscription::SubscriptionRegistry,
    },
    async_trait::async_trait,
    client_rpc::{
        domain::{MessageId, SubscriptionId, Topic},
        rpc::{
            self, ErrorParams, Payload, PublishMetadata, PublishMetadataProvider, RequestParams,
            ResponseParams, ResponseParamsSuccess,
        },
    },
    serde_json::Value,
    std::{
        collections::{hash_map::Entry, HashMap, VecDeque},
        sync::{Arc, Mutex},
        time::Duration,
    },
    tokio::sync::{mpsc::UnboundedReceiver, oneshot},
    tracing::{debug, warn},
};

/// How long an awaited request may remain unanswered.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How many recently seen inbound message IDs are remembered per topic.
pub const DEDUP_WINDOW: usize = 100;

/// Transport errors. All surface to the caller as retry-appropriate relay
/// unavailability.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Relay not reachable: {0}")]
    Unreachable(String),

    #[error("Publish not acknowledged: {0}")]
    Publish(String),

    #[error("Subscription failure: {0}")]
    Subscription(String),
}

/// The message received from a subscription.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: Topic,
    pub message: Arc<str>,
}

/// The abstract relay wire.
///
/// Implementations must deliver messages of one topic in the order the relay
/// accepted them and must not let one topic's backlog stall another's.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a message, resolving once the relay acknowledged receipt.
    async fn publish(
        &self,
        topic: Topic,
        message: Arc<str>,
        ttl: u64,
        prompt: bool,
    ) -> Result<(), TransportError>;

    /// Registers interest in a topic.
    async fn subscribe(&self, topic: Topic) -> Result<SubscriptionId, TransportError>;

    /// Drops interest in a topic.
    async fn unsubscribe(
        &self,
        topic: Topic,
        subscription_id: SubscriptionId,
    ) -> Result<(), TransportError>;

    /// The inbound message stream. Yields the receiver on first call.
    fn messages(&self) -> UnboundedReceiver<PublishedMessage>;
}

/// The relay client.
///
/// Serializes JSON RPC payloads, encrypts them with the topic's symmetric key
/// when one is registered, and correlates responses to outstanding requests
/// by message ID with a bounded per-topic dedup window on the inbound side.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    transport: Arc<dyn Transport>,
    subscriptions: SubscriptionRegistry,
    outstanding: Mutex<HashMap<MessageId, oneshot::Sender<Result<Value, ClientError>>>>,
    history: Mutex<HashMap<Topic, VecDeque<MessageId>>>,
}

impl RelayClient {
    pub fn new(transport: Arc<dyn Transport>, subscriptions: SubscriptionRegistry) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                transport,
                subscriptions,
                outstanding: Mutex::new(HashMap::new()),
                history: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The inbound message stream of the underlying transport.
    pub fn messages(&self) -> UnboundedReceiver<PublishedMessage> {
        self.inner.transport.messages()
    }

    /// Publishes a request and awaits the matching response.
    pub async fn publish_request(
        &self,
        topic: &Topic,
        params: RequestParams,
    ) -> Result<Value, ClientError> {
        self.send_request(topic, rpc::Request::new(params)).await
    }

    /// Publishes a request under an explicit message ID. Used for payload
    /// passthrough, where the envelope shares the wrapped request's ID.
    pub async fn publish_request_with_id(
        &self,
        topic: &Topic,
        id: MessageId,
        params: RequestParams,
    ) -> Result<Value, ClientError> {
        self.send_request(topic, rpc::Request::with_id(id, params))
            .await
    }

    async fn send_request(
        &self,
        topic: &Topic,
        request: rpc::Request,
    ) -> Result<Value, ClientError> {
        let metadata = request.params.publish_metadata();
        let id = request.id;

        let (tx, rx) = oneshot::channel();
        {
            let mut outstanding = self.inner.outstanding.lock().unwrap_or_else(|e| e.into_inner());
            match outstanding.entry(id) {
                Entry::Occupied(_) => return Err(ClientError::DuplicateRequestId),
                Entry::Vacant(entry) => {
                    entry.insert(tx);
                }
            }
        }

        let message = match self.encode(topic, &Payload::from(request)) {
            Ok(message) => message,
            Err(err) => {
                self.forget_outstanding(&id);
                return Err(err);
            }
        };

        if let Err(err) = self
            .inner
            .transport
            .publish(topic.clone(), message, metadata.ttl, metadata.prompt)
            .await
        {
            self.forget_outstanding(&id);
            return Err(err.into());
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => {
                self.forget_outstanding(&id);
                debug!(%topic, id = %id, "request timed out");
                Err(ClientError::RpcTimeout)
            }
        }
    }

    /// Publishes a success response for a previously received request.
    pub async fn publish_response(
        &self,
        topic: &Topic,
        id: MessageId,
        params: ResponseParamsSuccess,
    ) -> Result<(), ClientError> {
        let metadata = params.publish_metadata();
        let response = rpc::Response::new(id, params.try_into()?);

        self.send_response(topic, response, metadata).await
    }

    /// Publishes an error response for a previously received request.
    pub async fn publish_error(
        &self,
        topic: &Topic,
        id: MessageId,
        error: ErrorParams,
        metadata: PublishMetadata,
    ) -> Result<(), ClientError> {
        let response = rpc::Response::new(id, error.try_into()?);

        self.send_response(topic, response, metadata).await
    }

    /// Publishes an already built response, e.g. an application-level answer
    /// to a session payload.
    pub async fn send_response(
        &self,
        topic: &Topic,
        response: rpc::Response,
        metadata: PublishMetadata,
    ) -> Result<(), ClientError> {
        let message = self.encode(topic, &Payload::from(response))?;

        self.inner
            .transport
            .publish(topic.clone(), message, metadata.ttl, metadata.prompt)
            .await?;

        Ok(())
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId, ClientError> {
        Ok(self.inner.transport.subscribe(topic.clone()).await?)
    }

    pub async fn unsubscribe(
        &self,
        topic: &Topic,
        subscription_id: SubscriptionId,
    ) -> Result<(), ClientError> {
        self.inner
            .transport
            .unsubscribe(topic.clone(), subscription_id)
            .await?;
        self.inner
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);

        Ok(())
    }

    /// Resolves an inbound response against the outstanding request map.
    /// Returns `false` for unknown (or already resolved) message IDs.
    pub fn resolve_response(&self, response: rpc::Response) -> bool {
        let sender = {
            let mut outstanding = self.inner.outstanding.lock().unwrap_or_else(|e| e.into_inner());
            outstanding.remove(&response.id)
        };

        let Some(sender) = sender else {
            warn!(id = %response.id, "response does not match any outstanding request");
            return false;
        };

        let result = match response.params {
            ResponseParams::Success(value) => Ok(value),
            ResponseParams::Err(value) => {
                Err(match serde_json::from_value::<ErrorParams>(value) {
                    Ok(params) => params.into(),
                    Err(err) => ClientError::Serialization(err),
                })
            }
        };

        sender.send(result).ok();
        true
    }

    /// Records an inbound request ID. Returns `false` when the ID was already
    /// seen within the per-topic dedup window, in which case the message must
    /// be ignored.
    pub fn register_inbound(&self, topic: &Topic, id: MessageId) -> bool {
        let mut history = self.inner.history.lock().unwrap_or_else(|e| e.into_inner());
        let seen = history.entry(topic.clone()).or_default();

        if seen.contains(&id) {
            return false;
        }

        if seen.len() == DEDUP_WINDOW {
            seen.pop_front();
        }
        seen.push_back(id);

        true
    }

    /// Decrypts an inbound message for the topic: opens the envelope when the
    /// topic has a registered key, otherwise passes the plain JSON through.
    pub fn decrypt(&self, topic: &Topic, message: &str) -> Result<String, ClientError> {
        match self.inner.subscriptions.sym_key(topic) {
            Some(key) => Ok(envelope::open(message, &key)?),
            None => Ok(message.to_owned()),
        }
    }

    fn encode(&self, topic: &Topic, payload: &Payload) -> Result<Arc<str>, ClientError> {
        let json = serde_json::to_string(payload)?;

        match self.inner.subscriptions.sym_key(topic) {
            Some(key) => Ok(envelope::seal(json, &key)?.into()),
            None => Ok(json.into()),
        }
    }

    fn forget_outstanding(&self, id: &MessageId) {
        self.inner
            .outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}
