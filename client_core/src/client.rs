//! The client facade.
//!
//! Thin aggregation of the pairing and session controllers: user-facing verbs
//! on one side, the inbound dispatcher and expiry sweeper on the other. The
//! controllers never reach back into the facade; everything they share
//! travels in the [`Context`] they are constructed with.

use {
    crate::{
        error::ClientError,
        event::{ClientEvent, EventSink},
        relay::{PublishedMessage, RelayClient, Transport},
        sequence::{
            now_seconds,
            pairing::{PairingEngine, SettledPairing},
            reason,
            session::{SessionEngine, SettledSession},
            Context,
        },
        storage::{KeyValueStorage, MemoryStorage, DEFAULT_CONTEXT},
        subscription::SubscriptionRegistry,
    },
    client_rpc::{
        domain::{MessageId, Topic},
        rpc::{
            self, methods, AppMetadata, ErrorParams, Payload, PublishMetadata, Reason,
            SessionPermissions, SessionProposal, SessionState,
        },
    },
    serde_json::Value,
    std::{collections::HashMap, sync::Arc, time::Duration},
    tokio::{
        sync::{broadcast, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

/// Cadence of the expiry sweeper.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Client construction options.
pub struct ClientOptions {
    transport: Arc<dyn Transport>,
    storage: Option<Arc<dyn KeyValueStorage>>,
    metadata: Option<AppMetadata>,
    override_context: Option<String>,
}

impl ClientOptions {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            storage: None,
            metadata: None,
            override_context: None,
        }
    }

    /// Uses the given persistence backend instead of in-memory storage.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// App description shared with peers on settlement.
    pub fn with_metadata(mut self, metadata: impl Into<Option<AppMetadata>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Overrides the storage context segment (`client` by default), isolating
    /// several clients sharing one storage backend.
    pub fn with_override_context(mut self, context: impl Into<String>) -> Self {
        self.override_context = Some(context.into());
        self
    }
}

/// Parameters of [`Client::connect`].
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Settled pairing to signal the session over. `None` creates a new
    /// pairing first; its URI is emitted as a `pairing.proposal` event.
    pub pairing_topic: Option<Topic>,
    pub permissions: SessionPermissions,
}

pub struct Client {
    pairing: Arc<PairingEngine>,
    session: Arc<SessionEngine>,
    events: EventSink,
    workers: Vec<JoinHandle<()>>,
}

impl Client {
    /// Builds the client: rehydrates state from storage, re-establishes
    /// subscriptions and starts the dispatcher and sweeper loops.
    pub async fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let subscriptions = SubscriptionRegistry::default();
        let relay = RelayClient::new(Arc::clone(&options.transport), subscriptions.clone());
        let events = EventSink::default();
        let storage = options
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::default()));

        let ctx = Arc::new(Context {
            relay: relay.clone(),
            storage,
            subscriptions: subscriptions.clone(),
            events: events.clone(),
            metadata: options.metadata,
            storage_context: options
                .override_context
                .unwrap_or_else(|| DEFAULT_CONTEXT.to_owned()),
        });

        let pairing = Arc::new(PairingEngine::new(Arc::clone(&ctx)));
        let session = Arc::new(SessionEngine::new(Arc::clone(&ctx)));

        pairing.init().await?;
        session.init().await?;

        let dispatcher = tokio::spawn(dispatch_loop(
            relay.clone(),
            subscriptions.clone(),
            Arc::clone(&pairing),
            Arc::clone(&session),
            relay.messages(),
        ));
        let sweeper = tokio::spawn(sweep_loop(
            relay,
            subscriptions,
            Arc::clone(&pairing),
            Arc::clone(&session),
        ));

        Ok(Self {
            pairing,
            session,
            events,
            workers: vec![dispatcher, sweeper],
        })
    }

    /// The public event stream.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Establishes a session: reuses the named settled pairing, or creates a
    /// new pairing first (emitting its URI for out-of-band delivery), then
    /// proposes the session over it. Returns once the session settles.
    pub async fn connect(&self, params: ConnectParams) -> Result<SettledSession, ClientError> {
        let pairing_topic = match params.pairing_topic {
            Some(topic) => self.pairing.get(&topic)?.topic,
            None => {
                let (proposal, waiter) = self.pairing.propose(None).await?;
                await_settlement(waiter, proposal.ttl).await?.topic
            }
        };

        let (proposal, waiter) = self
            .session
            .propose(&pairing_topic, params.permissions)
            .await?;

        await_settlement(waiter, proposal.ttl).await
    }

    /// Responds to a pairing URI received out-of-band.
    pub async fn pair(&self, uri: &str) -> Result<SettledPairing, ClientError> {
        self.pairing.pair(uri).await
    }

    /// Approves a session proposal, settling the session with the given
    /// state.
    pub async fn approve(
        &self,
        proposal: SessionProposal,
        state: SessionState,
    ) -> Result<SettledSession, ClientError> {
        self.session
            .respond(true, proposal, Some(state))
            .await?
            .ok_or(ClientError::Rpc {
                code: reason::SETTLEMENT_FAILED,
                message: "session settlement failed".to_owned(),
            })
    }

    /// Rejects a session proposal.
    pub async fn reject(&self, proposal: SessionProposal) -> Result<(), ClientError> {
        self.session.respond(false, proposal, None).await.map(|_| ())
    }

    /// Updates the session state. Controller only.
    pub async fn update(
        &self,
        topic: &Topic,
        state: SessionState,
    ) -> Result<SettledSession, ClientError> {
        self.session.update(topic, state).await
    }

    /// Widens the session permissions. Controller only.
    pub async fn upgrade(
        &self,
        topic: &Topic,
        permissions: SessionPermissions,
    ) -> Result<SettledSession, ClientError> {
        self.session.upgrade(topic, permissions).await
    }

    /// Sends a typed notification over a settled session.
    pub async fn notify(
        &self,
        topic: &Topic,
        notification_type: impl Into<String>,
        data: Value,
    ) -> Result<(), ClientError> {
        self.session.notify(topic, notification_type.into(), data).await
    }

    /// Sends an application request over a settled session and awaits the
    /// peer's response.
    pub async fn request(
        &self,
        topic: &Topic,
        method: impl Into<String>,
        params: Value,
        chain_id: Option<String>,
    ) -> Result<Value, ClientError> {
        self.session
            .request(topic, method.into(), params, chain_id)
            .await
    }

    /// Writes the application response for a previously received
    /// `session.payload` event.
    pub async fn respond(
        &self,
        topic: &Topic,
        id: MessageId,
        result: Result<Value, ErrorParams>,
    ) -> Result<(), ClientError> {
        self.session.send(topic, id, result).await
    }

    /// Liveness check: pings a settled session, or a settled pairing when no
    /// session matches the topic.
    pub async fn ping(&self, topic: &Topic) -> Result<(), ClientError> {
        if self.session.get(topic).is_ok() {
            self.session.ping(topic).await
        } else {
            self.pairing.ping(topic).await
        }
    }

    /// Deletes a settled session. Idempotent.
    pub async fn disconnect(
        &self,
        topic: &Topic,
        reason: Option<Reason>,
    ) -> Result<(), ClientError> {
        let reason =
            reason.unwrap_or_else(|| Reason::new(reason::USER_DISCONNECTED, "User disconnected"));
        self.session.delete(topic, reason).await
    }

    /// Looks up a settled session.
    pub fn get_session(&self, topic: &Topic) -> Result<SettledSession, ClientError> {
        self.session.get(topic)
    }

    /// Looks up a settled pairing.
    pub fn get_pairing(&self, topic: &Topic) -> Result<SettledPairing, ClientError> {
        self.pairing.get(topic)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn await_settlement<S>(
    waiter: tokio::sync::oneshot::Receiver<Result<S, ClientError>>,
    ttl: u64,
) -> Result<S, ClientError> {
    match tokio::time::timeout(Duration::from_secs(ttl), waiter).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ClientError::ChannelClosed),
        Err(_) => Err(ClientError::Expired),
    }
}

/// Inbound message pump. Responses resolve outstanding requests inline;
/// requests are handed to a per-topic worker so one topic's handling is
/// sequential while topics stay independent of each other.
async fn dispatch_loop(
    relay: RelayClient,
    subscriptions: SubscriptionRegistry,
    pairing: Arc<PairingEngine>,
    session: Arc<SessionEngine>,
    mut inbound: mpsc::UnboundedReceiver<PublishedMessage>,
) {
    let mut workers: HashMap<Topic, mpsc::UnboundedSender<client_rpc::rpc::Request>> =
        HashMap::new();

    while let Some(message) = inbound.recv().await {
        let topic = message.topic.clone();

        if !subscriptions.contains(&topic) {
            debug!(%topic, "message on unknown topic dropped");
            continue;
        }

        // A hostile relay must not be able to crash the client: anything that
        // fails to decrypt or parse is logged and dropped.
        let plain = match relay.decrypt(&topic, &message.message) {
            Ok(plain) => plain,
            Err(err) => {
                warn!(%topic, "dropping undecryptable message: {err}");
                continue;
            }
        };

        match serde_json::from_str::<Payload>(&plain) {
            Ok(payload) => {
                if let Err(err) = payload.validate() {
                    warn!(%topic, "dropping invalid payload: {err}");
                    continue;
                }

                match payload {
                    Payload::Response(response) => {
                        relay.resolve_response(response);
                    }
                    Payload::Request(request) => {
                        if !relay.register_inbound(&topic, request.id) {
                            debug!(%topic, id = %request.id, "duplicate request dropped");
                            continue;
                        }

                        let sender = workers.entry(topic.clone()).or_insert_with(|| {
                            spawn_topic_worker(
                                topic.clone(),
                                Arc::clone(&pairing),
                                Arc::clone(&session),
                            )
                        });
                        sender.send(request).ok();
                    }
                }
            }
            Err(_) => {
                respond_unparsed(&relay, &topic, &plain).await;
            }
        }
    }
}

/// Answers a request that carries a method outside of the protocol with a
/// standard method-not-found error. Anything else unparseable is dropped.
async fn respond_unparsed(relay: &RelayClient, topic: &Topic, plain: &str) {
    let Ok(value) = serde_json::from_str::<Value>(plain) else {
        warn!(%topic, "dropping unparseable message");
        return;
    };

    let method = value.get("method").and_then(|m| m.as_str());
    let id = value.get("id").and_then(|i| i.as_u64());

    match (method, id) {
        (Some(method), Some(id)) => {
            debug!(%topic, method, "responding method-not-found");
            let metadata = rpc::response_metadata(method).unwrap_or(PublishMetadata {
                ttl: 300,
                prompt: false,
            });
            relay
                .publish_error(
                    topic,
                    MessageId::new(id),
                    ErrorParams::new(
                        rpc::METHOD_NOT_FOUND_CODE as i64,
                        format!("Method not found: {method}"),
                    ),
                    metadata,
                )
                .await
                .ok();
        }
        _ => warn!(%topic, "dropping unparseable message"),
    }
}

fn spawn_topic_worker(
    topic: Topic,
    pairing: Arc<PairingEngine>,
    session: Arc<SessionEngine>,
) -> mpsc::UnboundedSender<client_rpc::rpc::Request> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<client_rpc::rpc::Request>();

    tokio::spawn(async move {
        while let Some(request) = receiver.recv().await {
            route_request(&topic, request, &pairing, &session).await;
        }
    });

    sender
}

async fn route_request(
    topic: &Topic,
    request: client_rpc::rpc::Request,
    pairing: &PairingEngine,
    session: &SessionEngine,
) {
    if request.params.method().starts_with("wc_pairing") {
        if let Some(inner) = pairing.handle_request(topic.clone(), request).await {
            // Cross-wiring: a session proposal carried through the pairing
            // payload is handed to the session controller.
            if inner.method == methods::SESSION_PROPOSE {
                session.handle_proposal(topic.clone(), inner).await;
            } else {
                debug!(%topic, method = %inner.method, "pairing payload left to the application");
            }
        }
    } else {
        session.handle_request(topic.clone(), request).await;
    }
}

/// Expiry sweeper: fires every second, expiring pending and settled records
/// through their controllers and unsubscribing orphaned topics.
async fn sweep_loop(
    relay: RelayClient,
    subscriptions: SubscriptionRegistry,
    pairing: Arc<PairingEngine>,
    session: Arc<SessionEngine>,
) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        pairing.sweep().await;
        session.sweep().await;

        for (topic, id) in subscriptions.expired(now_seconds()) {
            debug!(%topic, "sweeping expired subscription");
            subscriptions.remove(&topic);
            relay.unsubscribe(&topic, id).await.ok();
        }
    }
}
