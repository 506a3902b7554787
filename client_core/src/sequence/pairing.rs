//! Pairing sequence controller.
//!
//! A pairing is signalled out-of-band: `propose` subscribes to a random
//! rendezvous topic and hands back a URI; the responder answers on that topic
//! with `wc_pairingApprove`/`wc_pairingReject`, key agreement yields the
//! settled topic, and from then on only the permitted JSON RPC methods (by
//! default the session proposal) may traverse the channel.

use {
    super::{
        now_seconds, reason, serde_sym_key, Context, PendingStatus, SequenceRecord,
        SequenceTables, SettlementWaiters, TopicLocks, PAIRING_TTL, PROPOSAL_TTL,
    },
    crate::{
        crypto::key::{Keypair, SymKey},
        error::ClientError,
        event::ClientEvent,
        storage::SequenceStorage,
        subscription::{SequenceKind, SubscriptionEntry},
        uri::PairingUri,
    },
    client_rpc::{
        domain::{MessageId, Topic},
        rpc::{
            self, methods, ErrorParams, JsonRpcPermissions, PairingApproveRequest,
            PairingDeleteRequest, PairingPayloadRequest, PairingPermissions, PairingPingRequest,
            PairingProposal, PairingRejectRequest, PairingState, PairingUpdateRequest,
            Participant, PayloadRequest, Proposer, PublishMetadata, Reason, RelayProtocol,
            RequestParams, ResponseParamsSuccess, Signal,
        },
    },
    dashmap::DashSet,
    serde::{Deserialize, Serialize},
    std::{str::FromStr, sync::Arc},
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

pub(crate) type PairingWaiter = oneshot::Receiver<Result<SettledPairing, ClientError>>;

/// A settled pairing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledPairing {
    pub topic: Topic,
    pub relay: RelayProtocol,
    #[serde(rename = "self")]
    pub self_participant: Participant,
    #[serde(rename = "peer")]
    pub peer_participant: Participant,
    pub permissions: PairingPermissions,
    /// Whether this side holds the controller role.
    pub controller: bool,
    #[serde(with = "serde_sym_key")]
    pub sym_key: SymKey,
    /// UTC seconds.
    pub expiry: u64,
    #[serde(default)]
    pub state: PairingState,
}

impl SequenceRecord for SettledPairing {
    fn record_topic(&self) -> Topic {
        self.topic.clone()
    }
}

/// A pending pairing record, keyed by the proposal topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPairing {
    pub topic: Topic,
    #[serde(flatten)]
    pub status: PendingStatus,
    pub keypair: Keypair,
    pub proposal: PairingProposal,
    /// UTC seconds.
    pub expiry: u64,
}

impl SequenceRecord for PendingPairing {
    fn record_topic(&self) -> Topic {
        self.topic.clone()
    }
}

/// Methods permitted through a settled pairing unless the proposal says
/// otherwise.
pub fn default_permissions() -> PairingPermissions {
    PairingPermissions {
        jsonrpc: JsonRpcPermissions {
            methods: [methods::SESSION_PROPOSE.to_owned()].into(),
        },
    }
}

pub struct PairingEngine {
    ctx: Arc<Context>,
    tables: SequenceTables<PendingPairing, SettledPairing>,
    locks: TopicLocks,
    waiters: SettlementWaiters<SettledPairing>,
    /// Proposal topics this side already responded to; survives settlement so
    /// a second `pair` against the same URI fails loudly.
    responded: DashSet<Topic>,
}

impl PairingEngine {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        let storage = SequenceStorage::new(
            Arc::clone(&ctx.storage),
            &ctx.storage_context,
            "pairing",
        );

        Self {
            ctx,
            tables: SequenceTables::new(storage),
            locks: TopicLocks::default(),
            waiters: SettlementWaiters::default(),
            responded: DashSet::new(),
        }
    }

    /// Rehydrates tables from storage, re-establishes subscriptions and drops
    /// expired or unresumable records.
    pub(crate) async fn init(&self) -> Result<(), ClientError> {
        let (pending, settled) = self.tables.load().await?;
        let now = now_seconds();

        for record in settled {
            if record.expiry <= now {
                self.tables.settled.remove(&record.topic);
                self.ctx.events.emit(ClientEvent::PairingDeleted {
                    topic: record.topic,
                    reason: Reason::new(reason::EXPIRED, "Pairing expired"),
                });
                continue;
            }

            let id = self.ctx.relay.subscribe(&record.topic).await?;
            self.ctx.subscriptions.insert(
                record.topic.clone(),
                SubscriptionEntry {
                    id,
                    sym_key: Some(record.sym_key),
                    expiry: record.expiry,
                    kind: SequenceKind::Pairing,
                },
            );
        }

        for record in pending {
            // Only locally proposed pairings can be resumed; a respond that
            // was interrupted mid-acknowledgement starts over from the URI.
            if record.expiry <= now || record.status != PendingStatus::Proposed {
                self.tables.pending.remove(&record.topic);
                continue;
            }

            let id = self.ctx.relay.subscribe(&record.topic).await?;
            self.ctx.subscriptions.insert(
                record.topic.clone(),
                SubscriptionEntry {
                    id,
                    sym_key: None,
                    expiry: record.expiry,
                    kind: SequenceKind::Pairing,
                },
            );
        }

        self.tables.persist().await?;

        Ok(())
    }

    /// Creates a new pairing proposal: subscribes to a fresh rendezvous topic
    /// and emits the URI for out-of-band delivery. The returned waiter
    /// resolves once the peer settles or rejects.
    pub(crate) async fn propose(
        &self,
        permissions: Option<PairingPermissions>,
    ) -> Result<(PairingProposal, PairingWaiter), ClientError> {
        let keypair = Keypair::generate();
        let topic = Topic::generate();
        let relay = RelayProtocol::default();
        let proposer = Proposer {
            public_key: keypair.public_key(),
            controller: true,
            metadata: None,
        };

        let uri = PairingUri::new(topic.clone(), &proposer, relay.clone()).to_string();
        let proposal = PairingProposal {
            topic: topic.clone(),
            relay,
            proposer,
            signal: Signal::Uri { uri: uri.clone() },
            permissions: permissions.unwrap_or_else(default_permissions),
            ttl: PROPOSAL_TTL,
        };
        let expiry = now_seconds() + PROPOSAL_TTL;

        let _guard = self.locks.lock(&topic).await;

        let id = self.ctx.relay.subscribe(&topic).await?;
        self.ctx.subscriptions.insert(
            topic.clone(),
            SubscriptionEntry {
                id,
                sym_key: None,
                expiry,
                kind: SequenceKind::Pairing,
            },
        );

        self.tables.pending.insert(
            topic.clone(),
            PendingPairing {
                topic: topic.clone(),
                status: PendingStatus::Proposed,
                keypair,
                proposal: proposal.clone(),
                expiry,
            },
        );
        self.tables.persist_pending().await?;

        let waiter = self.waiters.register(topic);
        self.ctx.events.emit(ClientEvent::PairingProposed {
            proposal: proposal.clone(),
            uri,
        });

        Ok((proposal, waiter))
    }

    /// Responds to a pairing URI received out-of-band.
    pub(crate) async fn pair(&self, uri: &str) -> Result<SettledPairing, ClientError> {
        let parsed = PairingUri::from_str(uri)?;

        let proposal = PairingProposal {
            topic: parsed.topic.clone(),
            relay: parsed.relay.clone(),
            proposer: Proposer {
                public_key: parsed.public_key.clone(),
                controller: parsed.controller,
                metadata: None,
            },
            signal: Signal::Uri {
                uri: uri.to_owned(),
            },
            permissions: default_permissions(),
            ttl: PROPOSAL_TTL,
        };

        self.respond(true, proposal)
            .await?
            .ok_or(ClientError::Rpc {
                code: reason::SETTLEMENT_FAILED,
                message: "pairing settlement failed".to_owned(),
            })
    }

    /// Responds to a proposal. Holds the proposal-topic lock until the peer
    /// acknowledges or the request times out, which is what makes a double
    /// response race lose deterministically.
    pub(crate) async fn respond(
        &self,
        approved: bool,
        proposal: PairingProposal,
    ) -> Result<Option<SettledPairing>, ClientError> {
        let topic = proposal.topic.clone();
        let _guard = self.locks.lock(&topic).await;

        if self.responded.contains(&topic) || self.tables.pending.contains_key(&topic) {
            return Err(ClientError::ProposalAlreadyResponded(topic));
        }

        if !approved {
            self.responded.insert(topic.clone());

            let subscription_id = self.ctx.relay.subscribe(&topic).await?;
            self.ctx.subscriptions.insert(
                topic.clone(),
                SubscriptionEntry {
                    id: subscription_id.clone(),
                    sym_key: None,
                    expiry: now_seconds() + PROPOSAL_TTL,
                    kind: SequenceKind::Pairing,
                },
            );

            let reject = PairingRejectRequest {
                topic: topic.clone(),
                reason: Reason::new(reason::USER_REJECTED, "User rejected"),
            };

            if let Err(err) = self
                .ctx
                .relay
                .publish_request(&topic, RequestParams::PairingReject(reject.clone()))
                .await
            {
                debug!(%topic, "pairing reject not acknowledged: {err}");
            }

            self.ctx.subscriptions.remove(&topic);
            self.ctx
                .relay
                .unsubscribe(&topic, subscription_id)
                .await
                .ok();
            self.ctx.events.emit(ClientEvent::PairingDeleted {
                topic,
                reason: reject.reason,
            });

            return Ok(None);
        }

        let keypair = Keypair::generate();
        let shared = keypair.derive(&proposal.proposer.public_key)?;
        let settled_topic = shared.settled_topic();
        let expiry = now_seconds() + PAIRING_TTL;

        // Subscribe to the proposal topic for the settle acknowledgement, and
        // to the settled topic ahead of the approve so no peer message is
        // lost. Both are torn down again if settlement fails.
        let proposal_subscription = self.ctx.relay.subscribe(&topic).await?;
        self.ctx.subscriptions.insert(
            topic.clone(),
            SubscriptionEntry {
                id: proposal_subscription.clone(),
                sym_key: None,
                expiry: now_seconds() + PROPOSAL_TTL,
                kind: SequenceKind::Pairing,
            },
        );

        let settled_subscription = self.ctx.relay.subscribe(&settled_topic).await?;
        self.ctx.subscriptions.insert(
            settled_topic.clone(),
            SubscriptionEntry {
                id: settled_subscription.clone(),
                sym_key: Some(*shared.symmetric_key()),
                expiry,
                kind: SequenceKind::Pairing,
            },
        );

        // Holding the settled-topic lock until the record lands keeps early
        // peer traffic on the new topic queued instead of unmatched.
        let settled_guard = self.locks.lock(&settled_topic).await;

        self.tables.pending.insert(
            topic.clone(),
            PendingPairing {
                topic: topic.clone(),
                status: PendingStatus::Responded {
                    settled_topic: settled_topic.clone(),
                },
                keypair: keypair.clone(),
                proposal: proposal.clone(),
                expiry: now_seconds() + PROPOSAL_TTL,
            },
        );
        self.tables.persist_pending().await?;
        self.responded.insert(topic.clone());

        let approve = PairingApproveRequest {
            topic: topic.clone(),
            relay: proposal.relay.clone(),
            responder: Participant {
                public_key: keypair.public_key(),
                metadata: self.ctx.metadata.clone(),
            },
            expiry,
            state: PairingState::default(),
        };

        let ack = self
            .ctx
            .relay
            .publish_request(&topic, RequestParams::PairingApprove(approve))
            .await
            .and_then(|value| {
                Ok(ResponseParamsSuccess::try_from_method(
                    methods::PAIRING_APPROVE,
                    value,
                )?)
            });

        let acknowledged = matches!(ack, Ok(ResponseParamsSuccess::PairingApprove(true)));
        if !acknowledged {
            self.tables.pending.remove(&topic);
            self.ctx.subscriptions.remove(&topic);
            self.ctx.subscriptions.remove(&settled_topic);
            self.ctx
                .relay
                .unsubscribe(&topic, proposal_subscription)
                .await
                .ok();
            self.ctx
                .relay
                .unsubscribe(&settled_topic, settled_subscription)
                .await
                .ok();
            self.tables.persist_pending().await?;

            return match ack {
                Err(err) => Err(err),
                Ok(_) => Err(ClientError::Rpc {
                    code: reason::SETTLEMENT_FAILED,
                    message: "peer rejected the settlement".to_owned(),
                }),
            };
        }

        let settled = SettledPairing {
            topic: settled_topic.clone(),
            relay: proposal.relay.clone(),
            self_participant: Participant {
                public_key: keypair.public_key(),
                metadata: self.ctx.metadata.clone(),
            },
            peer_participant: Participant {
                public_key: proposal.proposer.public_key.clone(),
                metadata: proposal.proposer.metadata.clone(),
            },
            permissions: proposal.permissions.clone(),
            controller: !proposal.proposer.controller,
            sym_key: *shared.symmetric_key(),
            expiry,
            state: PairingState::default(),
        };

        self.tables.pending.remove(&topic);
        self.tables
            .settled
            .insert(settled_topic.clone(), settled.clone());
        self.tables.persist().await?;

        self.ctx.subscriptions.remove(&topic);
        self.ctx
            .relay
            .unsubscribe(&topic, proposal_subscription)
            .await
            .ok();

        self.ctx.events.emit(ClientEvent::PairingSettled {
            pairing: settled.clone(),
        });

        drop(settled_guard);
        self.enrich_metadata(&settled).await;

        Ok(Some(settled))
    }

    /// Sends a state update. Controller only; the table mutates once the peer
    /// acknowledges, so a timeout leaves no local trace.
    pub(crate) async fn update(
        &self,
        topic: &Topic,
        state: PairingState,
    ) -> Result<SettledPairing, ClientError> {
        let _guard = self.locks.lock(topic).await;

        let mut settled = self.get(topic)?;
        if !settled.controller {
            return Err(ClientError::UnauthorizedUpdate);
        }

        let update = PairingUpdateRequest {
            state: state.clone(),
        };
        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::PairingUpdate(update))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::PAIRING_UPDATE, value)?;

        if state.metadata.is_some() {
            settled.self_participant.metadata = state.metadata.clone();
        }
        settled.state = state;
        self.tables.settled.insert(topic.clone(), settled.clone());
        self.tables.persist_settled().await?;

        self.ctx.events.emit(ClientEvent::PairingUpdated {
            pairing: settled.clone(),
        });

        Ok(settled)
    }

    /// Liveness check of the settled channel.
    pub(crate) async fn ping(&self, topic: &Topic) -> Result<(), ClientError> {
        self.get(topic)?;

        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::PairingPing(PairingPingRequest {}))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::PAIRING_PING, value)?;

        Ok(())
    }

    /// Deletes a settled pairing. Idempotent.
    pub(crate) async fn delete(&self, topic: &Topic, reason: Reason) -> Result<(), ClientError> {
        let _guard = self.locks.lock(topic).await;

        if self.tables.settled.get(topic).is_none() {
            return Ok(());
        }

        let delete = PairingDeleteRequest {
            reason: reason.clone(),
        };
        if let Err(err) = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::PairingDelete(delete))
            .await
        {
            debug!(%topic, "pairing delete not acknowledged: {err}");
        }

        self.remove_settled(topic).await?;
        self.ctx.events.emit(ClientEvent::PairingDeleted {
            topic: topic.clone(),
            reason,
        });

        Ok(())
    }

    /// Looks up a settled pairing.
    pub(crate) fn get(&self, topic: &Topic) -> Result<SettledPairing, ClientError> {
        self.tables
            .settled
            .get(topic)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ClientError::NoMatchingTopic(topic.clone()))
    }

    /// Drops records past their expiry; called by the sweeper.
    pub(crate) async fn sweep(&self) {
        let now = now_seconds();

        let expired_pending: Vec<Topic> = self
            .tables
            .pending
            .iter()
            .filter(|entry| entry.value().expiry <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for topic in expired_pending {
            let _guard = self.locks.lock(&topic).await;

            let Some((_, pending)) = self.tables.pending.remove(&topic) else {
                continue;
            };

            if let Some(entry) = self.ctx.subscriptions.remove(&topic) {
                self.ctx.relay.unsubscribe(&topic, entry.id).await.ok();
            }
            // A half-settled respond also cleans up its settled topic.
            if let PendingStatus::Responded { settled_topic } = &pending.status {
                if let Some(entry) = self.ctx.subscriptions.remove(settled_topic) {
                    self.ctx.relay.unsubscribe(settled_topic, entry.id).await.ok();
                }
            }

            if let Err(err) = self.tables.persist_pending().await {
                warn!(%topic, "failed to persist pending pairings: {err}");
            }
            self.ctx.events.emit(ClientEvent::PairingDeleted {
                topic: topic.clone(),
                reason: Reason::new(reason::EXPIRED, "Proposal expired"),
            });
            self.waiters.resolve(&topic, Err(ClientError::Expired));
        }

        let expired_settled: Vec<Topic> = self
            .tables
            .settled
            .iter()
            .filter(|entry| entry.value().expiry <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for topic in expired_settled {
            let _guard = self.locks.lock(&topic).await;

            if self.tables.settled.get(&topic).is_none() {
                continue;
            }
            if let Err(err) = self.remove_settled(&topic).await {
                warn!(%topic, "failed to remove expired pairing: {err}");
            }
            self.ctx.events.emit(ClientEvent::PairingDeleted {
                topic,
                reason: Reason::new(reason::EXPIRED, "Pairing expired"),
            });
        }
    }

    /// Inbound request entry point. Returns the inner payload request when it
    /// must be routed onwards (session proposals).
    pub(crate) async fn handle_request(
        &self,
        topic: Topic,
        request: client_rpc::rpc::Request,
    ) -> Option<PayloadRequest> {
        let id = request.id;

        match request.params {
            RequestParams::PairingApprove(params) => {
                self.on_approve(topic, id, params).await;
                None
            }
            RequestParams::PairingReject(params) => {
                self.on_reject(topic, id, params).await;
                None
            }
            RequestParams::PairingUpdate(params) => {
                self.on_update(topic, id, params).await;
                None
            }
            RequestParams::PairingDelete(params) => {
                self.on_delete(topic, id, params).await;
                None
            }
            RequestParams::PairingPing(_) => {
                self.on_ping(topic, id).await;
                None
            }
            RequestParams::PairingPayload(params) => self.on_payload(topic, id, params).await,
            other => {
                warn!(%topic, method = other.method(), "unexpected method on pairing topic");
                self.publish_error(
                    &topic,
                    id,
                    rpc::METHOD_NOT_FOUND_CODE as i64,
                    format!("Method not found: {}", other.method()),
                    other.method(),
                )
                .await;
                None
            }
        }
    }

    async fn on_approve(&self, topic: Topic, id: MessageId, params: PairingApproveRequest) {
        let _guard = self.locks.lock(&topic).await;

        let pending = self
            .tables
            .pending
            .get(&topic)
            .filter(|entry| entry.value().status == PendingStatus::Proposed)
            .map(|entry| entry.value().clone());

        let Some(pending) = pending else {
            self.publish_error(
                &topic,
                id,
                reason::NO_MATCHING_TOPIC,
                "No pending pairing proposal".to_owned(),
                methods::PAIRING_APPROVE,
            )
            .await;
            return;
        };

        let settled = match self.settle_proposed(&pending, &params).await {
            Ok(settled) => settled,
            Err(err) => {
                warn!(%topic, "pairing settlement failed: {err}");
                self.publish_error(
                    &topic,
                    id,
                    reason::SETTLEMENT_FAILED,
                    err.to_string(),
                    methods::PAIRING_APPROVE,
                )
                .await;
                self.fail_pending(&topic, err.to_string()).await;
                self.waiters.resolve(&topic, Err(err));
                return;
            }
        };

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingApprove(true))
            .await
        {
            warn!(%topic, "failed to acknowledge pairing approve: {err}");
        }

        if let Some(entry) = self.ctx.subscriptions.remove(&topic) {
            self.ctx.relay.unsubscribe(&topic, entry.id).await.ok();
        }

        self.ctx.events.emit(ClientEvent::PairingSettled {
            pairing: settled.clone(),
        });
        self.waiters.resolve(&topic, Ok(settled.clone()));

        self.enrich_metadata(&settled).await;
    }

    /// Promotes a proposed pairing using the responder's approve parameters.
    async fn settle_proposed(
        &self,
        pending: &PendingPairing,
        params: &PairingApproveRequest,
    ) -> Result<SettledPairing, ClientError> {
        if pending.expiry <= now_seconds() {
            return Err(ClientError::Expired);
        }

        let shared = pending.keypair.derive(&params.responder.public_key)?;
        let settled_topic = shared.settled_topic();

        let subscription_id = self.ctx.relay.subscribe(&settled_topic).await?;
        self.ctx.subscriptions.insert(
            settled_topic.clone(),
            SubscriptionEntry {
                id: subscription_id,
                sym_key: Some(*shared.symmetric_key()),
                expiry: params.expiry,
                kind: SequenceKind::Pairing,
            },
        );

        let settled = SettledPairing {
            topic: settled_topic.clone(),
            relay: params.relay.clone(),
            self_participant: Participant {
                public_key: pending.keypair.public_key(),
                metadata: self.ctx.metadata.clone(),
            },
            peer_participant: params.responder.clone(),
            permissions: pending.proposal.permissions.clone(),
            controller: pending.proposal.proposer.controller,
            sym_key: *shared.symmetric_key(),
            expiry: params.expiry,
            state: params.state.clone(),
        };

        self.tables.pending.remove(&pending.topic);
        self.tables
            .settled
            .insert(settled_topic, settled.clone());
        self.tables.persist().await?;

        Ok(settled)
    }

    async fn on_reject(&self, topic: Topic, id: MessageId, params: PairingRejectRequest) {
        let _guard = self.locks.lock(&topic).await;

        if self.tables.pending.remove(&topic).is_none() {
            self.publish_error(
                &topic,
                id,
                reason::NO_MATCHING_TOPIC,
                "No pending pairing proposal".to_owned(),
                methods::PAIRING_REJECT,
            )
            .await;
            return;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingReject(true))
            .await
        {
            debug!(%topic, "failed to acknowledge pairing reject: {err}");
        }

        if let Some(entry) = self.ctx.subscriptions.remove(&topic) {
            self.ctx.relay.unsubscribe(&topic, entry.id).await.ok();
        }
        if let Err(err) = self.tables.persist_pending().await {
            warn!(%topic, "failed to persist pending pairings: {err}");
        }

        self.ctx.events.emit(ClientEvent::PairingDeleted {
            topic: topic.clone(),
            reason: params.reason.clone(),
        });
        self.waiters.resolve(
            &topic,
            Err(ClientError::Rpc {
                code: params.reason.code,
                message: params.reason.message,
            }),
        );
    }

    async fn on_update(&self, topic: Topic, id: MessageId, params: PairingUpdateRequest) {
        let _guard = self.locks.lock(&topic).await;

        let mut settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching pairing topic".to_owned(),
                    methods::PAIRING_UPDATE,
                )
                .await;
                return;
            }
        };

        // Updates come from the controller; if this side holds the role the
        // peer cannot.
        if settled.controller {
            self.publish_error(
                &topic,
                id,
                reason::UNAUTHORIZED_UPDATE,
                "Unauthorized update".to_owned(),
                methods::PAIRING_UPDATE,
            )
            .await;
            return;
        }

        if params.state.metadata.is_some() {
            settled.peer_participant.metadata = params.state.metadata.clone();
        }
        settled.state = params.state;
        self.tables.settled.insert(topic.clone(), settled.clone());
        if let Err(err) = self.tables.persist_settled().await {
            warn!(%topic, "failed to persist settled pairings: {err}");
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingUpdate(true))
            .await
        {
            debug!(%topic, "failed to acknowledge pairing update: {err}");
        }

        self.ctx
            .events
            .emit(ClientEvent::PairingUpdated { pairing: settled });
    }

    async fn on_delete(&self, topic: Topic, id: MessageId, params: PairingDeleteRequest) {
        let _guard = self.locks.lock(&topic).await;

        let existed = self.tables.settled.get(&topic).is_some();

        // Acknowledge before the subscription (and its key) is torn down.
        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingDelete(true))
            .await
        {
            debug!(%topic, "failed to acknowledge pairing delete: {err}");
        }

        if existed {
            if let Err(err) = self.remove_settled(&topic).await {
                warn!(%topic, "failed to remove deleted pairing: {err}");
            }
            self.ctx.events.emit(ClientEvent::PairingDeleted {
                topic,
                reason: params.reason,
            });
        }
    }

    async fn on_ping(&self, topic: Topic, id: MessageId) {
        if self.get(&topic).is_err() {
            self.publish_error(
                &topic,
                id,
                reason::NO_MATCHING_TOPIC,
                "No matching pairing topic".to_owned(),
                methods::PAIRING_PING,
            )
            .await;
            return;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingPing(true))
            .await
        {
            debug!(%topic, "failed to acknowledge pairing ping: {err}");
        }
    }

    /// Validates an inbound payload envelope against the pairing permission
    /// set and emits it. The inner request is returned for onward routing.
    async fn on_payload(
        &self,
        topic: Topic,
        id: MessageId,
        params: PairingPayloadRequest,
    ) -> Option<PayloadRequest> {
        let _guard = self.locks.lock(&topic).await;

        let settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching pairing topic".to_owned(),
                    methods::PAIRING_PAYLOAD,
                )
                .await;
                return None;
            }
        };

        let method = params.request.method.clone();
        if !settled.permissions.jsonrpc.allows(&method) {
            debug!(%topic, %method, "method not permitted through pairing");
            self.publish_error(
                &topic,
                id,
                rpc::METHOD_NOT_FOUND_CODE as i64,
                format!("Method not found: {method}"),
                methods::PAIRING_PAYLOAD,
            )
            .await;
            return None;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::PairingPayload(true))
            .await
        {
            debug!(%topic, "failed to acknowledge pairing payload: {err}");
        }

        self.ctx.events.emit(ClientEvent::PairingPayload {
            topic,
            request: params.request.clone(),
        });

        Some(params.request)
    }

    /// After settlement the controller shares its app metadata so the peer
    /// can render the counterparty.
    async fn enrich_metadata(&self, settled: &SettledPairing) {
        if !settled.controller || self.ctx.metadata.is_none() {
            return;
        }

        let state = PairingState {
            metadata: self.ctx.metadata.clone(),
        };
        if let Err(err) = self.update(&settled.topic, state).await {
            warn!(topic = %settled.topic, "pairing metadata update failed: {err}");
        }
    }

    async fn fail_pending(&self, topic: &Topic, reason_message: String) {
        debug!(%topic, reason = %reason_message, "pending pairing failed");
        self.tables.pending.remove(topic);
        if let Err(err) = self.tables.persist_pending().await {
            warn!(%topic, "failed to persist pending pairings: {err}");
        }
    }

    async fn remove_settled(&self, topic: &Topic) -> Result<(), ClientError> {
        self.tables.settled.remove(topic);
        if let Some(entry) = self.ctx.subscriptions.remove(topic) {
            self.ctx.relay.unsubscribe(topic, entry.id).await.ok();
        }
        self.tables.persist_settled().await?;
        self.locks.forget(topic);

        Ok(())
    }

    async fn publish_error(
        &self,
        topic: &Topic,
        id: MessageId,
        code: i64,
        message: String,
        method: &str,
    ) {
        let metadata = rpc::response_metadata(method).unwrap_or(PublishMetadata {
            ttl: 300,
            prompt: false,
        });

        if let Err(err) = self
            .ctx
            .relay
            .publish_error(topic, id, ErrorParams::new(code, message), metadata)
            .await
        {
            warn!(%topic, "failed to publish error response: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_record_serde_round_trip() {
        let settled = SettledPairing {
            topic: Topic::generate(),
            relay: RelayProtocol::default(),
            self_participant: Participant {
                public_key: "aa".repeat(32),
                metadata: None,
            },
            peer_participant: Participant {
                public_key: "bb".repeat(32),
                metadata: None,
            },
            permissions: default_permissions(),
            controller: true,
            sym_key: [3u8; 32],
            expiry: 1675757972,
            state: PairingState::default(),
        };

        let json = serde_json::to_value(&settled).unwrap();
        assert_eq!(json.get("symKey").unwrap(), &serde_json::json!("03".repeat(32)));
        assert!(json.get("self").is_some());
        assert!(json.get("peer").is_some());

        let restored: SettledPairing = serde_json::from_value(json).unwrap();
        assert_eq!(restored.topic, settled.topic);
        assert_eq!(restored.sym_key, settled.sym_key);
    }

    #[test]
    fn default_permissions_admit_only_session_proposals() {
        let permissions = default_permissions();

        assert!(permissions.jsonrpc.allows(methods::SESSION_PROPOSE));
        assert!(!permissions.jsonrpc.allows("eth_sign"));
    }
}
