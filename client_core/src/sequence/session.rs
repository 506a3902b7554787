//! Session sequence controller.
//!
//! A session is signalled over a settled pairing: the proposal travels
//! wrapped in `wc_pairingPayload` on the parent pairing topic, the responder
//! answers there with `wc_sessionApprove`/`wc_sessionReject`, and once key
//! agreement settles the session's own topic the channel carries application
//! JSON RPC bidirectionally, scoped by the session permissions.

use {
    super::{
        now_seconds, reason, serde_sym_key, Context, PendingStatus, SequenceRecord,
        SequenceTables, SettlementWaiters, TopicLocks, PROPOSAL_TTL, SESSION_TTL,
    },
    crate::{
        crypto::key::{Keypair, SymKey},
        error::ClientError,
        event::ClientEvent,
        storage::SequenceStorage,
        subscription::{SequenceKind, SubscriptionEntry},
    },
    client_rpc::{
        domain::{MessageId, Topic},
        rpc::{
            self, methods, ErrorParams, PairingPayloadRequest, Participant, PayloadRequest,
            Proposer, PublishMetadata, Reason, RequestParams, ResponseParamsSuccess,
            SessionApproveRequest, SessionDeleteRequest, SessionNotificationRequest,
            SessionPayloadRequest, SessionPermissions, SessionPingRequest, SessionProposal,
            SessionRejectRequest, SessionState, SessionUpdateRequest, SessionUpgradeRequest,
            Signal,
        },
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::sync::Arc,
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

pub(crate) type SessionWaiter = oneshot::Receiver<Result<SettledSession, ClientError>>;

/// A settled session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledSession {
    pub topic: Topic,
    pub relay: client_rpc::rpc::RelayProtocol,
    #[serde(rename = "self")]
    pub self_participant: Participant,
    #[serde(rename = "peer")]
    pub peer_participant: Participant,
    pub permissions: SessionPermissions,
    /// Whether this side holds the controller role.
    pub controller: bool,
    #[serde(with = "serde_sym_key")]
    pub sym_key: SymKey,
    /// UTC seconds.
    pub expiry: u64,
    #[serde(default)]
    pub state: SessionState,
}

impl SequenceRecord for SettledSession {
    fn record_topic(&self) -> Topic {
        self.topic.clone()
    }
}

/// A pending session record, keyed by the proposal topic. The keypair is
/// present on the proposing side from the start and on the responding side
/// once `respond` runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSession {
    pub topic: Topic,
    #[serde(flatten)]
    pub status: PendingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub keypair: Option<Keypair>,
    pub proposal: SessionProposal,
    /// UTC seconds.
    pub expiry: u64,
}

impl SequenceRecord for PendingSession {
    fn record_topic(&self) -> Topic {
        self.topic.clone()
    }
}

pub struct SessionEngine {
    ctx: Arc<Context>,
    tables: SequenceTables<PendingSession, SettledSession>,
    locks: TopicLocks,
    waiters: SettlementWaiters<SettledSession>,
}

impl SessionEngine {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        let storage = SequenceStorage::new(
            Arc::clone(&ctx.storage),
            &ctx.storage_context,
            "session",
        );

        Self {
            ctx,
            tables: SequenceTables::new(storage),
            locks: TopicLocks::default(),
            waiters: SettlementWaiters::default(),
        }
    }

    /// Rehydrates tables from storage. Settled sessions re-establish their
    /// subscriptions; proposals ride the parent pairing's topic, so pending
    /// records only need expiry-checking.
    pub(crate) async fn init(&self) -> Result<(), ClientError> {
        let (pending, settled) = self.tables.load().await?;
        let now = now_seconds();

        for record in settled {
            if record.expiry <= now {
                self.tables.settled.remove(&record.topic);
                self.ctx.events.emit(ClientEvent::SessionDeleted {
                    topic: record.topic,
                    reason: Reason::new(reason::EXPIRED, "Session expired"),
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
                    kind: SequenceKind::Session,
                },
            );
        }

        for record in pending {
            if record.expiry <= now || record.status != PendingStatus::Proposed {
                self.tables.pending.remove(&record.topic);
            }
        }

        self.tables.persist().await?;

        Ok(())
    }

    /// Creates a session proposal signalled by a settled pairing and publishes
    /// it through the pairing payload envelope. The returned waiter resolves
    /// once the peer settles or rejects.
    pub(crate) async fn propose(
        &self,
        pairing_topic: &Topic,
        permissions: SessionPermissions,
    ) -> Result<(SessionProposal, SessionWaiter), ClientError> {
        permissions.validate()?;

        if self.ctx.subscriptions.sym_key(pairing_topic).is_none() {
            return Err(ClientError::NoMatchingTopic(pairing_topic.clone()));
        }

        let keypair = Keypair::generate();
        let topic = Topic::generate();
        let proposal = SessionProposal {
            topic: topic.clone(),
            relay: client_rpc::rpc::RelayProtocol::default(),
            proposer: Proposer {
                public_key: keypair.public_key(),
                controller: true,
                metadata: self.ctx.metadata.clone(),
            },
            signal: Signal::Pairing {
                topic: pairing_topic.clone(),
            },
            permissions,
            ttl: PROPOSAL_TTL,
        };
        let expiry = now_seconds() + PROPOSAL_TTL;

        let _guard = self.locks.lock(&topic).await;

        self.tables.pending.insert(
            topic.clone(),
            PendingSession {
                topic: topic.clone(),
                status: PendingStatus::Proposed,
                keypair: Some(keypair),
                proposal: proposal.clone(),
                expiry,
            },
        );
        self.tables.persist_pending().await?;

        let waiter = self.waiters.register(topic.clone());
        self.ctx.events.emit(ClientEvent::SessionProposed {
            proposal: proposal.clone(),
        });

        let inner = PayloadRequest {
            id: MessageId::generate(),
            method: methods::SESSION_PROPOSE.to_owned(),
            params: serde_json::to_value(&proposal)?,
        };
        let receipt = self
            .ctx
            .relay
            .publish_request(
                pairing_topic,
                RequestParams::PairingPayload(PairingPayloadRequest { request: inner }),
            )
            .await;

        if let Err(err) = receipt {
            self.tables.pending.remove(&topic);
            self.tables.persist_pending().await?;
            self.ctx.events.emit(ClientEvent::SessionDeleted {
                topic: topic.clone(),
                reason: Reason::new(reason::SETTLEMENT_FAILED, "Proposal delivery failed"),
            });
            self.waiters.resolve(&topic, Err(ClientError::ChannelClosed));

            return Err(err);
        }

        Ok((proposal, waiter))
    }

    /// Registers a peer's proposal received through the parent pairing and
    /// emits it for the application to approve or reject.
    pub(crate) async fn handle_proposal(&self, pairing_topic: Topic, inner: PayloadRequest) {
        let proposal: SessionProposal = match serde_json::from_value(inner.params) {
            Ok(proposal) => proposal,
            Err(err) => {
                warn!(topic = %pairing_topic, "malformed session proposal: {err}");
                return;
            }
        };

        match &proposal.signal {
            Signal::Pairing { topic } if *topic == pairing_topic => {}
            _ => {
                warn!(topic = %pairing_topic, "session proposal signal does not match pairing");
                return;
            }
        }

        if let Err(err) = proposal.permissions.validate() {
            warn!(topic = %pairing_topic, "invalid session proposal permissions: {err}");
            return;
        }

        let topic = proposal.topic.clone();
        let _guard = self.locks.lock(&topic).await;

        if self.tables.pending.contains_key(&topic) || self.tables.settled.contains_key(&topic) {
            warn!(%topic, "session proposal topic already in use");
            return;
        }

        self.tables.pending.insert(
            topic.clone(),
            PendingSession {
                topic,
                status: PendingStatus::Proposed,
                keypair: None,
                proposal: proposal.clone(),
                expiry: now_seconds() + proposal.ttl,
            },
        );
        if let Err(err) = self.tables.persist_pending().await {
            warn!("failed to persist pending sessions: {err}");
        }

        self.ctx
            .events
            .emit(ClientEvent::SessionProposed { proposal });
    }

    /// Responds to a session proposal. Holds the proposal-topic lock until
    /// the peer acknowledges or the request times out.
    pub(crate) async fn respond(
        &self,
        approved: bool,
        proposal: SessionProposal,
        response: Option<SessionState>,
    ) -> Result<Option<SettledSession>, ClientError> {
        let Signal::Pairing {
            topic: parent_topic,
        } = proposal.signal.clone()
        else {
            return Err(ClientError::MalformedProposal(
                "session proposal has no pairing signal".to_owned(),
            ));
        };

        let topic = proposal.topic.clone();
        let _guard = self.locks.lock(&topic).await;

        let pending = match self.tables.pending.get(&topic) {
            Some(entry) if entry.value().status == PendingStatus::Proposed => {
                entry.value().clone()
            }
            // A concurrent respond already consumed the proposal; a settled or
            // rejected one is gone from the table entirely.
            Some(_) => return Err(ClientError::ProposalAlreadyResponded(topic)),
            None => return Err(ClientError::NoMatchingTopic(topic)),
        };

        if self.ctx.subscriptions.sym_key(&parent_topic).is_none() {
            return Err(ClientError::NoMatchingTopic(parent_topic));
        }

        if pending.expiry <= now_seconds() {
            self.tables.pending.remove(&topic);
            self.tables.persist_pending().await?;
            return Err(ClientError::Expired);
        }

        if !approved {
            self.tables.pending.remove(&topic);
            self.tables.persist_pending().await?;

            let reject = SessionRejectRequest {
                topic: topic.clone(),
                reason: Reason::new(reason::USER_REJECTED, "User rejected"),
            };
            if let Err(err) = self
                .ctx
                .relay
                .publish_request(&parent_topic, RequestParams::SessionReject(reject.clone()))
                .await
            {
                debug!(%topic, "session reject not acknowledged: {err}");
            }

            self.ctx.events.emit(ClientEvent::SessionDeleted {
                topic,
                reason: reject.reason,
            });

            return Ok(None);
        }

        let keypair = Keypair::generate();
        let shared = keypair.derive(&proposal.proposer.public_key)?;
        let settled_topic = shared.settled_topic();
        let expiry = now_seconds() + SESSION_TTL;

        if settled_topic == parent_topic {
            return Err(ClientError::MalformedProposal(
                "settled topic collides with the parent pairing".to_owned(),
            ));
        }

        let settled_subscription = self.ctx.relay.subscribe(&settled_topic).await?;
        self.ctx.subscriptions.insert(
            settled_topic.clone(),
            SubscriptionEntry {
                id: settled_subscription.clone(),
                sym_key: Some(*shared.symmetric_key()),
                expiry,
                kind: SequenceKind::Session,
            },
        );

        let settled_guard = self.locks.lock(&settled_topic).await;

        self.tables.pending.insert(
            topic.clone(),
            PendingSession {
                topic: topic.clone(),
                status: PendingStatus::Responded {
                    settled_topic: settled_topic.clone(),
                },
                keypair: Some(keypair.clone()),
                proposal: proposal.clone(),
                expiry: pending.expiry,
            },
        );
        self.tables.persist_pending().await?;

        let state = response.unwrap_or_default();
        let approve = SessionApproveRequest {
            topic: topic.clone(),
            relay: proposal.relay.clone(),
            responder: Participant {
                public_key: keypair.public_key(),
                metadata: self.ctx.metadata.clone(),
            },
            expiry,
            state: state.clone(),
        };

        let ack = self
            .ctx
            .relay
            .publish_request(&parent_topic, RequestParams::SessionApprove(approve))
            .await
            .and_then(|value| {
                Ok(ResponseParamsSuccess::try_from_method(
                    methods::SESSION_APPROVE,
                    value,
                )?)
            });

        let acknowledged = matches!(ack, Ok(ResponseParamsSuccess::SessionApprove(true)));
        if !acknowledged {
            self.tables.pending.remove(&topic);
            self.ctx.subscriptions.remove(&settled_topic);
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

        let settled = SettledSession {
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
            state,
        };

        self.tables.pending.remove(&topic);
        self.tables
            .settled
            .insert(settled_topic, settled.clone());
        self.tables.persist().await?;

        self.ctx.events.emit(ClientEvent::SessionSettled {
            session: settled.clone(),
        });

        drop(settled_guard);

        Ok(Some(settled))
    }

    /// Wraps an application request and routes it on the session topic,
    /// resolving with the peer's application-level response.
    pub(crate) async fn request(
        &self,
        topic: &Topic,
        method: String,
        params: Value,
        chain_id: Option<String>,
    ) -> Result<Value, ClientError> {
        self.get(topic)?;

        let id = MessageId::generate();
        let payload = SessionPayloadRequest {
            request: PayloadRequest {
                id,
                method,
                params,
            },
            chain_id,
        };

        self.ctx
            .relay
            .publish_request_with_id(topic, id, RequestParams::SessionPayload(payload))
            .await
    }

    /// Writes an application response for a previously received payload.
    pub(crate) async fn send(
        &self,
        topic: &Topic,
        id: MessageId,
        result: Result<Value, ErrorParams>,
    ) -> Result<(), ClientError> {
        self.get(topic)?;

        match result {
            Ok(value) => {
                self.ctx
                    .relay
                    .publish_response(topic, id, ResponseParamsSuccess::SessionPayload(value))
                    .await
            }
            Err(error) => {
                let metadata = rpc::response_metadata(methods::SESSION_PAYLOAD).unwrap_or(
                    PublishMetadata {
                        ttl: 300,
                        prompt: false,
                    },
                );
                self.ctx
                    .relay
                    .publish_error(topic, id, error, metadata)
                    .await
            }
        }
    }

    /// Sends a typed notification. The type must belong to the session's
    /// notification permission set.
    pub(crate) async fn notify(
        &self,
        topic: &Topic,
        notification_type: String,
        data: Value,
    ) -> Result<(), ClientError> {
        let settled = self.get(topic)?;

        if !settled.permissions.notifications.allows(&notification_type) {
            return Err(ClientError::UnauthorizedNotificationType(notification_type));
        }

        let notification = SessionNotificationRequest {
            notification_type,
            data,
        };
        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::SessionNotification(notification))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::SESSION_NOTIFICATION, value)?;

        Ok(())
    }

    /// Sends a state update. Controller only; the table mutates once the peer
    /// acknowledges, so a timeout leaves no local trace.
    pub(crate) async fn update(
        &self,
        topic: &Topic,
        state: SessionState,
    ) -> Result<SettledSession, ClientError> {
        let _guard = self.locks.lock(topic).await;

        let mut settled = self.get(topic)?;
        if !settled.controller {
            return Err(ClientError::UnauthorizedUpdate);
        }

        let update = SessionUpdateRequest {
            state: state.clone(),
        };
        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::SessionUpdate(update))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::SESSION_UPDATE, value)?;

        settled.state = state;
        self.tables.settled.insert(topic.clone(), settled.clone());
        self.tables.persist_settled().await?;

        self.ctx.events.emit(ClientEvent::SessionUpdated {
            session: settled.clone(),
        });

        Ok(settled)
    }

    /// Widens the session permissions. Controller only.
    pub(crate) async fn upgrade(
        &self,
        topic: &Topic,
        permissions: SessionPermissions,
    ) -> Result<SettledSession, ClientError> {
        let _guard = self.locks.lock(topic).await;

        let mut settled = self.get(topic)?;
        if !settled.controller {
            return Err(ClientError::UnauthorizedUpdate);
        }

        let upgrade = SessionUpgradeRequest {
            permissions: permissions.clone(),
        };
        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::SessionUpgrade(upgrade))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::SESSION_UPGRADE, value)?;

        settled.permissions.merge(permissions);
        self.tables.settled.insert(topic.clone(), settled.clone());
        self.tables.persist_settled().await?;

        self.ctx.events.emit(ClientEvent::SessionUpdated {
            session: settled.clone(),
        });

        Ok(settled)
    }

    /// Liveness check of the settled channel.
    pub(crate) async fn ping(&self, topic: &Topic) -> Result<(), ClientError> {
        self.get(topic)?;

        let value = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::SessionPing(SessionPingRequest {}))
            .await?;
        ResponseParamsSuccess::try_from_method(methods::SESSION_PING, value)?;

        Ok(())
    }

    /// Deletes a settled session. Idempotent.
    pub(crate) async fn delete(&self, topic: &Topic, reason: Reason) -> Result<(), ClientError> {
        let _guard = self.locks.lock(topic).await;

        if self.tables.settled.get(topic).is_none() {
            return Ok(());
        }

        let delete = SessionDeleteRequest {
            reason: reason.clone(),
        };
        if let Err(err) = self
            .ctx
            .relay
            .publish_request(topic, RequestParams::SessionDelete(delete))
            .await
        {
            debug!(%topic, "session delete not acknowledged: {err}");
        }

        self.remove_settled(topic).await?;
        self.ctx.events.emit(ClientEvent::SessionDeleted {
            topic: topic.clone(),
            reason,
        });

        Ok(())
    }

    /// Looks up a settled session.
    pub(crate) fn get(&self, topic: &Topic) -> Result<SettledSession, ClientError> {
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

            if let PendingStatus::Responded { settled_topic } = &pending.status {
                if let Some(entry) = self.ctx.subscriptions.remove(settled_topic) {
                    self.ctx.relay.unsubscribe(settled_topic, entry.id).await.ok();
                }
            }

            if let Err(err) = self.tables.persist_pending().await {
                warn!(%topic, "failed to persist pending sessions: {err}");
            }
            self.ctx.events.emit(ClientEvent::SessionDeleted {
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
                warn!(%topic, "failed to remove expired session: {err}");
            }
            self.ctx.events.emit(ClientEvent::SessionDeleted {
                topic,
                reason: Reason::new(reason::EXPIRED, "Session expired"),
            });
        }
    }

    /// Inbound request entry point for the `wc_session*` family; `topic` is
    /// the topic the message arrived on (parent pairing topic for
    /// propose/approve/reject, the session topic otherwise).
    pub(crate) async fn handle_request(&self, topic: Topic, request: client_rpc::rpc::Request) {
        let id = request.id;

        match request.params {
            RequestParams::SessionPropose(proposal) => {
                // Raw proposal on the pairing topic: acknowledge receipt and
                // register like a wrapped one.
                if let Err(err) = self
                    .ctx
                    .relay
                    .publish_response(&topic, id, ResponseParamsSuccess::SessionPropose(true))
                    .await
                {
                    debug!(%topic, "failed to acknowledge session proposal: {err}");
                }
                let inner = PayloadRequest {
                    id,
                    method: methods::SESSION_PROPOSE.to_owned(),
                    params: serde_json::to_value(&proposal).unwrap_or_default(),
                };
                self.handle_proposal(topic, inner).await;
            }
            RequestParams::SessionApprove(params) => self.on_approve(topic, id, params).await,
            RequestParams::SessionReject(params) => self.on_reject(topic, id, params).await,
            RequestParams::SessionUpdate(params) => self.on_update(topic, id, params).await,
            RequestParams::SessionUpgrade(params) => self.on_upgrade(topic, id, params).await,
            RequestParams::SessionDelete(params) => self.on_delete(topic, id, params).await,
            RequestParams::SessionPing(_) => self.on_ping(topic, id).await,
            RequestParams::SessionPayload(params) => self.on_payload(topic, id, params).await,
            RequestParams::SessionNotification(params) => {
                self.on_notification(topic, id, params).await
            }
            other => {
                warn!(%topic, method = other.method(), "unexpected method on session topic");
                self.publish_error(
                    &topic,
                    id,
                    rpc::METHOD_NOT_FOUND_CODE as i64,
                    format!("Method not found: {}", other.method()),
                    other.method(),
                )
                .await;
            }
        }
    }

    async fn on_approve(&self, pairing_topic: Topic, id: MessageId, params: SessionApproveRequest) {
        let topic = params.topic.clone();
        let _guard = self.locks.lock(&topic).await;

        let pending = self
            .tables
            .pending
            .get(&topic)
            .filter(|entry| {
                entry.value().status == PendingStatus::Proposed && entry.value().keypair.is_some()
            })
            .map(|entry| entry.value().clone());

        let Some(pending) = pending else {
            self.publish_error(
                &pairing_topic,
                id,
                reason::NO_MATCHING_TOPIC,
                "No pending session proposal".to_owned(),
                methods::SESSION_APPROVE,
            )
            .await;
            return;
        };

        let settled = match self.settle_proposed(&pending, &params).await {
            Ok(settled) => settled,
            Err(err) => {
                warn!(%topic, "session settlement failed: {err}");
                self.publish_error(
                    &pairing_topic,
                    id,
                    reason::SETTLEMENT_FAILED,
                    err.to_string(),
                    methods::SESSION_APPROVE,
                )
                .await;
                self.tables.pending.remove(&topic);
                self.tables.persist_pending().await.ok();
                self.waiters.resolve(&topic, Err(err));
                return;
            }
        };

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&pairing_topic, id, ResponseParamsSuccess::SessionApprove(true))
            .await
        {
            warn!(%topic, "failed to acknowledge session approve: {err}");
        }

        self.ctx.events.emit(ClientEvent::SessionSettled {
            session: settled.clone(),
        });
        self.waiters.resolve(&topic, Ok(settled));
    }

    /// Promotes a proposed session using the responder's approve parameters.
    async fn settle_proposed(
        &self,
        pending: &PendingSession,
        params: &SessionApproveRequest,
    ) -> Result<SettledSession, ClientError> {
        if pending.expiry <= now_seconds() {
            return Err(ClientError::Expired);
        }

        let keypair = pending
            .keypair
            .clone()
            .ok_or_else(|| ClientError::MalformedProposal("pending without keypair".to_owned()))?;
        let shared = keypair.derive(&params.responder.public_key)?;
        let settled_topic = shared.settled_topic();

        let subscription_id = self.ctx.relay.subscribe(&settled_topic).await?;
        self.ctx.subscriptions.insert(
            settled_topic.clone(),
            SubscriptionEntry {
                id: subscription_id,
                sym_key: Some(*shared.symmetric_key()),
                expiry: params.expiry,
                kind: SequenceKind::Session,
            },
        );

        let settled = SettledSession {
            topic: settled_topic.clone(),
            relay: params.relay.clone(),
            self_participant: Participant {
                public_key: keypair.public_key(),
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

    async fn on_reject(&self, pairing_topic: Topic, id: MessageId, params: SessionRejectRequest) {
        let topic = params.topic.clone();
        let _guard = self.locks.lock(&topic).await;

        if self.tables.pending.remove(&topic).is_none() {
            self.publish_error(
                &pairing_topic,
                id,
                reason::NO_MATCHING_TOPIC,
                "No pending session proposal".to_owned(),
                methods::SESSION_REJECT,
            )
            .await;
            return;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&pairing_topic, id, ResponseParamsSuccess::SessionReject(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session reject: {err}");
        }

        if let Err(err) = self.tables.persist_pending().await {
            warn!(%topic, "failed to persist pending sessions: {err}");
        }

        self.ctx.events.emit(ClientEvent::SessionDeleted {
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

    /// Validates an inbound payload against the session permission set and
    /// emits it. No acknowledgement here: the application's response via
    /// [`SessionEngine::send`] is the wire response.
    async fn on_payload(&self, topic: Topic, id: MessageId, params: SessionPayloadRequest) {
        let _guard = self.locks.lock(&topic).await;

        let settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching session topic".to_owned(),
                    methods::SESSION_PAYLOAD,
                )
                .await;
                return;
            }
        };

        let method = params.request.method.clone();
        if !settled.permissions.jsonrpc.allows(&method) {
            debug!(%topic, %method, "method not permitted through session");
            self.publish_error(
                &topic,
                id,
                rpc::METHOD_NOT_FOUND_CODE as i64,
                format!("Method not found: {method}"),
                methods::SESSION_PAYLOAD,
            )
            .await;
            return;
        }

        self.ctx.events.emit(ClientEvent::SessionPayload {
            topic,
            request: params.request,
            chain_id: params.chain_id,
        });
    }

    async fn on_notification(
        &self,
        topic: Topic,
        id: MessageId,
        params: SessionNotificationRequest,
    ) {
        let _guard = self.locks.lock(&topic).await;

        let settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching session topic".to_owned(),
                    methods::SESSION_NOTIFICATION,
                )
                .await;
                return;
            }
        };

        if !settled
            .permissions
            .notifications
            .allows(&params.notification_type)
        {
            self.publish_error(
                &topic,
                id,
                reason::UNAUTHORIZED_NOTIFICATION_TYPE,
                format!("Notification type not permitted: {}", params.notification_type),
                methods::SESSION_NOTIFICATION,
            )
            .await;
            return;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::SessionNotification(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session notification: {err}");
        }

        self.ctx.events.emit(ClientEvent::SessionNotification {
            topic,
            notification: params,
        });
    }

    async fn on_update(&self, topic: Topic, id: MessageId, params: SessionUpdateRequest) {
        let _guard = self.locks.lock(&topic).await;

        let mut settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching session topic".to_owned(),
                    methods::SESSION_UPDATE,
                )
                .await;
                return;
            }
        };

        if settled.controller {
            self.publish_error(
                &topic,
                id,
                reason::UNAUTHORIZED_UPDATE,
                "Unauthorized update".to_owned(),
                methods::SESSION_UPDATE,
            )
            .await;
            return;
        }

        settled.state = params.state;
        self.tables.settled.insert(topic.clone(), settled.clone());
        if let Err(err) = self.tables.persist_settled().await {
            warn!(%topic, "failed to persist settled sessions: {err}");
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::SessionUpdate(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session update: {err}");
        }

        self.ctx
            .events
            .emit(ClientEvent::SessionUpdated { session: settled });
    }

    async fn on_upgrade(&self, topic: Topic, id: MessageId, params: SessionUpgradeRequest) {
        let _guard = self.locks.lock(&topic).await;

        let mut settled = match self.get(&topic) {
            Ok(settled) => settled,
            Err(_) => {
                self.publish_error(
                    &topic,
                    id,
                    reason::NO_MATCHING_TOPIC,
                    "No matching session topic".to_owned(),
                    methods::SESSION_UPGRADE,
                )
                .await;
                return;
            }
        };

        if settled.controller {
            self.publish_error(
                &topic,
                id,
                reason::UNAUTHORIZED_UPDATE,
                "Unauthorized upgrade".to_owned(),
                methods::SESSION_UPGRADE,
            )
            .await;
            return;
        }

        settled.permissions.merge(params.permissions);
        self.tables.settled.insert(topic.clone(), settled.clone());
        if let Err(err) = self.tables.persist_settled().await {
            warn!(%topic, "failed to persist settled sessions: {err}");
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::SessionUpgrade(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session upgrade: {err}");
        }

        self.ctx
            .events
            .emit(ClientEvent::SessionUpdated { session: settled });
    }

    async fn on_delete(&self, topic: Topic, id: MessageId, params: SessionDeleteRequest) {
        let _guard = self.locks.lock(&topic).await;

        let existed = self.tables.settled.get(&topic).is_some();

        // Acknowledge before the subscription (and its key) is torn down.
        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::SessionDelete(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session delete: {err}");
        }

        if existed {
            if let Err(err) = self.remove_settled(&topic).await {
                warn!(%topic, "failed to remove deleted session: {err}");
            }
            self.ctx.events.emit(ClientEvent::SessionDeleted {
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
                "No matching session topic".to_owned(),
                methods::SESSION_PING,
            )
            .await;
            return;
        }

        if let Err(err) = self
            .ctx
            .relay
            .publish_response(&topic, id, ResponseParamsSuccess::SessionPing(true))
            .await
        {
            debug!(%topic, "failed to acknowledge session ping: {err}");
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
        let settled = SettledSession {
            topic: Topic::generate(),
            relay: client_rpc::rpc::RelayProtocol::default(),
            self_participant: Participant {
                public_key: "aa".repeat(32),
                metadata: None,
            },
            peer_participant: Participant {
                public_key: "bb".repeat(32),
                metadata: None,
            },
            permissions: SessionPermissions::default(),
            controller: false,
            sym_key: [9u8; 32],
            expiry: 1675757972,
            state: SessionState::default(),
        };

        let json = serde_json::to_value(&settled).unwrap();
        assert!(json.get("self").is_some());
        assert!(json.get("peer").is_some());

        let restored: SettledSession = serde_json::from_value(json).unwrap();
        assert_eq!(restored.topic, settled.topic);
        assert_eq!(restored.sym_key, settled.sym_key);
    }

    #[test]
    fn pending_status_serde_is_tagged() {
        let pending = PendingSession {
            topic: Topic::generate(),
            status: PendingStatus::Responded {
                settled_topic: Topic::generate(),
            },
            keypair: None,
            proposal: SessionProposal {
                topic: Topic::generate(),
                relay: client_rpc::rpc::RelayProtocol::default(),
                proposer: Proposer::default(),
                signal: Signal::Pairing {
                    topic: Topic::generate(),
                },
                permissions: SessionPermissions::default(),
                ttl: PROPOSAL_TTL,
            },
            expiry: 1675757972,
        };

        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json.get("status").unwrap(), &serde_json::json!("responded"));
        assert!(json.get("settledTopic").is_some());

        let restored: PendingSession = serde_json::from_value(json).unwrap();
        assert_eq!(restored.status, pending.status);
    }
}
