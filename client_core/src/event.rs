//! Typed lifecycle events.
//!
//! A fixed set of enum-tagged events with statically typed payloads, fanned
//! out over a broadcast channel. The string names are stable and mirror the
//! wire-level event taxonomy (`pairing.*` / `session.*`).

use {
    crate::sequence::{pairing::SettledPairing, session::SettledSession},
    client_rpc::{
        domain::Topic,
        rpc::{
            PairingProposal, PayloadRequest, Reason, SessionNotificationRequest, SessionProposal,
        },
    },
    tokio::sync::broadcast,
};

/// Capacity of the public event channel. Slow subscribers start lagging (and
/// lose the oldest events) beyond this depth.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    PairingProposed {
        proposal: PairingProposal,
        uri: String,
    },
    PairingSettled {
        pairing: SettledPairing,
    },
    PairingUpdated {
        pairing: SettledPairing,
    },
    PairingDeleted {
        topic: Topic,
        reason: Reason,
    },
    /// A permitted JSON RPC request traversing a settled pairing. Session
    /// proposals arrive through here and are re-emitted as
    /// [`ClientEvent::SessionProposed`].
    PairingPayload {
        topic: Topic,
        request: PayloadRequest,
    },
    SessionProposed {
        proposal: SessionProposal,
    },
    SessionSettled {
        session: SettledSession,
    },
    SessionUpdated {
        session: SettledSession,
    },
    SessionDeleted {
        topic: Topic,
        reason: Reason,
    },
    SessionPayload {
        topic: Topic,
        request: PayloadRequest,
        chain_id: Option<String>,
    },
    SessionNotification {
        topic: Topic,
        notification: SessionNotificationRequest,
    },
}

impl ClientEvent {
    /// Stable string name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingProposed { .. } => "pairing.proposal",
            Self::PairingSettled { .. } => "pairing.created",
            Self::PairingUpdated { .. } => "pairing.updated",
            Self::PairingDeleted { .. } => "pairing.deleted",
            Self::PairingPayload { .. } => "pairing.payload",
            Self::SessionProposed { .. } => "session.proposal",
            Self::SessionSettled { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::SessionDeleted { .. } => "session.deleted",
            Self::SessionPayload { .. } => "session.payload",
            Self::SessionNotification { .. } => "session.notification",
        }
    }
}

/// Shared event sink handed to the sequence controllers.
#[derive(Clone)]
pub struct EventSink {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventSink {
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. A send without active subscribers is not an error.
    pub fn emit(&self, event: ClientEvent) {
        tracing::debug!(event = event.name(), "emitting");
        self.sender.send(event).ok();
    }
}
