//! `wc_sessionPropose` parameters. Travels wrapped in a `wc_pairingPayload`
//! envelope on the parent pairing's settled topic.

use {
    super::{Proposer, PublishMetadata, RelayProtocol, SessionPermissions, Signal},
    crate::domain::Topic,
    serde::{Deserialize, Serialize},
};

pub(super) const REQUEST_METADATA: PublishMetadata = PublishMetadata {
    ttl: 300,
    prompt: true,
};

pub(super) const RESPONSE_METADATA: PublishMetadata = PublishMetadata {
    ttl: 300,
    prompt: false,
};

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    /// Proposal topic: identifies the proposal in pending tables and in the
    /// responder's approve/reject. Distinct from the settled topic derived at
    /// key agreement.
    pub topic: Topic,
    pub relay: RelayProtocol,
    pub proposer: Proposer,
    pub signal: Signal,
    pub permissions: SessionPermissions,
    pub ttl: u64,
}
