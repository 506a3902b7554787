//! Pairing proposal parameters. The proposal itself travels out-of-band as a
//! URI rather than over the relay, but the same payload shape is kept on the
//! wire enum so that stored proposals and signals deserialize uniformly.

use {
    super::{PairingPermissions, Proposer, PublishMetadata, RelayProtocol, Signal},
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
pub struct PairingProposal {
    /// Proposal topic: the rendezvous the responder answers on. Carried in
    /// the URI.
    pub topic: Topic,
    pub relay: RelayProtocol,
    pub proposer: Proposer,
    pub signal: Signal,
    pub permissions: PairingPermissions,
    pub ttl: u64,
}
