//! `wc_pairingApprove` parameters. Published by the responder on the proposal
//! topic; the proposer's JSON RPC response acknowledges settlement.

use {
    super::{PairingState, Participant, PublishMetadata, RelayProtocol},
    crate::domain::Topic,
    serde::{Deserialize, Serialize},
};

pub(super) const REQUEST_METADATA: PublishMetadata = PublishMetadata {
    ttl: 300,
    prompt: false,
};

pub(super) const RESPONSE_METADATA: PublishMetadata = PublishMetadata {
    ttl: 300,
    prompt: false,
};

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PairingApproveRequest {
    /// Topic of the proposal being approved.
    pub topic: Topic,
    pub relay: RelayProtocol,
    pub responder: Participant,
    /// Settlement expiry, UTC seconds.
    pub expiry: u64,
    #[serde(default)]
    pub state: PairingState,
}
