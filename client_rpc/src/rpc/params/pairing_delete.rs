//! `wc_pairingDelete` parameters.

use {
    super::{PublishMetadata, Reason},
    serde::{Deserialize, Serialize},
};

pub(super) const REQUEST_METADATA: PublishMetadata = PublishMetadata {
    ttl: 86400,
    prompt: false,
};

pub(super) const RESPONSE_METADATA: PublishMetadata = PublishMetadata {
    ttl: 86400,
    prompt: false,
};

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PairingDeleteRequest {
    pub reason: Reason,
}
