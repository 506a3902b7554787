//! `wc_sessionPayload` parameters: the passthrough envelope for application
//! JSON RPC on a settled session topic. The envelope's message ID equals the
//! inner request's ID, so the peer's response correlates without translation.

use {
    super::{PayloadRequest, PublishMetadata},
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
pub struct SessionPayloadRequest {
    pub request: PayloadRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub chain_id: Option<String>,
}
