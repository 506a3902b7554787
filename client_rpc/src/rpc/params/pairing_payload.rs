//! `wc_pairingPayload` parameters: a passthrough envelope for JSON RPC
//! requests traversing a settled pairing. The inner method must belong to the
//! pairing's permission set, which by default admits only session proposals.

use {
    super::PublishMetadata,
    crate::domain::MessageId,
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

/// Inner JSON RPC request carried by a payload envelope.
///
/// Parsing of `params` is deferred to the handler of the inner method.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRequest {
    pub id: MessageId,
    pub method: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PairingPayloadRequest {
    pub request: PayloadRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_pairing_payload_request() -> Result<()> {
        let json = r#"
        {
            "request": {
                "id": 1675757972688031,
                "method": "wc_sessionPropose",
                "params": {
                    "topic": "f1f7611d9a9a7e2e2e8b3cd6b0d2d6e0a9a052e3eab2dcdca368a87bd5b1a7c4"
                }
            }
        }
        "#;

        param_serde_test::<PairingPayloadRequest>(json)
    }
}
