//! `wc_pairingUpdate` parameters. Controller-only; used after settlement to
//! share the controller's app metadata with the peer.

use {
    super::{PairingState, PublishMetadata},
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
pub struct PairingUpdateRequest {
    pub state: PairingState,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_pairing_update_request() -> Result<()> {
        let json = r#"
        {
            "state": {
                "metadata": {
                    "description": "Example wallet",
                    "url": "https://example.com",
                    "icons": [
                        "https://example.com/icon.png"
                    ],
                    "name": "Example"
                }
            }
        }
        "#;

        param_serde_test::<PairingUpdateRequest>(json)
    }
}
