//! `wc_pairingReject` parameters.

use {
    super::{PublishMetadata, Reason},
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
pub struct PairingRejectRequest {
    /// Topic of the proposal being rejected.
    pub topic: Topic,
    pub reason: Reason,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_pairing_reject_request() -> Result<()> {
        let json = r#"
        {
            "topic": "c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168",
            "reason": {
                "code": 5000,
                "message": "User rejected"
            }
        }
        "#;

        param_serde_test::<PairingRejectRequest>(json)
    }
}
