//! `wc_sessionReject` parameters.

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
pub struct SessionRejectRequest {
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
    fn test_serde_session_reject_request() -> Result<()> {
        let json = r#"
        {
            "topic": "f1f7611d9a9a7e2e2e8b3cd6b0d2d6e0a9a052e3eab2dcdca368a87bd5b1a7c4",
            "reason": {
                "code": 5000,
                "message": "User rejected"
            }
        }
        "#;

        param_serde_test::<SessionRejectRequest>(json)
    }
}
