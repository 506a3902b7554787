//! `wc_sessionDelete` parameters.

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
pub struct SessionDeleteRequest {
    pub reason: Reason,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_session_delete_request() -> Result<()> {
        let json = r#"
        {
            "reason": {
                "code": 6000,
                "message": "User disconnected"
            }
        }
        "#;

        param_serde_test::<SessionDeleteRequest>(json)
    }
}
