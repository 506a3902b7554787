//! `wc_sessionNotification` parameters. The type must belong to the session's
//! notification permission set on both ends.

use {
    super::PublishMetadata,
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
pub struct SessionNotificationRequest {
    #[serde(rename = "type")]
    pub notification_type: String,
    /// Opaque notification data.
    ///
    /// Parsing is deferred to a higher level, application aware code.
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_accounts_changed_notification() -> Result<()> {
        let json = r#"
        {
            "type": "accountsChanged",
            "data": ["0xab16a96D359eC26a11e2C2b3d8f8B8942d5Bfcdb"]
        }
        "#;

        param_serde_test::<SessionNotificationRequest>(json)
    }
}
