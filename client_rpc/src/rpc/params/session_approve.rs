//! `wc_sessionApprove` parameters. Published raw on the parent pairing topic;
//! not subject to the pairing's payload permission set, being
//! sequence-control traffic answering the proposer's own request.

use {
    super::{Participant, PublishMetadata, RelayProtocol, SessionState},
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
pub struct SessionApproveRequest {
    /// Topic of the proposal being approved.
    pub topic: Topic,
    pub relay: RelayProtocol,
    pub responder: Participant,
    /// Settlement expiry, UTC seconds.
    pub expiry: u64,
    pub state: SessionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::super::tests::param_serde_test;
    use anyhow::Result;

    #[test]
    fn test_serde_session_approve_request() -> Result<()> {
        let json = r#"
        {
            "topic": "f1f7611d9a9a7e2e2e8b3cd6b0d2d6e0a9a052e3eab2dcdca368a87bd5b1a7c4",
            "relay": {
                "protocol": "waku"
            },
            "responder": {
                "publicKey": "ff3b42de925b01b5cdbdd263e4bbcb6e1cc1b02de277d1eac0a54b3092f40a2b",
                "metadata": {
                    "description": "Example wallet",
                    "url": "https://example.com",
                    "icons": [
                        "https://example.com/icon.png"
                    ],
                    "name": "Example"
                }
            },
            "expiry": 1675757972,
            "state": {
                "accounts": [
                    "eip155:1:0xBA5BA3955463ADcc7aa3E33bbdfb8A68e0933dD8"
                ]
            }
        }
        "#;

        param_serde_test::<SessionApproveRequest>(json)
    }
}
