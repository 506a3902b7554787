//! Data structures shared between the pairing and session method families.

use {
    crate::domain::Topic,
    serde::{Deserialize, Serialize},
    std::collections::BTreeSet,
};

/// Errors covering permission validation problems.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum PermissionsError {
    #[error("RPC method set must not be empty")]
    EmptyMethods,
    #[error("Blockchain set must not be empty")]
    EmptyChains,
    #[error("RPC method is not permitted: {0}")]
    UnauthorizedMethod(String),
    #[error("Notification type is not permitted: {0}")]
    UnauthorizedNotificationType(String),
}

/// Description of the application behind a client, rendered by the peer.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
    pub name: String,
}

/// Relay protocol descriptor carried in proposals, settlements and URIs.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
pub struct RelayProtocol {
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

impl Default for RelayProtocol {
    fn default() -> Self {
        Self {
            protocol: "waku".to_owned(),
            params: None,
        }
    }
}

/// One side of a settled sequence.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub metadata: Option<AppMetadata>,
}

/// The proposing side of a pairing or session.
///
/// `controller` marks whether the proposer claims the controller role, i.e.
/// the authority to update the sequence after settlement.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    pub public_key: String,
    pub controller: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub metadata: Option<AppMetadata>,
}

/// Where a proposal is published: out-of-band URI for pairings, the parent
/// pairing topic for sessions.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(tag = "method", content = "params")]
pub enum Signal {
    #[serde(rename = "uri")]
    Uri { uri: String },
    #[serde(rename = "pairing")]
    Pairing { topic: Topic },
}

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct JsonRpcPermissions {
    pub methods: BTreeSet<String>,
}

impl JsonRpcPermissions {
    pub fn allows(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct BlockchainPermissions {
    pub chains: BTreeSet<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct NotificationPermissions {
    pub types: BTreeSet<String>,
}

impl NotificationPermissions {
    pub fn allows(&self, notification_type: &str) -> bool {
        self.types.contains(notification_type)
    }
}

/// Capability set of a pairing: which JSON RPC methods may traverse it.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct PairingPermissions {
    pub jsonrpc: JsonRpcPermissions,
}

/// Capability set of a session.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct SessionPermissions {
    pub blockchain: BlockchainPermissions,
    pub jsonrpc: JsonRpcPermissions,
    pub notifications: NotificationPermissions,
}

impl SessionPermissions {
    /// Validates the permission set of a session proposal.
    pub fn validate(&self) -> Result<(), PermissionsError> {
        if self.jsonrpc.methods.is_empty() {
            return Err(PermissionsError::EmptyMethods);
        }

        if self.blockchain.chains.is_empty() {
            return Err(PermissionsError::EmptyChains);
        }

        Ok(())
    }

    /// Merges an upgrade into the permission set. Widening only.
    pub fn merge(&mut self, upgrade: SessionPermissions) {
        self.blockchain.chains.extend(upgrade.blockchain.chains);
        self.jsonrpc.methods.extend(upgrade.jsonrpc.methods);
        self.notifications.types.extend(upgrade.notifications.types);
    }
}

/// Mutable payload of a settled pairing.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct PairingState {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub metadata: Option<AppMetadata>,
}

/// Mutable payload of a settled session.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
pub struct SessionState {
    pub accounts: BTreeSet<String>,
}

/// Reason attached to rejections and deletions.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
