use {
    crate::{
        crypto::key::CryptoError, relay::TransportError, storage::StorageError, uri::UriError,
    },
    client_rpc::domain::Topic,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Possible client errors.
///
/// Recoverable local faults (decryption failure on an inbound envelope,
/// duplicate message IDs, unknown methods) are absorbed by the dispatcher and
/// never reach this type; everything a caller initiates resolves to a result.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Relay transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No response from the peer within the deadline")]
    RpcTimeout,

    #[error("No matching topic: {0}")]
    NoMatchingTopic(Topic),

    #[error("Proposal was already responded to: {0}")]
    ProposalAlreadyResponded(Topic),

    #[error("RPC method is not permitted: {0}")]
    UnauthorizedRpcMethod(String),

    #[error("Only the controller may update the sequence")]
    UnauthorizedUpdate,

    #[error("Notification type is not permitted: {0}")]
    UnauthorizedNotificationType(String),

    #[error("Invalid pairing URI: {0}")]
    InvalidUri(#[from] UriError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Sequence expired")]
    Expired,

    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid session permissions: {0}")]
    Permissions(#[from] client_rpc::rpc::PermissionsError),

    #[error("Malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("Peer responded with an error ({code}): {message}")]
    Rpc { code: i64, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Params(#[from] client_rpc::rpc::ParamsError),

    #[error("Envelope failure: {0}")]
    Envelope(#[from] crate::crypto::envelope::EnvelopeError),

    #[error("Internal error: Duplicate request ID")]
    DuplicateRequestId,

    #[error("Internal error: Channel closed")]
    ChannelClosed,
}

impl From<client_rpc::rpc::ErrorParams> for ClientError {
    fn from(value: client_rpc::rpc::ErrorParams) -> Self {
        Self::Rpc {
            code: value.code.unwrap_or_default(),
            message: value.message.unwrap_or_default(),
        }
    }
}
