pub(super) mod pairing_approve;
pub(super) mod pairing_delete;
pub(super) mod pairing_payload;
pub(super) mod pairing_ping;
pub(super) mod pairing_propose;
pub(super) mod pairing_reject;
pub(super) mod pairing_update;
pub(super) mod session_approve;
pub(super) mod session_delete;
pub(super) mod session_notification;
pub(super) mod session_payload;
pub(super) mod session_ping;
pub(super) mod session_propose;
pub(super) mod session_reject;
pub(super) mod session_update;
pub(super) mod session_upgrade;
pub(super) mod shared_types;

pub use {
    pairing_approve::*, pairing_delete::*, pairing_payload::*, pairing_ping::*,
    pairing_propose::*, pairing_reject::*, pairing_update::*, session_approve::*,
    session_delete::*, session_notification::*, session_payload::*, session_ping::*,
    session_propose::*, session_reject::*, session_update::*, session_upgrade::*,
    shared_types::*,
};

use {
    paste::paste,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::result::Result,
};

/// Wire method names.
pub mod methods {
    pub const PAIRING_PROPOSE: &str = "wc_pairingPropose";
    pub const PAIRING_APPROVE: &str = "wc_pairingApprove";
    pub const PAIRING_REJECT: &str = "wc_pairingReject";
    pub const PAIRING_UPDATE: &str = "wc_pairingUpdate";
    pub const PAIRING_DELETE: &str = "wc_pairingDelete";
    pub const PAIRING_PING: &str = "wc_pairingPing";
    pub const PAIRING_PAYLOAD: &str = "wc_pairingPayload";
    pub const SESSION_PROPOSE: &str = "wc_sessionPropose";
    pub const SESSION_APPROVE: &str = "wc_sessionApprove";
    pub const SESSION_REJECT: &str = "wc_sessionReject";
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    pub const SESSION_UPGRADE: &str = "wc_sessionUpgrade";
    pub const SESSION_DELETE: &str = "wc_sessionDelete";
    pub const SESSION_PING: &str = "wc_sessionPing";
    pub const SESSION_PAYLOAD: &str = "wc_sessionPayload";
    pub const SESSION_NOTIFICATION: &str = "wc_sessionNotification";
}

/// Errors covering payload parameter conversion issues.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    /// Serialization/deserialization issues.
    #[error("Failure serializing/deserializing request parameters: {0}")]
    Serde(#[from] serde_json::Error),
    /// Response correlated to a method outside of the protocol.
    #[error("Method \"{0}\" does not match any of the protocol methods")]
    ResponseMethod(String),
}

/// Per-method publish parameters handed to the relay alongside the encrypted
/// envelope: how long the relay should retain the message for an offline
/// peer, and whether delivery warrants prompting the user.
#[derive(Debug, Clone, Copy)]
pub struct PublishMetadata {
    pub ttl: u64,
    pub prompt: bool,
}

/// Retrieval of [`PublishMetadata`] for a parameter set.
///
/// Every method must return corresponding publish metadata.
pub trait PublishMetadataProvider {
    fn publish_metadata(&self) -> PublishMetadata;
}

// Convenience macro to de-duplicate implementation for different parameter sets.
macro_rules! impl_publish_metadata {
    ($param_type:ty,$meta:ident) => {
        paste! {
            impl PublishMetadataProvider for $param_type {
                fn publish_metadata(&self) -> PublishMetadata {
                    match self {
                        [<$param_type>]::PairingPropose(_) => pairing_propose::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingApprove(_) => pairing_approve::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingReject(_) => pairing_reject::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingUpdate(_) => pairing_update::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingDelete(_) => pairing_delete::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingPing(_) => pairing_ping::[<$meta:upper _METADATA>],
                        [<$param_type>]::PairingPayload(_) => pairing_payload::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionPropose(_) => session_propose::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionApprove(_) => session_approve::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionReject(_) => session_reject::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionUpdate(_) => session_update::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionUpgrade(_) => session_upgrade::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionDelete(_) => session_delete::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionPing(_) => session_ping::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionPayload(_) => session_payload::[<$meta:upper _METADATA>],
                        [<$param_type>]::SessionNotification(_) => session_notification::[<$meta:upper _METADATA>],
                    }
                }
            }
        }
    }
}

// Maps enum variants to wire method names.
macro_rules! impl_method_name {
    ($param_type:ty) => {
        impl $param_type {
            /// The wire method name of this parameter set.
            pub fn method(&self) -> &'static str {
                match self {
                    Self::PairingPropose(_) => methods::PAIRING_PROPOSE,
                    Self::PairingApprove(_) => methods::PAIRING_APPROVE,
                    Self::PairingReject(_) => methods::PAIRING_REJECT,
                    Self::PairingUpdate(_) => methods::PAIRING_UPDATE,
                    Self::PairingDelete(_) => methods::PAIRING_DELETE,
                    Self::PairingPing(_) => methods::PAIRING_PING,
                    Self::PairingPayload(_) => methods::PAIRING_PAYLOAD,
                    Self::SessionPropose(_) => methods::SESSION_PROPOSE,
                    Self::SessionApprove(_) => methods::SESSION_APPROVE,
                    Self::SessionReject(_) => methods::SESSION_REJECT,
                    Self::SessionUpdate(_) => methods::SESSION_UPDATE,
                    Self::SessionUpgrade(_) => methods::SESSION_UPGRADE,
                    Self::SessionDelete(_) => methods::SESSION_DELETE,
                    Self::SessionPing(_) => methods::SESSION_PING,
                    Self::SessionPayload(_) => methods::SESSION_PAYLOAD,
                    Self::SessionNotification(_) => methods::SESSION_NOTIFICATION,
                }
            }
        }
    };
}

/// Publish metadata of the response to the given wire method. Used when a
/// response (typically an error) must be published for a request that never
/// deserialized into typed parameters.
pub fn response_metadata(method: &str) -> Option<PublishMetadata> {
    match method {
        methods::PAIRING_PROPOSE => Some(pairing_propose::RESPONSE_METADATA),
        methods::PAIRING_APPROVE => Some(pairing_approve::RESPONSE_METADATA),
        methods::PAIRING_REJECT => Some(pairing_reject::RESPONSE_METADATA),
        methods::PAIRING_UPDATE => Some(pairing_update::RESPONSE_METADATA),
        methods::PAIRING_DELETE => Some(pairing_delete::RESPONSE_METADATA),
        methods::PAIRING_PING => Some(pairing_ping::RESPONSE_METADATA),
        methods::PAIRING_PAYLOAD => Some(pairing_payload::RESPONSE_METADATA),
        methods::SESSION_PROPOSE => Some(session_propose::RESPONSE_METADATA),
        methods::SESSION_APPROVE => Some(session_approve::RESPONSE_METADATA),
        methods::SESSION_REJECT => Some(session_reject::RESPONSE_METADATA),
        methods::SESSION_UPDATE => Some(session_update::RESPONSE_METADATA),
        methods::SESSION_UPGRADE => Some(session_upgrade::RESPONSE_METADATA),
        methods::SESSION_DELETE => Some(session_delete::RESPONSE_METADATA),
        methods::SESSION_PING => Some(session_ping::RESPONSE_METADATA),
        methods::SESSION_PAYLOAD => Some(session_payload::RESPONSE_METADATA),
        methods::SESSION_NOTIFICATION => Some(session_notification::RESPONSE_METADATA),
        _ => None,
    }
}

/// Request parameters for the `wc_pairing*` and `wc_session*` families.
#[derive(Debug, Serialize, Eq, Deserialize, Clone, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum RequestParams {
    #[serde(rename = "wc_pairingPropose")]
    PairingPropose(PairingProposal),
    #[serde(rename = "wc_pairingApprove")]
    PairingApprove(PairingApproveRequest),
    #[serde(rename = "wc_pairingReject")]
    PairingReject(PairingRejectRequest),
    #[serde(rename = "wc_pairingUpdate")]
    PairingUpdate(PairingUpdateRequest),
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete(PairingDeleteRequest),
    #[serde(rename = "wc_pairingPing")]
    PairingPing(PairingPingRequest),
    #[serde(rename = "wc_pairingPayload")]
    PairingPayload(PairingPayloadRequest),
    #[serde(rename = "wc_sessionPropose")]
    SessionPropose(SessionProposal),
    #[serde(rename = "wc_sessionApprove")]
    SessionApprove(SessionApproveRequest),
    #[serde(rename = "wc_sessionReject")]
    SessionReject(SessionRejectRequest),
    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate(SessionUpdateRequest),
    #[serde(rename = "wc_sessionUpgrade")]
    SessionUpgrade(SessionUpgradeRequest),
    #[serde(rename = "wc_sessionDelete")]
    SessionDelete(SessionDeleteRequest),
    #[serde(rename = "wc_sessionPing")]
    SessionPing(SessionPingRequest),
    #[serde(rename = "wc_sessionPayload")]
    SessionPayload(SessionPayloadRequest),
    #[serde(rename = "wc_sessionNotification")]
    SessionNotification(SessionNotificationRequest),
}
impl_publish_metadata!(RequestParams, request);
impl_method_name!(RequestParams);

/// https://www.jsonrpc.org/specification#response_object
///
/// JSON RPC 2.0 response object can either carry success or error data. The
/// response itself does not name the method it answers; the caller correlates
/// by the outstanding request's ID and deserializes accordingly, see
/// [`ResponseParamsSuccess::try_from_method`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseParams {
    /// A response with a result.
    #[serde(rename = "result")]
    Success(Value),

    /// A response for a failed request.
    #[serde(rename = "error")]
    Err(Value),
}

/// Typed success response parameters.
///
/// Acknowledgement methods answer with a bare boolean; the payload
/// passthrough answers with the opaque application result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseParamsSuccess {
    PairingPropose(bool),
    PairingApprove(bool),
    PairingReject(bool),
    PairingUpdate(bool),
    PairingDelete(bool),
    PairingPing(bool),
    PairingPayload(bool),
    SessionPropose(bool),
    SessionApprove(bool),
    SessionReject(bool),
    SessionUpdate(bool),
    SessionUpgrade(bool),
    SessionDelete(bool),
    SessionPing(bool),
    SessionPayload(Value),
    SessionNotification(bool),
}
impl_publish_metadata!(ResponseParamsSuccess, response);

impl ResponseParamsSuccess {
    /// Converts an opaque success payload into typed parameters.
    ///
    /// A success payload does not specify the method it answers, so the only
    /// way to deserialize the data into typed parameters is to use the method
    /// of the outstanding request it correlates with.
    pub fn try_from_method(method: &str, value: Value) -> Result<Self, ParamsError> {
        match method {
            methods::PAIRING_PROPOSE => Ok(Self::PairingPropose(serde_json::from_value(value)?)),
            methods::PAIRING_APPROVE => Ok(Self::PairingApprove(serde_json::from_value(value)?)),
            methods::PAIRING_REJECT => Ok(Self::PairingReject(serde_json::from_value(value)?)),
            methods::PAIRING_UPDATE => Ok(Self::PairingUpdate(serde_json::from_value(value)?)),
            methods::PAIRING_DELETE => Ok(Self::PairingDelete(serde_json::from_value(value)?)),
            methods::PAIRING_PING => Ok(Self::PairingPing(serde_json::from_value(value)?)),
            methods::PAIRING_PAYLOAD => Ok(Self::PairingPayload(serde_json::from_value(value)?)),
            methods::SESSION_PROPOSE => Ok(Self::SessionPropose(serde_json::from_value(value)?)),
            methods::SESSION_APPROVE => Ok(Self::SessionApprove(serde_json::from_value(value)?)),
            methods::SESSION_REJECT => Ok(Self::SessionReject(serde_json::from_value(value)?)),
            methods::SESSION_UPDATE => Ok(Self::SessionUpdate(serde_json::from_value(value)?)),
            methods::SESSION_UPGRADE => Ok(Self::SessionUpgrade(serde_json::from_value(value)?)),
            methods::SESSION_DELETE => Ok(Self::SessionDelete(serde_json::from_value(value)?)),
            methods::SESSION_PING => Ok(Self::SessionPing(serde_json::from_value(value)?)),
            methods::SESSION_PAYLOAD => Ok(Self::SessionPayload(value)),
            methods::SESSION_NOTIFICATION => {
                Ok(Self::SessionNotification(serde_json::from_value(value)?))
            }
            other => Err(ParamsError::ResponseMethod(other.to_owned())),
        }
    }
}

impl TryFrom<ResponseParamsSuccess> for ResponseParams {
    type Error = ParamsError;

    fn try_from(value: ResponseParamsSuccess) -> Result<Self, Self::Error> {
        Ok(Self::Success(serde_json::to_value(value)?))
    }
}

/// Response error data.
///
/// The documentation states that both fields are required. However, on
/// sequence expiry error, "empty" error is received.
#[derive(Debug, Clone, Eq, Serialize, Deserialize, PartialEq)]
pub struct ErrorParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorParams {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
        }
    }
}

impl TryFrom<ErrorParams> for ResponseParams {
    type Error = ParamsError;

    fn try_from(value: ErrorParams) -> Result<Self, Self::Error> {
        Ok(Self::Err(serde_json::to_value(value)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use anyhow::Result;
    use serde::de::DeserializeOwned;
    use serde_json;

    /// Trims json of the whitespaces and newlines.
    ///
    /// Allows to use "pretty json" in unittest, and still get consistent
    /// results post serialization/deserialization.
    pub fn param_json_trim(json: &str) -> String {
        json.chars()
            .filter(|c| !c.is_whitespace() && *c != '\n')
            .collect::<String>()
    }

    /// Tests input json serialization/deserialization into the specified type.
    pub fn param_serde_test<T>(json: &str) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let expected = param_json_trim(json);
        let deserialized: T = serde_json::from_str(&expected)?;
        let actual = serde_json::to_string(&deserialized)?;

        assert_eq!(expected, actual);

        Ok(())
    }

    #[test]
    fn request_params_method_tagging() -> Result<()> {
        let params = RequestParams::SessionPing(SessionPingRequest {});
        let json = serde_json::to_string(&params)?;

        assert_eq!(json, r#"{"method":"wc_sessionPing","params":{}}"#);
        assert_eq!(params.method(), methods::SESSION_PING);

        Ok(())
    }

    #[test]
    fn success_response_typing_by_method() -> Result<()> {
        let typed = ResponseParamsSuccess::try_from_method(
            methods::PAIRING_APPROVE,
            serde_json::json!(true),
        )?;
        assert_eq!(typed, ResponseParamsSuccess::PairingApprove(true));

        let payload = ResponseParamsSuccess::try_from_method(
            methods::SESSION_PAYLOAD,
            serde_json::json!("0xdeadbeef"),
        )?;
        assert_eq!(
            payload,
            ResponseParamsSuccess::SessionPayload(serde_json::json!("0xdeadbeef"))
        );

        assert!(matches!(
            ResponseParamsSuccess::try_from_method("wc_unknown", serde_json::json!(true)),
            Err(ParamsError::ResponseMethod(_))
        ));

        Ok(())
    }
}
