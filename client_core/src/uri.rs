//! Pairing URI codec.
//!
//! `wc:{topic}@{version}?controller={bool}&publicKey={hex}&relay={urlencoded json}`
//!
//! The URI is the out-of-band signal of a pairing proposal: it carries the
//! public rendezvous topic, the proposer's public key and controller claim,
//! and the relay descriptor. No secrets.

use {
    client_rpc::{
        domain::Topic,
        rpc::{Proposer, RelayProtocol},
    },
    regex::Regex,
    std::{
        fmt::{Debug, Display, Formatter},
        str::FromStr,
    },
    url::Url,
};

pub const URI_PROTOCOL: &str = "wc";
pub const URI_VERSION: &str = "2";

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum UriError {
    #[error("Expecting protocol \"wc\" but \"{protocol}\" is found.")]
    UnexpectedProtocol { protocol: String },
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error("Failed to parse topic and version")]
    InvalidTopicAndVersion,
    #[error("Topic not found")]
    TopicNotFound,
    #[error("Version not found")]
    VersionNotFound,
    #[error("Controller flag not found")]
    ControllerNotFound,
    #[error("Failed to parse controller flag: {0:?}")]
    InvalidController(String),
    #[error("Public key not found")]
    PublicKeyNotFound,
    #[error("Relay descriptor not found")]
    RelayNotFound,
    #[error("Failed to parse relay descriptor: {0:?}")]
    InvalidRelay(String),
    #[error("Unexpected parameter, key: {0:?}, value: {1:?}")]
    UnexpectedParameter(String, String),
}

/// Parsed pairing URI.
#[derive(Clone, Eq, PartialEq)]
pub struct PairingUri {
    pub topic: Topic,
    pub version: String,
    pub public_key: String,
    pub controller: bool,
    pub relay: RelayProtocol,
}

impl PairingUri {
    pub fn new(topic: Topic, proposer: &Proposer, relay: RelayProtocol) -> Self {
        Self {
            topic,
            version: URI_VERSION.to_owned(),
            public_key: proposer.public_key.clone(),
            controller: proposer.controller,
            relay,
        }
    }

    fn parse_topic_and_version(path: &str) -> Result<(String, String), UriError> {
        let caps = Regex::new(r"^(?P<topic>[[:word:]-]+)@(?P<version>\d+)$")
            .expect("invalid regex")
            .captures(path)
            .ok_or(UriError::InvalidTopicAndVersion)?;
        let topic = caps
            .name("topic")
            .ok_or(UriError::TopicNotFound)?
            .as_str()
            .to_owned();
        let version = caps
            .name("version")
            .ok_or(UriError::VersionNotFound)?
            .as_str()
            .to_owned();
        Ok((topic, version))
    }

    fn parse_params(url: &Url) -> Result<(bool, String, RelayProtocol), UriError> {
        let queries = url.query_pairs();

        let mut controller: Option<String> = None;
        let mut public_key: Option<String> = None;
        let mut relay: Option<String> = None;
        for (k, v) in queries {
            match k.as_ref() {
                "controller" => controller = Some((*v).to_owned()),
                "publicKey" => public_key = Some((*v).to_owned()),
                "relay" => relay = Some((*v).to_owned()),
                _ => {
                    return Result::Err(UriError::UnexpectedParameter(
                        (*k).to_owned(),
                        (*v).to_owned(),
                    ))
                }
            }
        }

        let controller = controller.ok_or(UriError::ControllerNotFound)?;
        let controller = controller
            .parse::<bool>()
            .map_err(|_| UriError::InvalidController(controller))?;

        let relay = relay.ok_or(UriError::RelayNotFound)?;
        let relay = serde_json::from_str::<RelayProtocol>(&relay)
            .map_err(|e| UriError::InvalidRelay(e.to_string()))?;

        Ok((
            controller,
            public_key.ok_or(UriError::PublicKeyNotFound)?,
            relay,
        ))
    }
}

impl Debug for PairingUri {
    /// Debug with the proposer key masked.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingUri")
            .field("topic", &self.topic)
            .field("version", &self.version)
            .field("controller", &self.controller)
            .field("publicKey", &"***")
            .field("relay", &self.relay.protocol)
            .finish()
    }
}

impl FromStr for PairingUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::from_str(s)?;

        if url.scheme() != URI_PROTOCOL {
            return Result::Err(UriError::UnexpectedProtocol {
                protocol: url.scheme().to_owned(),
            });
        }

        let (topic, version) = Self::parse_topic_and_version(url.path())?;
        let (controller, public_key, relay) = Self::parse_params(&url)?;

        Ok(Self {
            topic: topic.into(),
            version,
            public_key,
            controller,
            relay,
        })
    }
}

impl Display for PairingUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let relay = serde_json::to_string(&self.relay).map_err(|_| std::fmt::Error)?;
        let relay: String = url::form_urlencoded::byte_serialize(relay.as_bytes()).collect();
        let public_key: String =
            url::form_urlencoded::byte_serialize(self.public_key.as_bytes()).collect();

        write!(
            f,
            "{}:{}@{}?controller={}&publicKey={}&relay={}",
            URI_PROTOCOL, self.topic, self.version, self.controller, public_key, relay,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "wc:c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168@2?controller=true&publicKey=a3ad5e26070ddb2809200c6f56e739333512015bceeadbb8ea1731c4c7ddb207&relay=%7B%22protocol%22%3A%22waku%22%7D";

    #[test]
    fn parse_uri() {
        let actual = PairingUri {
            topic: "c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168".into(),
            version: "2".to_owned(),
            public_key: "a3ad5e26070ddb2809200c6f56e739333512015bceeadbb8ea1731c4c7ddb207"
                .to_owned(),
            controller: true,
            relay: RelayProtocol {
                protocol: "waku".to_owned(),
                params: None,
            },
        };
        let expected = PairingUri::from_str(URI).unwrap();

        assert_eq!(actual, expected);
    }

    #[test]
    fn format_parsed_uri_round_trips() {
        let parsed = PairingUri::from_str(URI).unwrap();

        assert_eq!(parsed.to_string(), URI);
    }

    #[test]
    fn unexpected_protocol_is_rejected() {
        assert!(matches!(
            PairingUri::from_str("http://example.com"),
            Err(UriError::UnexpectedProtocol { .. })
        ));
    }

    #[test]
    fn unexpected_parameter_is_rejected() {
        let uri = format!("{URI}&symKey=00");

        assert!(matches!(
            PairingUri::from_str(&uri),
            Err(UriError::UnexpectedParameter(..))
        ));
    }

    #[test]
    fn missing_relay_is_rejected() {
        let uri = "wc:c9e6d30fb34afe70a15c14e9337ba8e4d5a35dd695c39b94884b0ee60c69d168@2?controller=false&publicKey=a3ad5e26070ddb2809200c6f56e739333512015bceeadbb8ea1731c4c7ddb207";

        assert!(matches!(
            PairingUri::from_str(uri),
            Err(UriError::RelayNotFound)
        ));
    }
}
