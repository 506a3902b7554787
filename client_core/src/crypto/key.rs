//! Per-proposal key agreement.
//!
//! Each proposal carries an ephemeral X25519 public key; settlement derives a
//! shared symmetric key through Diffie-Hellman + HKDF-SHA256, and the settled
//! topic is the SHA-256 digest of that key, so both sides arrive at the same
//! secret rendezvous without it ever crossing the relay.

use {
    client_rpc::domain::Topic,
    hkdf::Hkdf,
    rand::rngs::OsRng,
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::fmt::{Debug, Formatter},
    x25519_dalek::{PublicKey, StaticSecret},
};

pub const SYM_KEY_LENGTH: usize = 32;
pub const PUB_KEY_LENGTH: usize = 32;

pub type SymKey = [u8; SYM_KEY_LENGTH];

/// Key derivation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Failed to parse peer public key: {0}")]
    PeerPublicKey(String),

    #[error("Failed to generate symmetric key: {0}")]
    SymKeyGeneration(String),

    #[error("Key agreement produced identical public keys")]
    IdenticalKeys,
}

/// Proposal keypair. The secret half is kept so that a pending proposal
/// survives a restart; it is discarded once the sequence settles.
#[derive(Clone, Serialize, Deserialize)]
pub struct Keypair {
    secret: SymKey,
    public: SymKey,
}

impl Debug for Keypair {
    /// Custom debug to hide the secret key.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("secret", &"********")
            .field("public", &hex::encode(self.public))
            .finish()
    }
}

impl Keypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        Self {
            secret: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    /// Hex encoding of the public half, as it appears on the wire.
    pub fn public_key(&self) -> String {
        hex::encode(self.public)
    }

    /// Performs Diffie-Hellman symmetric key derivation against the peer's
    /// hex-encoded public key.
    pub fn derive(&self, peer_public_key: &str) -> Result<SharedKey, CryptoError> {
        let peer: [u8; PUB_KEY_LENGTH] = hex::decode(peer_public_key)
            .map_err(|e| CryptoError::PeerPublicKey(e.to_string()))?
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::PeerPublicKey("invalid length".to_owned()))?;

        if peer == self.public {
            return Err(CryptoError::IdenticalKeys);
        }

        let secret = StaticSecret::from(self.secret);
        let ikm = secret.diffie_hellman(&PublicKey::from(peer));

        let mut sym_key = [0u8; SYM_KEY_LENGTH];
        let hk = Hkdf::<Sha256>::new(None, ikm.as_bytes());
        hk.expand(&[], &mut sym_key)
            .map_err(|e| CryptoError::SymKeyGeneration(e.to_string()))?;

        Ok(SharedKey { sym_key })
    }
}

/// The agreed symmetric key of a settled sequence.
#[derive(Clone)]
pub struct SharedKey {
    sym_key: SymKey,
}

impl Debug for SharedKey {
    /// Custom debug to hide the symmetric key.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("sym_key", &"********")
            .finish()
    }
}

impl SharedKey {
    pub fn symmetric_key(&self) -> &SymKey {
        &self.sym_key
    }

    /// Derives the settled topic bound to this key.
    pub fn settled_topic(&self) -> Topic {
        let mut hasher = Sha256::new();
        hasher.update(self.sym_key);
        hex::encode(hasher.finalize()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_key_and_topic() {
        let a = Keypair::generate();
        let b = Keypair::generate();

        let ab = a.derive(&b.public_key()).unwrap();
        let ba = b.derive(&a.public_key()).unwrap();

        assert_eq!(ab.symmetric_key(), ba.symmetric_key());
        assert_eq!(ab.settled_topic(), ba.settled_topic());
        assert_eq!(ab.settled_topic().as_ref().len(), 64);
    }

    #[test]
    fn identical_public_keys_are_rejected() {
        let a = Keypair::generate();

        assert!(matches!(
            a.derive(&a.public_key()),
            Err(CryptoError::IdenticalKeys)
        ));
    }

    #[test]
    fn keypair_round_trips_through_storage() {
        let a = Keypair::generate();
        let b = Keypair::generate();

        let json = serde_json::to_string(&a).unwrap();
        let restored: Keypair = serde_json::from_str(&json).unwrap();

        assert_eq!(
            restored.derive(&b.public_key()).unwrap().symmetric_key(),
            a.derive(&b.public_key()).unwrap().symmetric_key(),
        );
    }
}
