//! Payload envelope: authenticated symmetric encryption of serialized JSON
//! RPC, base64-framed for the relay.
//!
//! Envelope layout: `type (1 byte) || iv (12 bytes) || sealed`. Only the
//! type 0 envelope exists in this protocol; pre-settlement traffic on public
//! proposal topics travels as plain JSON instead.

use {
    crate::crypto::key::SymKey,
    base64::{prelude::BASE64_STANDARD, DecodeError, Engine},
    chacha20poly1305::{
        aead::{Aead, KeyInit, OsRng, Payload},
        AeadCore, ChaCha20Poly1305, Key, Nonce,
    },
    std::string::FromUtf8Error,
};

const TYPE_0: u8 = 0;
const TYPE_LENGTH: usize = 1;
const INIT_VEC_LEN: usize = 12;

pub type InitVec = [u8; INIT_VEC_LEN];

/// Envelope encoding, decoding, encryption and decryption errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope is not base64 encoded")]
    Base64Decode(#[from] DecodeError),
    #[error("Envelope decryption failure: {0}")]
    Decryption(String),
    #[error("Envelope encryption failure: {0}")]
    Encryption(String),
    #[error("Invalid initialization vector length={0}")]
    InitVecLen(usize),
    #[error("Envelope does not fit the initialization vector")]
    Truncated,
    #[error("Envelope is not a valid UTF-8 encoding")]
    PayloadUtf8(#[from] FromUtf8Error),
    #[error("Unsupported envelope type={0}")]
    UnsupportedEnvelopeType(u8),
}

/// Encrypts and encodes a plain-text payload for publishing.
pub fn seal<T>(msg: T, key: &SymKey) -> Result<String, EnvelopeError>
where
    T: AsRef<[u8]>,
{
    let payload = Payload {
        msg: msg.as_ref(),
        aad: &[],
    };
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let sealed = cipher
        .encrypt(&nonce, payload)
        .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;

    Ok(BASE64_STANDARD.encode([&[TYPE_0], nonce.as_slice(), sealed.as_slice()].concat()))
}

/// Decodes and decrypts an inbound envelope into the serialized payload.
pub fn open<T>(msg: T, key: &SymKey) -> Result<String, EnvelopeError>
where
    T: AsRef<[u8]>,
{
    let data = BASE64_STANDARD.decode(msg)?;

    let envelope_type = *data.first().ok_or(EnvelopeError::Truncated)?;
    if envelope_type != TYPE_0 {
        return Err(EnvelopeError::UnsupportedEnvelopeType(envelope_type));
    }

    let init_vec: &InitVec = data
        .get(TYPE_LENGTH..TYPE_LENGTH + INIT_VEC_LEN)
        .and_then(|s| s.try_into().ok())
        .ok_or(EnvelopeError::Truncated)?;
    let sealed = data
        .get(TYPE_LENGTH + INIT_VEC_LEN..)
        .ok_or(EnvelopeError::Truncated)?;

    let payload = Payload {
        msg: sealed,
        aad: &[],
    };

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let decrypted = cipher
        .decrypt(Nonce::from_slice(init_vec), payload)
        .map_err(|e| EnvelopeError::Decryption(e.to_string()))?;

    Ok(String::from_utf8(decrypted)?)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use hex_literal::hex;

    use super::*;

    const PLAINTEXT: &str = r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionPing","params":{}}"#;
    const SYMKEY: SymKey = hex!(
        "80 81 82 83 84 85 86 87 88 89 8a 8b 8c 8d 8e 8f
         90 91 92 93 94 95 96 97 98 99 9a 9b 9c 9d 9e 9f"
    );

    /// Tests that a sealed message can be opened back.
    #[test]
    fn test_open_sealed() -> Result<()> {
        let sealed = seal(PLAINTEXT, &SYMKEY)?;
        let opened = open(&sealed, &SYMKEY)?;

        assert_eq!(opened, PLAINTEXT);

        Ok(())
    }

    /// Tests that opening with the wrong key fails instead of producing
    /// garbage.
    #[test]
    fn test_wrong_key_fails() -> Result<()> {
        let sealed = seal(PLAINTEXT, &SYMKEY)?;

        let mut wrong = SYMKEY;
        wrong[0] ^= 0xff;

        assert!(matches!(
            open(&sealed, &wrong),
            Err(EnvelopeError::Decryption(_))
        ));

        Ok(())
    }

    #[test]
    fn test_unsupported_envelope_type() -> Result<()> {
        let data = BASE64_STANDARD.encode([1u8; 40]);

        assert!(matches!(
            open(&data, &SYMKEY),
            Err(EnvelopeError::UnsupportedEnvelopeType(1))
        ));

        Ok(())
    }

    #[test]
    fn test_truncated_envelope() -> Result<()> {
        let data = BASE64_STANDARD.encode([0u8; 4]);

        assert!(matches!(open(&data, &SYMKEY), Err(EnvelopeError::Truncated)));

        Ok(())
    }
}
