use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::Engine;
use thiserror::Error;

const CIPHER_TAG: &str = "aes256gcm";
const FORMAT_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: expected 'enc:<cipher>:<version>:<ciphertext>'")]
    Malformed,
    #[error("unsupported cipher '{0}'")]
    UnsupportedCipher(String),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decryption failed (wrong key or corrupted ciphertext)")]
    DecryptionFailed,
    #[error("encryption key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Encrypts and decrypts the `enc:<cipher>:<version>:<ciphertext>`
/// credential-at-rest envelope. The cipher and version are stored
/// alongside the ciphertext so a future algorithm change is visible and
/// decodable without a separate migration flag.
pub struct CredentialEnvelope {
    cipher: Aes256Gcm,
}

impl CredentialEnvelope {
    pub fn new(key: &[u8]) -> Result<Self, EnvelopeError> {
        if key.len() != 32 {
            return Err(EnvelopeError::InvalidKeyLength(key.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn seal(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AES-256-GCM encryption over static-size key/nonce cannot fail");

        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        format!(
            "enc:{CIPHER_TAG}:{FORMAT_VERSION}:{}",
            base64::engine::general_purpose::STANDARD.encode(sealed)
        )
    }

    pub fn open(&self, envelope: &str) -> Result<String, EnvelopeError> {
        let mut parts = envelope.splitn(4, ':');
        let (Some("enc"), Some(cipher), Some(_version), Some(payload)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(EnvelopeError::Malformed);
        };
        if cipher != CIPHER_TAG {
            return Err(EnvelopeError::UnsupportedCipher(cipher.to_string()));
        }

        let raw = base64::engine::general_purpose::STANDARD.decode(payload)?;
        if raw.len() < 12 {
            return Err(EnvelopeError::DecryptionFailed);
        }
        let (nonce, ciphertext) = raw.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(nonce.into(), ciphertext)
            .map_err(|_| EnvelopeError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| EnvelopeError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> CredentialEnvelope {
        CredentialEnvelope::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let env = envelope();
        let sealed = env.seal("sk-super-secret");
        assert!(sealed.starts_with("enc:aes256gcm:v1:"));
        assert_eq!(env.open(&sealed).unwrap(), "sk-super-secret");
    }

    #[test]
    fn open_rejects_malformed_envelope() {
        let env = envelope();
        assert!(matches!(
            env.open("not-an-envelope"),
            Err(EnvelopeError::Malformed)
        ));
    }

    #[test]
    fn open_rejects_unsupported_cipher() {
        let env = envelope();
        assert!(matches!(
            env.open("enc:rot13:v1:abcd"),
            Err(EnvelopeError::UnsupportedCipher(_))
        ));
    }

    #[test]
    fn open_fails_with_wrong_key() {
        let sealed = envelope().seal("sk-super-secret");
        let other = CredentialEnvelope::new(&[9u8; 32]).unwrap();
        assert!(matches!(
            other.open(&sealed),
            Err(EnvelopeError::DecryptionFailed)
        ));
    }
}
