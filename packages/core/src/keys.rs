//! Ed25519 key strings and key pairs.
//!
//! Keys travel as `ed25519:<base64>` strings. Public keys carry the 32-byte
//! verifying key; private keys carry the 32-byte seed (the 64-byte
//! seed‖public form is also accepted and cross-checked). Anything else is
//! rejected eagerly so a bad key never turns into a silent `false` later.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Algorithm prefix shared by every key string this crate understands.
pub const KEY_PREFIX: &str = "ed25519:";

/// Errors returned when decoding a key string.
#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("key must start with \"ed25519:\", got {0:?}")]
    MissingPrefix(String),
    #[error("base64 decoding failed: {0}")]
    Encoding(String),
    #[error("key must be {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid Ed25519 public key: {0}")]
    InvalidPoint(String),
    #[error("public half of the private key does not match its seed")]
    Mismatch,
}

/// Decode an `ed25519:<base64>` verifying key.
pub fn parse_public_key(s: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = decode_prefixed(s)?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength {
            expected: 32,
            got: bytes.len(),
        })?;
    VerifyingKey::from_bytes(&arr).map_err(|e| KeyError::InvalidPoint(e.to_string()))
}

/// Decode an `ed25519:<base64>` private key (32-byte seed or 64-byte keypair).
pub fn parse_private_key(s: &str) -> Result<SigningKey, KeyError> {
    let bytes = decode_prefixed(s)?;
    match bytes.len() {
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        64 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes[..32]);
            let key = SigningKey::from_bytes(&seed);
            if key.verifying_key().as_bytes() != &bytes[32..] {
                return Err(KeyError::Mismatch);
            }
            Ok(key)
        }
        got => Err(KeyError::InvalidLength { expected: 32, got }),
    }
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    format!("{KEY_PREFIX}{}", STANDARD.encode(key.as_bytes()))
}

/// Encodes the 32-byte seed. **Keep the result secret.**
pub fn encode_private_key(key: &SigningKey) -> String {
    format!("{KEY_PREFIX}{}", STANDARD.encode(key.to_bytes()))
}

fn decode_prefixed(s: &str) -> Result<Vec<u8>, KeyError> {
    let body = s
        .strip_prefix(KEY_PREFIX)
        .ok_or_else(|| KeyError::MissingPrefix(s.to_string()))?;
    STANDARD
        .decode(body)
        .map_err(|e| KeyError::Encoding(e.to_string()))
}

/// An author's signing identity.
///
/// Generation and storage of the seed are the host's business; this type
/// only wraps an already-available key so the rest of the crate can derive
/// the advertised public key string from it.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair using OS randomness.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Restore from an `ed25519:<base64>` private key string.
    pub fn from_private_key(s: &str) -> Result<Self, KeyError> {
        Ok(Self {
            signing_key: parse_private_key(s)?,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The `ed25519:<base64>` string placed in `author.public_key`.
    pub fn public_key(&self) -> String {
        encode_public_key(&self.signing_key.verifying_key())
    }

    pub fn private_key(&self) -> String {
        encode_private_key(&self.signing_key)
    }
}

impl From<SigningKey> for KeyPair {
    fn from(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }
}

/// Redacts the secret half.
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
