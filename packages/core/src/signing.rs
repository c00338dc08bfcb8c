//! Ed25519 signing and verification over canonical payloads.
//!
//! Signature strings are `<algorithm-id>:<base64>`. Both algorithm
//! identifiers this crate knows sign the same JCS payload; the identifier
//! records which protocol line produced the signature so that migrations can
//! rewrite it without touching the signature bytes.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::canonical::{canonicalize_document, canonicalize_item, CanonicalError};
use crate::keys::{encode_public_key, parse_public_key, KeyError};
use crate::types::{Document, Item};

/// Algorithm identifier prefixed to a signature string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// `ed25519`, protocol 1.0.
    Ed25519,
    /// `ed25519-jcs`, protocol 1.1. Names the canonicalization scheme.
    Ed25519Jcs,
}

impl SignatureAlgorithm {
    pub fn id(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::Ed25519Jcs => "ed25519-jcs",
        }
    }

    /// `"ed25519:"`: the prefix a signature string starts with.
    pub fn prefix(&self) -> String {
        format!("{}:", self.id())
    }
}

/// Formats the algorithm as its wire identifier.
impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(SignatureAlgorithm::Ed25519),
            "ed25519-jcs" => Ok(SignatureAlgorithm::Ed25519Jcs),
            _ => Err(format!(
                "unknown signature algorithm {s:?}; expected one of: ed25519, ed25519-jcs"
            )),
        }
    }
}

impl Serialize for SignatureAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for SignatureAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors returned by the typed signing helpers.
#[derive(Debug, Error, PartialEq)]
pub enum SigningError {
    #[error("canonicalization failed: {0}")]
    Canonicalization(#[from] CanonicalError),
    #[error("invalid key: {0}")]
    Key(#[from] KeyError),
    #[error("signing key does not match the advertised public key {0:?}")]
    KeyMismatch(String),
}

/// Why a signature string could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum SignatureFormatError {
    #[error("signature has no algorithm prefix")]
    MissingAlgorithm,
    #[error("{0}")]
    UnknownAlgorithm(String),
    #[error("signature base64 decoding failed: {0}")]
    Encoding(String),
    #[error("signature must be exactly 64 bytes, got {0}")]
    InvalidLength(usize),
}

/// Split a signature string into its algorithm and raw signature.
pub fn decode_signature(
    signature: &str,
) -> Result<(SignatureAlgorithm, ed25519_dalek::Signature), SignatureFormatError> {
    let (alg, body) = signature
        .split_once(':')
        .ok_or(SignatureFormatError::MissingAlgorithm)?;
    let algorithm = alg
        .parse::<SignatureAlgorithm>()
        .map_err(SignatureFormatError::UnknownAlgorithm)?;
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| SignatureFormatError::Encoding(e.to_string()))?;
    let arr: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SignatureFormatError::InvalidLength(bytes.len()))?;
    Ok((algorithm, ed25519_dalek::Signature::from_bytes(&arr)))
}

/// Sign canonical payload bytes, tagging the result `ed25519:`.
pub fn sign_content(payload: &[u8], signing_key: &SigningKey) -> String {
    sign_content_with(payload, signing_key, SignatureAlgorithm::Ed25519)
}

/// Sign canonical payload bytes under the given algorithm identifier.
///
/// Ed25519 is deterministic: the same payload and key always produce the
/// same string.
pub fn sign_content_with(
    payload: &[u8],
    signing_key: &SigningKey,
    algorithm: SignatureAlgorithm,
) -> String {
    let signature = signing_key.sign(payload);
    format!("{}{}", algorithm.prefix(), STANDARD.encode(signature.to_bytes()))
}

/// Verify a signature string over payload bytes.
///
/// The public key string is validated eagerly and a malformed one is an
/// error. A malformed or non-matching signature is simply `Ok(false)`.
pub fn verify_signature(payload: &[u8], signature: &str, public_key: &str) -> Result<bool, KeyError> {
    let verifying_key = parse_public_key(public_key)?;
    let Ok((_, sig)) = decode_signature(signature) else {
        return Ok(false);
    };
    Ok(verifying_key.verify(payload, &sig).is_ok())
}

/// Return a copy of `item` carrying a fresh signature.
///
/// Any existing signature is replaced; it is never part of the payload.
pub fn sign_item(
    item: &Item,
    signing_key: &SigningKey,
    algorithm: SignatureAlgorithm,
) -> Result<Item, SigningError> {
    let payload = canonicalize_item(item)?;
    let mut signed = item.clone();
    signed.signature = Some(sign_content_with(&payload, signing_key, algorithm));
    Ok(signed)
}

/// Verify an item's signature against `public_key`. `Ok(false)` when unsigned.
pub fn verify_item(item: &Item, public_key: &str) -> Result<bool, SigningError> {
    let Some(signature) = &item.signature else {
        return Ok(false);
    };
    let payload = canonicalize_item(item)?;
    Ok(verify_signature(&payload, signature, public_key)?)
}

/// Return a copy of `doc` sealed with a document signature.
///
/// The key must belong to `doc.author`. Items are signed independently and
/// their signatures stay inside the payload.
pub fn sign_document(
    doc: &Document,
    signing_key: &SigningKey,
    algorithm: SignatureAlgorithm,
) -> Result<Document, SigningError> {
    ensure_key_matches(signing_key, &doc.author.public_key)?;
    let payload = canonicalize_document(doc)?;
    let mut signed = doc.clone();
    signed.signature = Some(sign_content_with(&payload, signing_key, algorithm));
    Ok(signed)
}

/// Verify the document signature against `doc.author.public_key`.
pub fn verify_document(doc: &Document) -> Result<bool, SigningError> {
    let Some(signature) = &doc.signature else {
        return Ok(false);
    };
    let payload = canonicalize_document(doc)?;
    Ok(verify_signature(&payload, signature, &doc.author.public_key)?)
}

/// Fail unless `signing_key` is the private half of `public_key`.
pub fn ensure_key_matches(signing_key: &SigningKey, public_key: &str) -> Result<(), SigningError> {
    let advertised = parse_public_key(public_key)?;
    if advertised != signing_key.verifying_key() {
        return Err(SigningError::KeyMismatch(encode_public_key(&advertised)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
