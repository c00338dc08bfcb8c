//! Canonical serialization of documents and items.
//!
//! The signing payload of an object is its JCS (RFC 8785) encoding with the
//! object's own `signature` member removed: keys sorted at every level, no
//! insignificant whitespace, ECMAScript number formatting. In feed mode the
//! nested items keep their signatures, so a feed signature attests to a
//! bundle of independently verifiable items.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Attachment, Document, Item};

/// Name of the member excluded from an object's own signing payload.
pub const SIGNATURE_FIELD: &str = "signature";

/// Which object the payload is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalMode {
    /// A whole document. The top-level `signature` is removed; item
    /// signatures are retained.
    Feed,
    /// A single item. Its `signature` is removed.
    Item,
}

/// Errors returned when a value cannot be canonicalized.
#[derive(Debug, Error, PartialEq)]
pub enum CanonicalError {
    #[error("{mode:?} payload must be a JSON object")]
    NotAnObject { mode: CanonicalMode },
    #[error("non-finite number at {0}")]
    NonFiniteNumber(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Canonical bytes for an already-decoded JSON value.
///
/// This is the form the parser verifies against, so fields the typed model
/// does not know about are still covered.
pub fn canonicalize_value(value: &Value, mode: CanonicalMode) -> Result<Vec<u8>, CanonicalError> {
    let Value::Object(map) = value else {
        return Err(CanonicalError::NotAnObject { mode });
    };
    let mut without_signature = map.clone();
    without_signature.remove(SIGNATURE_FIELD);
    serde_jcs::to_vec(&Value::Object(without_signature))
        .map_err(|e| CanonicalError::Serialization(e.to_string()))
}

/// Canonical signing payload of a document.
pub fn canonicalize_document(doc: &Document) -> Result<Vec<u8>, CanonicalError> {
    for (i, item) in doc.items.iter().enumerate() {
        check_item_numbers(item, &format!("items[{i}]"))?;
    }
    canonicalize_typed(doc, CanonicalMode::Feed)
}

/// Canonical signing payload of a single item.
pub fn canonicalize_item(item: &Item) -> Result<Vec<u8>, CanonicalError> {
    check_item_numbers(item, "item")?;
    canonicalize_typed(item, CanonicalMode::Item)
}

/// Canonical form of any serialisable value, with `signature` stripped from
/// its top level. Non-finite floats are the caller's responsibility here;
/// serde_json would silently turn them into `null`.
pub fn canonicalize_typed<T: Serialize>(
    value: &T,
    mode: CanonicalMode,
) -> Result<Vec<u8>, CanonicalError> {
    let value =
        serde_json::to_value(value).map_err(|e| CanonicalError::Serialization(e.to_string()))?;
    canonicalize_value(&value, mode)
}

fn check_item_numbers(item: &Item, path: &str) -> Result<(), CanonicalError> {
    let Some(attachments) = &item.attachments else {
        return Ok(());
    };
    for (j, attachment) in attachments.iter().enumerate() {
        check_attachment_numbers(attachment, &format!("{path}.attachments[{j}]"))?;
    }
    Ok(())
}

fn check_attachment_numbers(attachment: &Attachment, path: &str) -> Result<(), CanonicalError> {
    match attachment.duration_in_seconds {
        Some(d) if !d.is_finite() => Err(CanonicalError::NonFiniteNumber(format!(
            "{path}.duration_in_seconds"
        ))),
        _ => Ok(()),
    }
}
