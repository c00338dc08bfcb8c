//! Core data types for the Ansybl protocol.
//!
//! This module defines the wire-format structures of a feed document:
//! [`Document`], [`Author`], [`Item`], [`Attachment`] and [`Interactions`].
//! Every optional field is skipped when absent so that a typed value
//! re-serialises to the same canonical bytes as the JSON it was read from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Reserved key prefix for extension fields (`_com_example_rating`).
pub const EXTENSION_PREFIX: char = '_';

/// Extension fields, keyed by their full (`_`-prefixed) name.
///
/// Kept as an ordered side-map rather than loose dynamic properties so that
/// canonicalization over them is explicit. The parser only ever fills it with
/// `_`-prefixed keys; a migration may also leave fields here that a later
/// protocol version defines and this model does not name yet.
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// Returns `true` if `key` uses the reserved extension prefix.
pub fn is_extension_key(key: &str) -> bool {
    key.len() > 1 && key.starts_with(EXTENSION_PREFIX)
}

/// The identity that signs a document, and by default each of its items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub name: String,

    /// `ed25519:<base64>` verifying key.
    pub public_key: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(flatten)]
    pub extensions: Extensions,
}

impl Author {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
            url: None,
            avatar: None,
            extensions: Extensions::new(),
        }
    }
}

/// A file or media object attached to an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub url: String,

    /// `type/subtype`, e.g. `image/png`.
    pub mime_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_in_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blurhash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            title: None,
            size_in_bytes: None,
            width: None,
            height: None,
            duration_in_seconds: None,
            alt_text: None,
            blurhash: None,
            data_uri: None,
        }
    }
}

/// Social counters for an item plus the endpoints where they can be acted on.
///
/// Every member is optional: an absent counter is not the same as zero, and
/// the signed payload must not change when a typed value is re-serialised.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Interactions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares_url: Option<String>,
}

/// One content entry of a document: a post, a reply, a media share.
///
/// An item must carry a `title` or at least one content representation.
/// Its `signature` covers the canonical form of the item with the
/// signature field itself removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_markdown: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// RFC 3339 timestamp.
    pub date_published: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<String>,

    /// Signer of this item when it differs from the document author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,

    /// Kept in the order given; duplicates are not collapsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// URI of the parent item this one replies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions: Option<Interactions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(flatten)]
    pub extensions: Extensions,
}

impl Item {
    /// An unsigned item with the two required identifiers and a publication date.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        date_published: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            uuid: None,
            title: None,
            content_text: None,
            content_html: None,
            content_markdown: None,
            summary: None,
            date_published: date_published.into(),
            date_modified: None,
            author: None,
            tags: None,
            in_reply_to: None,
            attachments: None,
            interactions: None,
            signature: None,
            extensions: Extensions::new(),
        }
    }

    /// Whether the item has a title or any content representation.
    pub fn has_content(&self) -> bool {
        [
            &self.title,
            &self.content_text,
            &self.content_html,
            &self.content_markdown,
        ]
        .iter()
        .any(|f| f.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

/// A feed document: the signed root object of the protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Version URI, e.g. `https://ansybl.org/version/1.0`.
    pub version: String,

    pub title: String,
    pub home_page_url: String,
    pub feed_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Introduced in 1.1: the publisher has stopped updating this feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,

    pub author: Author,

    #[serde(default)]
    pub items: Vec<Item>,

    /// Covers the canonical document without this field. Item signatures
    /// stay inside the signed payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(flatten)]
    pub extensions: Extensions,
}

impl Document {
    /// An empty, unsigned document at the current protocol version.
    pub fn new(
        title: impl Into<String>,
        home_page_url: impl Into<String>,
        feed_url: impl Into<String>,
        author: Author,
    ) -> Self {
        Self {
            version: ProtocolVersion::CURRENT.to_uri(),
            title: title.into(),
            home_page_url: home_page_url.into(),
            feed_url: feed_url.into(),
            description: None,
            icon: None,
            language: None,
            expired: None,
            author,
            items: Vec::new(),
            signature: None,
            extensions: Extensions::new(),
        }
    }

    /// The parsed version, if `version` is well-formed.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::parse(&self.version).ok()
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    /// The public key an item's signature must verify against: the item's
    /// own author if it has one, otherwise the document author.
    pub fn signer_key_for<'a>(&'a self, item: &'a Item) -> &'a str {
        item.author
            .as_ref()
            .map_or(self.author.public_key.as_str(), |a| a.public_key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let item = Item::new("https://e.com/1", "https://e.com/1", "2026-01-01T00:00:00Z");
        let value = serde_json::to_value(&item).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(!obj.contains_key("signature"));
        assert!(!obj.contains_key("tags"));
    }

    #[test]
    fn extensions_round_trip_through_flatten() {
        let json = r#"{
            "id": "https://e.com/1",
            "url": "https://e.com/1",
            "date_published": "2026-01-01T00:00:00Z",
            "content_text": "hi",
            "_org_example_mood": "cheerful"
        }"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert_eq!(
            item.extensions.get("_org_example_mood"),
            Some(&serde_json::json!("cheerful"))
        );
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["_org_example_mood"], "cheerful");
    }

    #[test]
    fn interactions_without_counters_stay_without_counters() {
        let json = serde_json::json!({ "replies_url": "https://e.com/1/replies" });
        let interactions: Interactions = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(interactions.replies_count, None);
        assert_eq!(serde_json::to_value(&interactions).unwrap(), json);
    }

    #[test]
    fn large_attachment_dimensions_survive() {
        let json = serde_json::json!({
            "url": "https://e.com/pano.jpg",
            "mime_type": "image/jpeg",
            "width": 5_000_000_000u64
        });
        let a: Attachment = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(a.width, Some(5_000_000_000));
        assert_eq!(serde_json::to_value(&a).unwrap(), json);
    }

    #[test]
    fn has_content_ignores_empty_strings() {
        let mut item = Item::new("a:1", "a:1", "2026-01-01T00:00:00Z");
        assert!(!item.has_content());
        item.content_html = Some(String::new());
        assert!(!item.has_content());
        item.content_markdown = Some("*hi*".into());
        assert!(item.has_content());
    }

    #[test]
    fn signer_key_prefers_item_author() {
        let mut doc = Document::new(
            "T",
            "https://e.com",
            "https://e.com/f.ansybl",
            Author::new("A", "ed25519:feed"),
        );
        let mut item = Item::new("a:1", "a:1", "2026-01-01T00:00:00Z");
        assert_eq!(doc.signer_key_for(&item), "ed25519:feed");
        item.author = Some(Author::new("B", "ed25519:item"));
        doc.items.push(item.clone());
        assert_eq!(doc.signer_key_for(&item), "ed25519:item");
    }

    #[test]
    fn extension_key_detection() {
        assert!(is_extension_key("_x"));
        assert!(!is_extension_key("_"));
        assert!(!is_extension_key("title"));
    }
}
