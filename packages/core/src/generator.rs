//! Building and signing documents.
//!
//! Every operation takes the current document by reference and returns a new
//! one; nothing here mutates a caller's value. Items are signed as they are
//! added, and any change to the item list drops the document signature until
//! [`sign_feed`] is called again.

use chrono::{SecondsFormat, Utc};
use ed25519_dalek::SigningKey;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::report::{ErrorCode, Report, ReportEntry};
use crate::signing::{ensure_key_matches, sign_document, sign_item, SignatureAlgorithm, SigningError};
use crate::types::{is_extension_key, Attachment, Author, Document, Extensions, Interactions, Item};
use crate::validation::{validate_document, validate_item};
use crate::version::ProtocolVersion;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("feed metadata is invalid: {}", .0.summary())]
    InvalidMetadata(Report),
    #[error("item is invalid: {}", .0.summary())]
    InvalidItem(Report),
    #[error("no item with id {0:?}")]
    ItemNotFound(String),
    #[error("an item with id {0:?} already exists")]
    DuplicateItemId(String),
    #[error("signing key does not belong to {0}")]
    KeyMismatch(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Everything needed to start a document.
#[derive(Debug, Clone)]
pub struct FeedMetadata {
    pub title: String,
    pub home_page_url: String,
    pub feed_url: String,
    pub author: Author,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub language: Option<String>,
    /// Defaults to the current protocol version.
    pub version: Option<ProtocolVersion>,
    pub extensions: Extensions,
}

impl FeedMetadata {
    pub fn new(
        title: impl Into<String>,
        home_page_url: impl Into<String>,
        feed_url: impl Into<String>,
        author: Author,
    ) -> Self {
        Self {
            title: title.into(),
            home_page_url: home_page_url.into(),
            feed_url: feed_url.into(),
            author,
            description: None,
            icon: None,
            language: None,
            version: None,
            extensions: Extensions::new(),
        }
    }
}

/// Caller-supplied item content. `date_published` defaults to now and
/// `uuid` to a fresh v7 UUID.
///
/// Deserializes from the same field names as [`Item`]; unrecognised fields
/// land in `extensions`, and the item is rejected unless every one of them is
/// a `_`-prefixed extension. Reserved names such as `signature` or
/// `date_modified` are set by the generator and refused here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemData {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub content_text: Option<String>,
    pub content_html: Option<String>,
    pub content_markdown: Option<String>,
    pub summary: Option<String>,
    pub date_published: Option<String>,
    pub uuid: Option<String>,
    pub author: Option<Author>,
    pub tags: Option<Vec<String>>,
    pub in_reply_to: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub interactions: Option<Interactions>,
    #[serde(flatten)]
    pub extensions: Extensions,
}

impl ItemData {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.content_text = Some(content.into());
        self
    }

    fn into_item(self, now: &str) -> Item {
        Item {
            id: self.id,
            url: self.url,
            uuid: Some(self.uuid.unwrap_or_else(|| Uuid::now_v7().to_string())),
            title: self.title,
            content_text: self.content_text,
            content_html: self.content_html,
            content_markdown: self.content_markdown,
            summary: self.summary,
            date_published: self.date_published.unwrap_or_else(|| now.to_string()),
            date_modified: None,
            author: self.author,
            tags: self.tags,
            in_reply_to: self.in_reply_to,
            attachments: self.attachments,
            interactions: self.interactions,
            signature: None,
            extensions: self.extensions,
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn algorithm_for(doc: &Document) -> SignatureAlgorithm {
    doc.protocol_version()
        .unwrap_or(ProtocolVersion::CURRENT)
        .signature_algorithm()
}

/// Start an empty, unsigned document.
///
/// Metadata is validated up front; validation warnings (an unusual language
/// tag, say) do not block creation.
pub fn create_feed(metadata: FeedMetadata) -> Result<Document, GeneratorError> {
    let version = metadata.version.unwrap_or(ProtocolVersion::CURRENT);
    let mut doc = Document::new(
        metadata.title,
        metadata.home_page_url,
        metadata.feed_url,
        metadata.author,
    );
    doc.version = version.to_uri();
    doc.description = metadata.description;
    doc.icon = metadata.icon;
    doc.language = metadata.language;
    doc.extensions = metadata.extensions;

    let raw = serde_json::to_value(&doc).unwrap_or(Value::Null);
    let mut report = validate_document(&raw).into_report();
    reject_foreign_keys(&doc.extensions, "", &mut report);
    reject_foreign_keys(&doc.author.extensions, "author", &mut report);
    if report.has_errors() {
        return Err(GeneratorError::InvalidMetadata(report));
    }
    debug!(title = %doc.title, version = %version, "created feed");
    Ok(doc)
}

/// Append a new item, signed by `key`.
///
/// The key must belong to the item's author, or to the document author when
/// the item has none. The returned document carries no document signature.
pub fn add_item(doc: &Document, data: ItemData, key: &SigningKey) -> Result<Document, GeneratorError> {
    if doc.item(&data.id).is_some() {
        return Err(GeneratorError::DuplicateItemId(data.id));
    }
    let item = data.into_item(&now_rfc3339());
    check_item(&item, doc.items.len())?;

    let signer = doc.signer_key_for(&item);
    ensure_signer(key, signer)?;

    let signed = sign_item(&item, key, algorithm_for(doc))?;
    let mut next = doc.clone();
    next.items.push(signed);
    next.signature = None;
    debug!(id = %item.id, items = next.items.len(), "added item");
    Ok(next)
}

/// Replace an item's content, stamp `date_modified`, and re-sign it.
///
/// The document is re-sealed when it was sealed before, which requires
/// `key` to belong to the document author as well.
pub fn update_item(
    doc: &Document,
    id: &str,
    data: ItemData,
    key: &SigningKey,
) -> Result<Document, GeneratorError> {
    let index = doc
        .items
        .iter()
        .position(|i| i.id == id)
        .ok_or_else(|| GeneratorError::ItemNotFound(id.to_string()))?;
    let original = &doc.items[index];

    let mut data = data;
    data.id = id.to_string();
    data.date_published = Some(original.date_published.clone());
    if data.uuid.is_none() {
        data.uuid = original.uuid.clone();
    }
    let mut item = data.into_item(&now_rfc3339());
    item.date_modified = Some(now_rfc3339());
    check_item(&item, index)?;

    ensure_signer(key, doc.signer_key_for(&item))?;
    let signed = sign_item(&item, key, algorithm_for(doc))?;

    let mut next = doc.clone();
    next.items[index] = signed;
    next.signature = None;
    if doc.signature.is_some() {
        next = sign_feed(&next, key)?;
    }
    debug!(id, "updated item");
    Ok(next)
}

/// Drop an item. The document signature is cleared.
pub fn remove_item(doc: &Document, id: &str) -> Result<Document, GeneratorError> {
    let mut next = doc.clone();
    let before = next.items.len();
    next.items.retain(|i| i.id != id);
    if next.items.len() == before {
        return Err(GeneratorError::ItemNotFound(id.to_string()));
    }
    next.signature = None;
    Ok(next)
}

/// Seal the document with a signature over its canonical form.
pub fn sign_feed(doc: &Document, key: &SigningKey) -> Result<Document, GeneratorError> {
    ensure_signer(key, &doc.author.public_key)?;
    Ok(sign_document(doc, key, algorithm_for(doc))?)
}

/// Create a document, add every item, and seal it.
pub fn create_complete_feed(
    metadata: FeedMetadata,
    items: Vec<ItemData>,
    key: &SigningKey,
) -> Result<Document, GeneratorError> {
    let mut doc = create_feed(metadata)?;
    for data in items {
        doc = add_item(&doc, data, key)?;
    }
    sign_feed(&doc, key)
}

fn check_item(item: &Item, index: usize) -> Result<(), GeneratorError> {
    let raw = serde_json::to_value(item).unwrap_or(Value::Null);
    let mut report = validate_item(&raw, index, false).into_report();
    let path = format!("items[{index}]");
    reject_foreign_keys(&item.extensions, &path, &mut report);
    if let Some(author) = &item.author {
        reject_foreign_keys(&author.extensions, &format!("{path}.author"), &mut report);
    }
    if report.has_errors() {
        Err(GeneratorError::InvalidItem(report))
    } else {
        Ok(())
    }
}

/// Only `_`-prefixed keys may ride along in a side-map the caller filled.
fn reject_foreign_keys(extensions: &Extensions, path: &str, report: &mut Report) {
    for key in extensions.keys().filter(|k| !is_extension_key(k)) {
        let field = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        report.error(
            ReportEntry::new(
                ErrorCode::InvalidExtensionField,
                format!("{key:?} cannot be supplied; extension fields must start with `_`"),
            )
            .at(field),
        );
    }
}

fn ensure_signer(key: &SigningKey, public_key: &str) -> Result<(), GeneratorError> {
    match ensure_key_matches(key, public_key) {
        Ok(()) => Ok(()),
        Err(SigningError::KeyMismatch(_)) => Err(GeneratorError::KeyMismatch(public_key.to_string())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use crate::parser::{ParseOptions, Parser};
    use crate::signing::{verify_document, verify_item};

    fn metadata(kp: &KeyPair) -> FeedMetadata {
        FeedMetadata::new(
            "My Blog",
            "https://example.com",
            "https://example.com/feed.ansybl",
            Author::new("Alice", kp.public_key()),
        )
    }

    fn hello() -> ItemData {
        ItemData::new("https://example.com/p/1", "https://example.com/p/1").text("Hello")
    }

    #[test]
    fn create_feed_starts_empty_and_unsigned() {
        let kp = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        assert!(doc.items.is_empty());
        assert!(doc.signature.is_none());
        assert_eq!(doc.version, ProtocolVersion::CURRENT.to_uri());
    }

    #[test]
    fn create_feed_rejects_bad_urls() {
        let kp = KeyPair::generate();
        let mut meta = metadata(&kp);
        meta.feed_url = "not a url".into();
        match create_feed(meta) {
            Err(GeneratorError::InvalidMetadata(report)) => {
                assert!(report.has_code(ErrorCode::InvalidUri))
            }
            other => panic!("expected InvalidMetadata, got {other:?}"),
        }
    }

    #[test]
    fn add_item_signs_and_defaults() {
        let kp = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        let doc = add_item(&doc, hello(), kp.signing_key()).unwrap();
        let item = &doc.items[0];
        assert!(item.uuid.is_some());
        assert!(chrono::DateTime::parse_from_rfc3339(&item.date_published).is_ok());
        assert!(verify_item(item, &kp.public_key()).unwrap());
        assert!(doc.signature.is_none());
    }

    #[test]
    fn add_item_requires_content() {
        let kp = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        let data = ItemData::new("https://example.com/p/1", "https://example.com/p/1");
        assert!(matches!(
            add_item(&doc, data, kp.signing_key()),
            Err(GeneratorError::InvalidItem(_))
        ));
    }

    #[test]
    fn add_item_rejects_foreign_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        assert!(matches!(
            add_item(&doc, hello(), other.signing_key()),
            Err(GeneratorError::KeyMismatch(_))
        ));
    }

    #[test]
    fn add_item_rejects_duplicate_id() {
        let kp = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        let doc = add_item(&doc, hello(), kp.signing_key()).unwrap();
        assert!(matches!(
            add_item(&doc, hello(), kp.signing_key()),
            Err(GeneratorError::DuplicateItemId(_))
        ));
    }

    #[test]
    fn guest_item_is_signed_by_its_own_author() {
        let kp = KeyPair::generate();
        let guest = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        let mut data = hello();
        data.author = Some(Author::new("Guest", guest.public_key()));
        let doc = add_item(&doc, data, guest.signing_key()).unwrap();
        assert!(verify_item(&doc.items[0], &guest.public_key()).unwrap());
        let doc = sign_feed(&doc, kp.signing_key()).unwrap();
        assert!(verify_document(&doc).unwrap());
    }

    #[test]
    fn adding_an_item_invalidates_the_seal() {
        let kp = KeyPair::generate();
        let doc = create_complete_feed(metadata(&kp), vec![hello()], kp.signing_key()).unwrap();
        assert!(verify_document(&doc).unwrap());
        let more = ItemData::new("https://example.com/p/2", "https://example.com/p/2").text("Again");
        let doc = add_item(&doc, more, kp.signing_key()).unwrap();
        assert!(doc.signature.is_none());
    }

    #[test]
    fn update_item_stamps_modified_and_reseals() {
        let kp = KeyPair::generate();
        let doc = create_complete_feed(metadata(&kp), vec![hello()], kp.signing_key()).unwrap();
        let original = doc.items[0].clone();
        let updated = update_item(&doc, &original.id, hello().text("Hello, edited"), kp.signing_key())
            .unwrap();
        let item = &updated.items[0];
        assert_eq!(item.content_text.as_deref(), Some("Hello, edited"));
        assert_eq!(item.date_published, original.date_published);
        assert_eq!(item.uuid, original.uuid);
        assert!(item.date_modified.is_some());
        assert!(verify_item(item, &kp.public_key()).unwrap());
        assert!(verify_document(&updated).unwrap());
    }

    #[test]
    fn remove_item_clears_signature() {
        let kp = KeyPair::generate();
        let doc = create_complete_feed(metadata(&kp), vec![hello()], kp.signing_key()).unwrap();
        let doc = remove_item(&doc, "https://example.com/p/1").unwrap();
        assert!(doc.items.is_empty());
        assert!(doc.signature.is_none());
        assert!(matches!(
            remove_item(&doc, "https://example.com/p/1"),
            Err(GeneratorError::ItemNotFound(_))
        ));
    }

    #[test]
    fn complete_feed_verifies_through_the_parser() {
        let kp = KeyPair::generate();
        let items = vec![
            hello(),
            ItemData::new("https://example.com/p/2", "https://example.com/p/2").text("Second"),
        ];
        let doc = create_complete_feed(metadata(&kp), items, kp.signing_key()).unwrap();
        let r = Parser::new(ParseOptions::verified()).parse_document(&doc);
        assert!(r.signatures.all_valid, "{}", r.report.summary());
        assert_eq!(r.feed(), Some(&doc));
    }

    #[test]
    fn item_data_reads_item_shaped_json() {
        let data: ItemData = serde_json::from_value(serde_json::json!({
            "id": "https://example.com/p/9",
            "url": "https://example.com/p/9",
            "content_markdown": "*hi*",
            "tags": ["a"],
            "_org_example_mood": "calm"
        }))
        .unwrap();
        assert_eq!(data.content_markdown.as_deref(), Some("*hi*"));
        assert!(data.date_published.is_none());
        assert_eq!(data.extensions["_org_example_mood"], "calm");
    }

    #[test]
    fn reserved_names_in_item_data_are_refused() {
        let kp = KeyPair::generate();
        let doc = create_feed(metadata(&kp)).unwrap();
        let data: ItemData = serde_json::from_value(serde_json::json!({
            "id": "https://example.com/p/9",
            "url": "https://example.com/p/9",
            "content_text": "hi",
            "signature": "ed25519:AAAA",
            "_org_example_mood": "calm"
        }))
        .unwrap();
        match add_item(&doc, data, kp.signing_key()) {
            Err(GeneratorError::InvalidItem(report)) => {
                assert_eq!(report.errors.len(), 1);
                assert_eq!(report.errors[0].code, ErrorCode::InvalidExtensionField);
                assert_eq!(report.errors[0].field.as_deref(), Some("items[0].signature"));
            }
            other => panic!("expected InvalidItem, got {other:?}"),
        }
    }

    #[test]
    fn metadata_extensions_must_be_prefixed() {
        let kp = KeyPair::generate();
        let mut meta = metadata(&kp);
        meta.extensions.insert("date_modified".into(), serde_json::json!("2026-01-01T00:00:00Z"));
        assert!(matches!(create_feed(meta), Err(GeneratorError::InvalidMetadata(_))));
    }

    #[test]
    fn v1_1_documents_sign_with_jcs_algorithm() {
        let kp = KeyPair::generate();
        let mut meta = metadata(&kp);
        meta.version = Some(ProtocolVersion::V1_1);
        let doc = create_complete_feed(meta, vec![hello()], kp.signing_key()).unwrap();
        assert!(doc.signature.as_deref().unwrap().starts_with("ed25519-jcs:"));
        assert!(doc.items[0].signature.as_deref().unwrap().starts_with("ed25519-jcs:"));
        assert!(verify_document(&doc).unwrap());
    }
}
