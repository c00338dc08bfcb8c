//! Structural and semantic validation of raw documents.
//!
//! The validator works on a decoded [`serde_json::Value`] rather than the
//! typed model, so it can describe everything that is wrong with untrusted
//! input instead of stopping at the first deserialization failure. It never
//! checks signatures; it only checks that signature and key strings are
//! well-formed.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::report::{ErrorCode, Report, ReportEntry};
use crate::types::is_extension_key;
use crate::version::ProtocolVersion;

/// Outcome of [`validate_document`]. `valid` is `true` iff `errors` is empty.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ReportEntry>,
    pub warnings: Vec<ReportEntry>,
}

impl ValidationResult {
    fn from_report(report: Report) -> Self {
        Self {
            valid: report.errors.is_empty(),
            errors: report.errors,
            warnings: report.warnings,
        }
    }

    pub fn into_report(self) -> Report {
        Report {
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

const FEED_FIELDS: &[&str] = &[
    "version",
    "title",
    "home_page_url",
    "feed_url",
    "description",
    "icon",
    "language",
    "expired",
    "author",
    "items",
    "signature",
];

const ITEM_FIELDS: &[&str] = &[
    "id",
    "url",
    "uuid",
    "title",
    "content_text",
    "content_html",
    "content_markdown",
    "summary",
    "date_published",
    "date_modified",
    "author",
    "tags",
    "in_reply_to",
    "attachments",
    "interactions",
    "signature",
];

const COUNTERS: &[&str] = &["replies_count", "likes_count", "shares_count"];
const ENDPOINTS: &[&str] = &["replies_url", "likes_url", "shares_url"];

/// Validate a whole document.
///
/// Missing item signatures are reported as warnings: an unsigned item is
/// structurally sound but not yet publishable.
pub fn validate_document(raw: &Value) -> ValidationResult {
    let mut v = Checker::default();
    v.document(raw);
    ValidationResult::from_report(v.report)
}

/// Validate one item in isolation. `index` only shapes the reported field
/// paths. With `require_signature` unset an absent signature is not
/// reported, which is how the generator checks an item before signing it.
pub fn validate_item(raw: &Value, index: usize, require_signature: bool) -> ValidationResult {
    let mut v = Checker::default();
    v.item(raw, &format!("items[{index}]"), require_signature);
    ValidationResult::from_report(v.report)
}

/// Whether `s` is an absolute URI; `http(s)` URIs must also name a host.
pub fn is_valid_uri(s: &str) -> bool {
    if !URI_RE.is_match(s) {
        return false;
    }
    let lower = s.to_ascii_lowercase();
    if lower.starts_with("http:") || lower.starts_with("https:") {
        return HTTP_RE.is_match(s);
    }
    true
}

/// Whether `s` follows the `type/subtype` MIME grammar (parameters allowed).
pub fn is_valid_mime_type(s: &str) -> bool {
    MIME_RE.is_match(s)
}

// --- checker -----------------------------------------------------------------

#[derive(Default)]
struct Checker {
    report: Report,
}

impl Checker {
    fn error(&mut self, code: ErrorCode, message: impl Into<String>, field: &str) {
        self.report.error(ReportEntry::new(code, message).at(field));
    }

    fn warn(&mut self, code: ErrorCode, message: impl Into<String>, field: &str) {
        self.report.warning(ReportEntry::new(code, message).at(field));
    }

    fn document(&mut self, raw: &Value) {
        let Value::Object(obj) = raw else {
            self.error(ErrorCode::InvalidFieldType, "document must be a JSON object", "root");
            return;
        };

        if let Some(version) = self.required_str(obj, "version", "") {
            match ProtocolVersion::parse(version) {
                Ok(v) if !v.is_known() => self.warn(
                    ErrorCode::UnsupportedVersion,
                    format!("version {v} is not supported by this implementation"),
                    "version",
                ),
                Ok(_) => {}
                Err(e) => self.error(ErrorCode::InvalidVersion, e.to_string(), "version"),
            }
        }

        self.required_str(obj, "title", "");
        self.required_uri(obj, "home_page_url", "");
        self.required_uri(obj, "feed_url", "");
        self.optional_str(obj, "description", "");
        self.optional_uri(obj, "icon", "");

        if let Some(lang) = self.optional_str(obj, "language", "") {
            if !LANGUAGE_RE.is_match(lang) {
                self.warn(
                    ErrorCode::InvalidLanguage,
                    format!("language {lang:?} is not a BCP 47 tag"),
                    "language",
                );
            }
        }

        if let Some(expired) = obj.get("expired") {
            if !expired.is_boolean() {
                self.error(ErrorCode::InvalidFieldType, "expired must be a boolean", "expired");
            }
        }

        match obj.get("author") {
            None | Some(Value::Null) => {
                self.error(ErrorCode::MissingRequiredField, "author is required", "author")
            }
            Some(author) => self.author(author, "author"),
        }

        match obj.get("items") {
            None | Some(Value::Null) => {
                self.error(ErrorCode::MissingRequiredField, "items is required", "items")
            }
            Some(Value::Array(items)) => {
                let mut seen = HashSet::new();
                for (i, item) in items.iter().enumerate() {
                    let path = format!("items[{i}]");
                    self.item(item, &path, true);
                    if let Some(id) = item.get("id").and_then(Value::as_str) {
                        if !seen.insert(id) {
                            self.warn(
                                ErrorCode::DuplicateItemId,
                                format!("item id {id:?} appears more than once"),
                                &format!("{path}.id"),
                            );
                        }
                    }
                }
            }
            Some(_) => self.error(ErrorCode::InvalidFieldType, "items must be an array", "items"),
        }

        self.optional_signature(obj, "");
        self.unknown_fields(obj, FEED_FIELDS, "");
    }

    fn author(&mut self, raw: &Value, path: &str) {
        let Value::Object(obj) = raw else {
            self.error(ErrorCode::InvalidFieldType, "author must be an object", path);
            return;
        };
        self.required_str(obj, "name", path);
        if let Some(key) = self.required_str(obj, "public_key", path) {
            if !PUBLIC_KEY_RE.is_match(key) {
                self.error(
                    ErrorCode::InvalidPublicKey,
                    "public_key must be an ed25519:<base64> key of 32 bytes",
                    &join(path, "public_key"),
                );
            }
        }
        self.optional_uri(obj, "url", path);
        self.optional_uri(obj, "avatar", path);
    }

    fn item(&mut self, raw: &Value, path: &str, require_signature: bool) {
        let Value::Object(obj) = raw else {
            self.error(ErrorCode::InvalidFieldType, "item must be an object", path);
            return;
        };

        self.required_uri(obj, "id", path);
        self.required_uri(obj, "url", path);

        if let Some(uuid) = self.optional_str(obj, "uuid", path) {
            if uuid::Uuid::parse_str(uuid).is_err() {
                self.error(
                    ErrorCode::InvalidFieldType,
                    format!("uuid must be a valid UUID, got {uuid:?}"),
                    &join(path, "uuid"),
                );
            }
        }

        let mut has_content = false;
        for field in ["title", "content_text", "content_html", "content_markdown"] {
            if let Some(s) = self.optional_str(obj, field, path) {
                has_content |= !s.is_empty();
            }
        }
        if !has_content {
            self.error(
                ErrorCode::MissingContent,
                "item needs a title or at least one of content_text, content_html, content_markdown",
                path,
            );
        }
        self.optional_str(obj, "summary", path);

        let published = self
            .required_str(obj, "date_published", path)
            .and_then(|s| self.date(s, &join(path, "date_published")));
        let modified = self
            .optional_str(obj, "date_modified", path)
            .and_then(|s| self.date(s, &join(path, "date_modified")));
        if let (Some(p), Some(m)) = (published, modified) {
            if m < p {
                self.warn(
                    ErrorCode::DateOrder,
                    "date_modified is earlier than date_published",
                    &join(path, "date_modified"),
                );
            }
        }

        if let Some(author) = obj.get("author") {
            self.author(author, &join(path, "author"));
        }

        if let Some(tags) = obj.get("tags") {
            let ok = tags
                .as_array()
                .is_some_and(|t| t.iter().all(Value::is_string));
            if !ok {
                self.error(
                    ErrorCode::InvalidFieldType,
                    "tags must be an array of strings",
                    &join(path, "tags"),
                );
            }
        }

        self.optional_uri(obj, "in_reply_to", path);

        match obj.get("attachments") {
            None => {}
            Some(Value::Array(list)) => {
                for (j, a) in list.iter().enumerate() {
                    self.attachment(a, &format!("{path}.attachments[{j}]"));
                }
            }
            Some(_) => self.error(
                ErrorCode::InvalidFieldType,
                "attachments must be an array",
                &join(path, "attachments"),
            ),
        }

        if let Some(interactions) = obj.get("interactions") {
            self.interactions(interactions, &join(path, "interactions"));
        }

        if obj.contains_key("signature") {
            self.optional_signature(obj, path);
        } else if require_signature {
            self.warn(ErrorCode::SignatureMissing, "item is not signed", &join(path, "signature"));
        }

        self.unknown_fields(obj, ITEM_FIELDS, path);
    }

    fn attachment(&mut self, raw: &Value, path: &str) {
        let Value::Object(obj) = raw else {
            self.error(ErrorCode::InvalidFieldType, "attachment must be an object", path);
            return;
        };
        self.required_uri(obj, "url", path);
        if let Some(mime) = self.required_str(obj, "mime_type", path) {
            if !is_valid_mime_type(mime) {
                self.error(
                    ErrorCode::InvalidMimeType,
                    format!("mime_type {mime:?} does not match type/subtype"),
                    &join(path, "mime_type"),
                );
            }
        }
        for field in ["title", "alt_text", "blurhash"] {
            self.optional_str(obj, field, path);
        }
        for field in ["size_in_bytes", "width", "height"] {
            if let Some(n) = obj.get(field) {
                if !n.is_u64() {
                    self.error(
                        ErrorCode::InvalidNumber,
                        format!("{field} must be a non-negative integer"),
                        &join(path, field),
                    );
                }
            }
        }
        if let Some(d) = obj.get("duration_in_seconds") {
            if !d.as_f64().is_some_and(|d| d.is_finite() && d >= 0.0) {
                self.error(
                    ErrorCode::InvalidNumber,
                    "duration_in_seconds must be a non-negative number",
                    &join(path, "duration_in_seconds"),
                );
            }
        }
        if let Some(data) = self.optional_str(obj, "data_uri", path) {
            if !data.starts_with("data:") {
                self.error(
                    ErrorCode::InvalidUri,
                    "data_uri must use the data: scheme",
                    &join(path, "data_uri"),
                );
            }
        }
    }

    fn interactions(&mut self, raw: &Value, path: &str) {
        let Value::Object(obj) = raw else {
            self.error(ErrorCode::InvalidFieldType, "interactions must be an object", path);
            return;
        };
        for field in COUNTERS {
            if let Some(n) = obj.get(*field) {
                if !n.is_u64() {
                    self.error(
                        ErrorCode::InvalidCounter,
                        format!("{field} must be a non-negative integer, got {n}"),
                        &join(path, field),
                    );
                }
            }
        }
        for field in ENDPOINTS {
            self.optional_uri(obj, field, path);
        }
    }

    fn optional_signature(&mut self, obj: &Map<String, Value>, path: &str) {
        if let Some(sig) = self.optional_str(obj, "signature", path) {
            if !SIGNATURE_RE.is_match(sig) {
                self.error(
                    ErrorCode::InvalidSignatureFormat,
                    "signature must be <algorithm>:<base64>",
                    &join(path, "signature"),
                );
            }
        }
    }

    fn unknown_fields(&mut self, obj: &Map<String, Value>, known: &[&str], path: &str) {
        for key in obj.keys() {
            if known.contains(&key.as_str()) {
                continue;
            }
            let field = join(path, key);
            if is_extension_key(key) {
                if !EXTENSION_RE.is_match(key) {
                    self.warn(
                        ErrorCode::InvalidExtensionField,
                        format!("extension field {key:?} should match _[a-z0-9][a-z0-9_]*"),
                        &field,
                    );
                }
            } else {
                self.warn(ErrorCode::UnknownField, format!("unknown field {key:?}"), &field);
            }
        }
    }

    fn date(&mut self, s: &str, field: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        match chrono::DateTime::parse_from_rfc3339(s) {
            Ok(d) => Some(d),
            Err(_) => {
                self.error(
                    ErrorCode::InvalidDate,
                    format!("{s:?} is not an RFC 3339 timestamp"),
                    field,
                );
                None
            }
        }
    }

    fn required_str<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Option<&'a str> {
        let field = join(path, key);
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.error(ErrorCode::MissingRequiredField, format!("{key} is required"), &field);
                None
            }
            Some(Value::String(s)) if s.is_empty() => {
                self.error(
                    ErrorCode::MissingRequiredField,
                    format!("{key} must not be empty"),
                    &field,
                );
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.error(ErrorCode::InvalidFieldType, format!("{key} must be a string"), &field);
                None
            }
        }
    }

    fn optional_str<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Option<&'a str> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.error(
                    ErrorCode::InvalidFieldType,
                    format!("{key} must be a string"),
                    &join(path, key),
                );
                None
            }
        }
    }

    fn required_uri(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(s) = self.required_str(obj, key, path) {
            self.uri(s, &join(path, key));
        }
    }

    fn optional_uri(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(s) = self.optional_str(obj, key, path) {
            self.uri(s, &join(path, key));
        }
    }

    fn uri(&mut self, s: &str, field: &str) {
        if !is_valid_uri(s) {
            self.error(ErrorCode::InvalidUri, format!("{s:?} is not a valid URI"), field);
        }
    }
}

// --- helpers -----------------------------------------------------------------

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// `scheme:rest` with no whitespace.
static URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S+$").expect("invalid URI regex")
});

static HTTP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)https?://[^\s/?#@]+(?:[/?#]\S*)?$").expect("invalid HTTP regex")
});

/// RFC 6838 restricted-name on both sides, optional parameters.
static MIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+\-]{0,126}/[A-Za-z0-9][A-Za-z0-9!#$&^_.+\-]{0,126}(?:\s*;.*)?$",
    )
    .expect("invalid MIME regex")
});

static LANGUAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{2,3}(?:-[A-Za-z0-9]{2,8})*$").expect("invalid language regex")
});

/// 32 bytes of standard base64 is 43 significant characters plus one `=`.
static PUBLIC_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ed25519:[A-Za-z0-9+/]{42}[AEIMQUYcgkosw048]=$").expect("invalid key regex")
});

static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9\-]*:[A-Za-z0-9+/]+={0,2}$").expect("invalid signature regex")
});

static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^_[a-z0-9][a-z0-9_]*$").expect("invalid extension regex")
});

// --- tests -------------------------------------------------------------------
