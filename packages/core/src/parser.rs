//! Resilient parsing of untrusted documents.
//!
//! Input moves through four stages: decode → validate → construct → verify.
//! Only a decode failure, or any failure at all in strict mode, prevents a
//! document from being returned. Everything else is accumulated in the
//! [`Report`] next to a best-effort result, and a result built by the
//! degradation path is tagged [`ParseOutcome::Degraded`] so callers cannot
//! mistake it for a faithful reconstruction.

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::canonical::{canonicalize_value, CanonicalMode, SIGNATURE_FIELD};
use crate::keys::parse_public_key;
use crate::report::{ErrorCode, Report, ReportEntry};
use crate::signing::verify_signature;
use crate::types::{
    is_extension_key, Attachment, Author, Document, Extensions, Interactions, Item,
};
use crate::validation::validate_document;
use crate::version::ProtocolVersion;

/// Items kept when a document has to be rebuilt by the degradation path.
pub const DEFAULT_DEGRADED_ITEM_LIMIT: usize = 100;

/// Name given to the stand-in author of a degraded document.
pub const PLACEHOLDER_AUTHOR: &str = "Unknown author";

/// Title given to a degraded document that has none.
pub const PLACEHOLDER_TITLE: &str = "Untitled feed";

/// Caller-controlled parsing behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Verify the document signature and every item signature.
    pub verify_signatures: bool,
    /// Copy `_`-prefixed extension fields into the typed document.
    pub preserve_extensions: bool,
    /// Abort on the first validation, construction or signature failure.
    pub strict_mode: bool,
    /// Upper bound on items rebuilt by the degradation path.
    pub degraded_item_limit: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            verify_signatures: false,
            preserve_extensions: false,
            strict_mode: false,
            degraded_item_limit: DEFAULT_DEGRADED_ITEM_LIMIT,
        }
    }
}

impl ParseOptions {
    pub fn verified() -> Self {
        Self {
            verify_signatures: true,
            ..Self::default()
        }
    }

    pub fn strict() -> Self {
        Self {
            verify_signatures: true,
            strict_mode: true,
            ..Self::default()
        }
    }
}

/// Result of checking one signature.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Valid,
    Invalid,
    Missing,
    /// The signature string, the signer's key or the signed object could not be decoded.
    Malformed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemSignature {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: SignatureStatus,
}

/// Per-object signature outcomes, ordered by item index.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SignatureReport {
    /// `false` when verification was not requested.
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<SignatureStatus>,
    pub items: Vec<ItemSignature>,
    /// Every signature present and valid. Always `false` when unchecked.
    pub all_valid: bool,
}

/// One best-effort substitution made while rebuilding a document.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// A required field was missing or unusable and a default was put in place.
    Defaulted { field: String },
    /// The author could not be read; a placeholder without a key was used.
    PlaceholderAuthor,
    /// Only the first `kept` of `original` items were considered.
    ItemsTruncated { original: usize, kept: usize },
    /// The item at `index` could not be constructed and was left out.
    ItemDropped { index: usize, reason: String },
    /// An optional value had a type the typed model cannot carry and was left out.
    FieldDropped { field: String },
}

/// What a parse produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Every value of the input that the typed model names was carried over.
    Ok(Document),
    /// A partial reconstruction. Not trustworthy for republication.
    Degraded {
        feed: Document,
        degradations: Vec<Degradation>,
    },
    /// Nothing usable; see the report.
    Fatal,
}

/// Outcome plus the full report, present even on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub outcome: ParseOutcome,
    pub report: Report,
    pub signatures: SignatureReport,
}

impl ParseResult {
    fn fatal(report: Report) -> Self {
        Self {
            outcome: ParseOutcome::Fatal,
            report,
            signatures: SignatureReport::default(),
        }
    }

    /// A feed was returned (possibly degraded).
    pub fn success(&self) -> bool {
        !matches!(self.outcome, ParseOutcome::Fatal)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.outcome, ParseOutcome::Degraded { .. })
    }

    pub fn feed(&self) -> Option<&Document> {
        match &self.outcome {
            ParseOutcome::Ok(feed) | ParseOutcome::Degraded { feed, .. } => Some(feed),
            ParseOutcome::Fatal => None,
        }
    }

    pub fn into_feed(self) -> Option<Document> {
        match self.outcome {
            ParseOutcome::Ok(feed) | ParseOutcome::Degraded { feed, .. } => Some(feed),
            ParseOutcome::Fatal => None,
        }
    }

    pub fn degradations(&self) -> &[Degradation] {
        match &self.outcome {
            ParseOutcome::Degraded { degradations, .. } => degradations,
            _ => &[],
        }
    }

    pub fn errors(&self) -> &[ReportEntry] {
        &self.report.errors
    }

    pub fn warnings(&self) -> &[ReportEntry] {
        &self.report.warnings
    }
}

/// Why the typed document could not be built field-by-field.
#[derive(Debug, Error, PartialEq)]
pub enum ConstructError {
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("{field}: {reason}")]
    Field { field: String, reason: String },
}

impl ConstructError {
    fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConstructError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Parses untrusted documents according to a fixed set of [`ParseOptions`].
#[derive(Debug, Clone, Default)]
pub struct Parser {
    options: ParseOptions,
}

impl Parser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Decode a JSON string and parse it.
    pub fn parse_str(&self, input: &str) -> ParseResult {
        debug!(bytes = input.len(), "decoding document");
        if input.trim().is_empty() {
            return ParseResult::fatal(fatal_report(ReportEntry::new(
                ErrorCode::EmptyDocument,
                "input is empty",
            )));
        }
        match serde_json::from_str::<Value>(input) {
            Ok(raw) => self.parse_value(raw),
            Err(e) => ParseResult::fatal(fatal_report(
                ReportEntry::new(ErrorCode::InvalidJson, format!("invalid JSON: {e}"))
                    .with_details(json!({ "line": e.line(), "column": e.column() })),
            )),
        }
    }

    /// Parse an already-typed document, e.g. one fresh from the generator.
    pub fn parse_document(&self, doc: &Document) -> ParseResult {
        match serde_json::to_value(doc) {
            Ok(raw) => self.parse_value(raw),
            Err(e) => ParseResult::fatal(fatal_report(ReportEntry::new(
                ErrorCode::InvalidJson,
                format!("document could not be serialised: {e}"),
            ))),
        }
    }

    /// Parse an already-decoded JSON value.
    pub fn parse_value(&self, raw: Value) -> ParseResult {
        let opts = &self.options;

        match &raw {
            Value::Null => {
                return ParseResult::fatal(fatal_report(ReportEntry::new(
                    ErrorCode::EmptyDocument,
                    "document is null",
                )))
            }
            Value::Object(obj) if obj.is_empty() => {
                return ParseResult::fatal(fatal_report(ReportEntry::new(
                    ErrorCode::EmptyDocument,
                    "document has no fields",
                )))
            }
            Value::Object(_) => {}
            _ => {
                return ParseResult::fatal(fatal_report(ReportEntry::new(
                    ErrorCode::InvalidJson,
                    "document root must be a JSON object",
                )))
            }
        }

        // validate
        let mut report = Report::new();
        let mut validation = validate_document(&raw).into_report();
        debug!(
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            "validated document"
        );
        if validation.has_errors() {
            if opts.strict_mode {
                for e in &mut validation.errors {
                    e.recoverable = false;
                }
                report.merge(validation);
                return ParseResult::fatal(report);
            }
            validation.demote_errors();
        }
        if opts.verify_signatures {
            // the verify stage reports every missing signature itself
            validation.warnings.retain(|w| w.code != ErrorCode::SignatureMissing);
        }
        report.merge(validation);

        // construct
        let mut builder = Builder::new(opts.preserve_extensions);
        let built = builder.document(&raw);
        let outcome = match built {
            Ok(feed) if builder.dropped.is_empty() => ParseOutcome::Ok(feed),
            Err(e) if opts.strict_mode => {
                report.error(
                    ReportEntry::new(ErrorCode::ConstructionFailed, e.to_string()).fatal(),
                );
                return ParseResult::fatal(report);
            }
            Ok(_) if opts.strict_mode => {
                report.error(
                    ReportEntry::new(
                        ErrorCode::ConstructionFailed,
                        format!("values could not be represented: {}", builder.dropped.join(", ")),
                    )
                    .fatal(),
                );
                return ParseResult::fatal(report);
            }
            Ok(feed) => {
                let degradations: Vec<Degradation> = builder
                    .dropped
                    .into_iter()
                    .map(|field| Degradation::FieldDropped { field })
                    .collect();
                warn!(dropped = degradations.len(), "document degraded");
                degraded_warning(
                    &mut report,
                    format!("{} value(s) could not be represented and were left out", degradations.len()),
                    &degradations,
                );
                ParseOutcome::Degraded { feed, degradations }
            }
            Err(e) => {
                let (feed, degradations) =
                    degrade(&raw, opts.preserve_extensions, opts.degraded_item_limit);
                warn!(error = %e, degradations = degradations.len(), "document degraded");
                degraded_warning(
                    &mut report,
                    format!("document rebuilt from partial data: {e}"),
                    &degradations,
                );
                ParseOutcome::Degraded { feed, degradations }
            }
        };

        // verify
        let signatures = if opts.verify_signatures {
            verify_raw(&raw, opts.strict_mode, &mut report)
        } else {
            SignatureReport::default()
        };
        if opts.strict_mode && opts.verify_signatures && !signatures.all_valid {
            return ParseResult {
                outcome: ParseOutcome::Fatal,
                report,
                signatures,
            };
        }

        ParseResult {
            outcome,
            report,
            signatures,
        }
    }
}

fn degraded_warning(report: &mut Report, message: String, degradations: &[Degradation]) {
    let details = serde_json::to_value(degradations).unwrap_or(Value::Null);
    report.warning(ReportEntry::new(ErrorCode::GracefulDegradation, message).with_details(details));
}

fn fatal_report(entry: ReportEntry) -> Report {
    let mut report = Report::new();
    report.error(entry.fatal());
    report
}

// --- signature verification --------------------------------------------------

/// Verify the feed and item signatures over the raw value, so that fields
/// the typed model drops are still covered.
fn verify_raw(raw: &Value, strict: bool, report: &mut Report) -> SignatureReport {
    let feed_key = raw
        .get("author")
        .and_then(|a| a.get("public_key"))
        .and_then(Value::as_str);

    let feed = check_one(raw, CanonicalMode::Feed, feed_key, "", strict, report);

    let items: Vec<ItemSignature> = raw
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let key = item
                        .get("author")
                        .and_then(|a| a.get("public_key"))
                        .and_then(Value::as_str)
                        .or(feed_key);
                    let status = check_one(
                        item,
                        CanonicalMode::Item,
                        key,
                        &format!("items[{index}]"),
                        strict,
                        report,
                    );
                    ItemSignature {
                        index,
                        id: item.get("id").and_then(Value::as_str).map(str::to_string),
                        status,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let all_valid = feed == SignatureStatus::Valid
        && items.iter().all(|i| i.status == SignatureStatus::Valid);
    debug!(items = items.len(), all_valid, "verified signatures");

    SignatureReport {
        checked: true,
        feed: Some(feed),
        items,
        all_valid,
    }
}

fn check_one(
    target: &Value,
    mode: CanonicalMode,
    public_key: Option<&str>,
    path: &str,
    strict: bool,
    report: &mut Report,
) -> SignatureStatus {
    let field = if path.is_empty() {
        SIGNATURE_FIELD.to_string()
    } else {
        format!("{path}.{SIGNATURE_FIELD}")
    };
    let what = if path.is_empty() { "document" } else { path };

    let signature = match target.get(SIGNATURE_FIELD) {
        None | Some(Value::Null) => {
            let entry = ReportEntry::new(ErrorCode::SignatureMissing, format!("{what} is not signed"))
                .at(&field);
            if strict {
                report.error(entry.fatal());
            } else {
                report.warning(entry);
            }
            return SignatureStatus::Missing;
        }
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            push_failure(
                report,
                ReportEntry::new(ErrorCode::InvalidSignatureFormat, "signature must be a string")
                    .at(&field),
                strict,
            );
            return SignatureStatus::Malformed;
        }
    };

    let Some(public_key) = public_key else {
        push_failure(
            report,
            ReportEntry::new(ErrorCode::InvalidPublicKey, format!("no public key to verify {what}"))
                .at(&field),
            strict,
        );
        return SignatureStatus::Malformed;
    };
    if let Err(e) = parse_public_key(public_key) {
        push_failure(
            report,
            ReportEntry::new(ErrorCode::InvalidPublicKey, e.to_string()).at(&field),
            strict,
        );
        return SignatureStatus::Malformed;
    }

    let payload = match canonicalize_value(target, mode) {
        Ok(p) => p,
        Err(e) => {
            push_failure(
                report,
                ReportEntry::new(ErrorCode::SignatureInvalid, e.to_string()).at(&field),
                strict,
            );
            return SignatureStatus::Malformed;
        }
    };

    match verify_signature(&payload, signature, public_key) {
        Ok(true) => SignatureStatus::Valid,
        Ok(false) | Err(_) => {
            warn!(field = %field, "signature verification failed");
            push_failure(
                report,
                ReportEntry::new(
                    ErrorCode::SignatureInvalid,
                    format!("signature on {what} does not verify"),
                )
                .at(&field),
                strict,
            );
            SignatureStatus::Invalid
        }
    }
}

fn push_failure(report: &mut Report, entry: ReportEntry, strict: bool) {
    report.error(if strict { entry.fatal() } else { entry });
}

// --- typed construction ------------------------------------------------------

/// Builds the typed document field by field.
///
/// Required fields must be present with the right JSON type, otherwise the
/// whole object fails. Optional values of the wrong type cannot be carried by
/// the typed model; they are left out and their paths collected in `dropped`.
/// Explicit `null`s read as absent. Unknown non-extension fields are never
/// copied.
struct Builder {
    preserve_extensions: bool,
    dropped: Vec<String>,
}

impl Builder {
    fn new(preserve_extensions: bool) -> Self {
        Self {
            preserve_extensions,
            dropped: Vec::new(),
        }
    }

    fn document(&mut self, raw: &Value) -> Result<Document, ConstructError> {
        let obj = raw.as_object().ok_or(ConstructError::NotAnObject)?;

        let author = obj
            .get("author")
            .ok_or_else(|| ConstructError::field("author", "missing"))
            .and_then(|a| self.author(a, "author"))?;

        let items = match obj.get("items") {
            Some(Value::Array(list)) => list
                .iter()
                .enumerate()
                .map(|(i, item)| self.item(item, &format!("items[{i}]")))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ConstructError::field("items", "must be an array")),
            None => return Err(ConstructError::field("items", "missing")),
        };

        Ok(Document {
            version: req_str(obj, "version", "")?,
            title: req_str(obj, "title", "")?,
            home_page_url: req_str(obj, "home_page_url", "")?,
            feed_url: req_str(obj, "feed_url", "")?,
            description: self.opt_str(obj, "description", ""),
            icon: self.opt_str(obj, "icon", ""),
            language: self.opt_str(obj, "language", ""),
            expired: self.opt(obj, "expired", "", Value::as_bool),
            author,
            items,
            signature: self.opt_str(obj, "signature", ""),
            extensions: self.extensions(obj),
        })
    }

    fn author(&mut self, raw: &Value, path: &str) -> Result<Author, ConstructError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ConstructError::field(path, "must be an object"))?;
        Ok(Author {
            name: req_str(obj, "name", path)?,
            public_key: req_str(obj, "public_key", path)?,
            url: self.opt_str(obj, "url", path),
            avatar: self.opt_str(obj, "avatar", path),
            extensions: self.extensions(obj),
        })
    }

    fn item(&mut self, raw: &Value, path: &str) -> Result<Item, ConstructError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ConstructError::field(path, "must be an object"))?;

        let author = match obj.get("author") {
            Some(a) => Some(self.author(a, &join(path, "author"))?),
            None => None,
        };

        let tags = self.list(obj, "tags", path, |b, tag, at| {
            let tag = tag.as_str().map(str::to_string);
            if tag.is_none() {
                b.dropped.push(at.to_string());
            }
            tag
        });

        let attachments = self.list(obj, "attachments", path, |b, a, at| match a.as_object() {
            Some(a) => b.attachment(a, at),
            None => {
                b.dropped.push(at.to_string());
                None
            }
        });

        let interactions = match obj.get("interactions") {
            None | Some(Value::Null) => None,
            Some(Value::Object(i)) => Some(self.interactions(i, &join(path, "interactions"))),
            Some(_) => {
                self.dropped.push(join(path, "interactions"));
                None
            }
        };

        Ok(Item {
            id: req_str(obj, "id", path)?,
            url: req_str(obj, "url", path)?,
            uuid: self.opt_str(obj, "uuid", path),
            title: self.opt_str(obj, "title", path),
            content_text: self.opt_str(obj, "content_text", path),
            content_html: self.opt_str(obj, "content_html", path),
            content_markdown: self.opt_str(obj, "content_markdown", path),
            summary: self.opt_str(obj, "summary", path),
            date_published: req_str(obj, "date_published", path)?,
            date_modified: self.opt_str(obj, "date_modified", path),
            author,
            tags,
            in_reply_to: self.opt_str(obj, "in_reply_to", path),
            attachments,
            interactions,
            signature: self.opt_str(obj, "signature", path),
            extensions: self.extensions(obj),
        })
    }

    /// Attachments missing their url or MIME type are left out whole.
    fn attachment(&mut self, obj: &Map<String, Value>, path: &str) -> Option<Attachment> {
        let (Some(Value::String(url)), Some(Value::String(mime_type))) =
            (obj.get("url"), obj.get("mime_type"))
        else {
            self.dropped.push(path.to_string());
            return None;
        };
        Some(Attachment {
            url: url.clone(),
            mime_type: mime_type.clone(),
            title: self.opt_str(obj, "title", path),
            size_in_bytes: self.opt(obj, "size_in_bytes", path, Value::as_u64),
            width: self.opt(obj, "width", path, Value::as_u64),
            height: self.opt(obj, "height", path, Value::as_u64),
            duration_in_seconds: self.opt(obj, "duration_in_seconds", path, Value::as_f64),
            alt_text: self.opt_str(obj, "alt_text", path),
            blurhash: self.opt_str(obj, "blurhash", path),
            data_uri: self.opt_str(obj, "data_uri", path),
        })
    }

    /// Counters that are not non-negative integers are left out, never zeroed.
    fn interactions(&mut self, obj: &Map<String, Value>, path: &str) -> Interactions {
        Interactions {
            replies_count: self.opt(obj, "replies_count", path, Value::as_u64),
            likes_count: self.opt(obj, "likes_count", path, Value::as_u64),
            shares_count: self.opt(obj, "shares_count", path, Value::as_u64),
            replies_url: self.opt_str(obj, "replies_url", path),
            likes_url: self.opt_str(obj, "likes_url", path),
            shares_url: self.opt_str(obj, "shares_url", path),
        }
    }

    /// An optional array whose unusable elements are skipped one by one.
    fn list<T>(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        path: &str,
        mut element: impl FnMut(&mut Self, &Value, &str) -> Option<T>,
    ) -> Option<Vec<T>> {
        let field = join(path, key);
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Array(list)) => {
                let mut kept = Vec::with_capacity(list.len());
                for (j, v) in list.iter().enumerate() {
                    if let Some(x) = element(self, v, &format!("{field}[{j}]")) {
                        kept.push(x);
                    }
                }
                Some(kept)
            }
            Some(_) => {
                self.dropped.push(field);
                None
            }
        }
    }

    fn opt<T>(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        path: &str,
        read: impl Fn(&Value) -> Option<T>,
    ) -> Option<T> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => {
                let value = read(v);
                if value.is_none() {
                    self.dropped.push(join(path, key));
                }
                value
            }
        }
    }

    fn opt_str(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> Option<String> {
        self.opt(obj, key, path, |v| v.as_str().map(str::to_string))
    }

    fn extensions(&self, obj: &Map<String, Value>) -> Extensions {
        if !self.preserve_extensions {
            return Extensions::new();
        }
        obj.iter()
            .filter(|(k, _)| is_extension_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Rebuild whatever can be salvaged from a document whose typed
/// construction failed. Never fails; every substitution is recorded.
fn degrade(raw: &Value, preserve_extensions: bool, limit: usize) -> (Document, Vec<Degradation>) {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let mut builder = Builder::new(preserve_extensions);
    let mut degradations = Vec::new();

    let mut defaulted = |field: &str, value: Option<String>, fallback: String| {
        value.filter(|s| !s.is_empty()).unwrap_or_else(|| {
            degradations.push(Degradation::Defaulted {
                field: field.to_string(),
            });
            fallback
        })
    };

    let version = defaulted(
        "version",
        str_of(obj, "version").filter(|v| ProtocolVersion::parse(v).is_ok()),
        ProtocolVersion::CURRENT.to_uri(),
    );
    let title = defaulted("title", str_of(obj, "title"), PLACEHOLDER_TITLE.to_string());
    let home_page_url = defaulted("home_page_url", str_of(obj, "home_page_url"), String::new());
    let feed_url = defaulted("feed_url", str_of(obj, "feed_url"), String::new());

    let author = match obj.get("author").map(|a| builder.author(a, "author")) {
        Some(Ok(author)) => author,
        _ => {
            degradations.push(Degradation::PlaceholderAuthor);
            Author::new(PLACEHOLDER_AUTHOR, "")
        }
    };

    let mut items = Vec::new();
    match obj.get("items") {
        Some(Value::Array(list)) => {
            if list.len() > limit {
                degradations.push(Degradation::ItemsTruncated {
                    original: list.len(),
                    kept: limit,
                });
            }
            for (index, raw_item) in list.iter().take(limit).enumerate() {
                let mark = builder.dropped.len();
                match builder.item(raw_item, &format!("items[{index}]")) {
                    Ok(item) => items.push(item),
                    Err(e) => {
                        builder.dropped.truncate(mark);
                        degradations.push(Degradation::ItemDropped {
                            index,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        _ => degradations.push(Degradation::Defaulted {
            field: "items".into(),
        }),
    }

    let feed = Document {
        version,
        title,
        home_page_url,
        feed_url,
        description: builder.opt_str(obj, "description", ""),
        icon: builder.opt_str(obj, "icon", ""),
        language: builder.opt_str(obj, "language", ""),
        expired: builder.opt(obj, "expired", "", Value::as_bool),
        author,
        items,
        signature: builder.opt_str(obj, "signature", ""),
        extensions: builder.extensions(obj),
    };
    degradations.extend(
        builder
            .dropped
            .into_iter()
            .map(|field| Degradation::FieldDropped { field }),
    );
    (feed, degradations)
}

fn req_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, ConstructError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ConstructError::field(join(path, key), "must be a string")),
        None => Err(ConstructError::field(join(path, key), "missing")),
    }
}

fn str_of(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use crate::signing::{sign_document, sign_item};
    use serde_json::json;

    fn signed_doc(kp: &KeyPair, n: usize) -> Document {
        let mut doc = Document::new(
            "T",
            "https://e.com",
            "https://e.com/f.ansybl",
            Author::new("A", kp.public_key()),
        );
        let alg = ProtocolVersion::CURRENT.signature_algorithm();
        for i in 0..n {
            let mut item = Item::new(
                format!("https://e.com/{i}"),
                format!("https://e.com/{i}"),
                "2026-01-01T00:00:00Z",
            );
            item.content_text = Some(format!("post {i}"));
            doc.items.push(sign_item(&item, kp.signing_key(), alg).unwrap());
        }
        sign_document(&doc, kp.signing_key(), alg).unwrap()
    }

    #[test]
    fn empty_input_is_fatal() {
        let r = Parser::default().parse_str("   ");
        assert!(!r.success());
        assert_eq!(r.errors()[0].code, ErrorCode::EmptyDocument);
        assert!(!r.errors()[0].recoverable);
    }

    #[test]
    fn empty_object_is_fatal() {
        let r = Parser::default().parse_str("{}");
        assert_eq!(r.errors()[0].code, ErrorCode::EmptyDocument);
    }

    #[test]
    fn invalid_json_is_fatal_with_position() {
        let r = Parser::default().parse_str("{\"title\": ");
        assert!(!r.success());
        assert_eq!(r.errors().len(), 1);
        assert_eq!(r.errors()[0].code, ErrorCode::InvalidJson);
        assert!(r.errors()[0].details.is_some());
    }

    #[test]
    fn non_object_root_is_fatal() {
        let r = Parser::default().parse_str("[1,2,3]");
        assert_eq!(r.errors()[0].code, ErrorCode::InvalidJson);
        assert!(r.feed().is_none());
    }

    #[test]
    fn valid_signed_document_parses_cleanly() {
        let kp = KeyPair::generate();
        let doc = signed_doc(&kp, 3);
        let r = Parser::new(ParseOptions::verified()).parse_document(&doc);
        assert!(r.success());
        assert!(r.report.is_clean(), "{:?}", r.report);
        assert!(r.signatures.all_valid);
        assert_eq!(r.signatures.items.len(), 3);
        assert_eq!(r.feed(), Some(&doc));
    }

    #[test]
    fn tampered_item_is_reported_but_not_fatal() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 2)).unwrap();
        raw["items"][1]["content_text"] = json!("tampered");
        let r = Parser::new(ParseOptions::verified()).parse_value(raw);
        assert!(r.success());
        assert!(!r.signatures.all_valid);
        assert_eq!(r.signatures.items[0].status, SignatureStatus::Valid);
        assert_eq!(r.signatures.items[1].status, SignatureStatus::Invalid);
        // The feed signature covers the items, so it fails too.
        assert_eq!(r.signatures.feed, Some(SignatureStatus::Invalid));
        assert_eq!(
            r.errors()
                .iter()
                .filter(|e| e.code == ErrorCode::SignatureInvalid)
                .count(),
            2
        );
    }

    #[test]
    fn tampered_item_is_fatal_in_strict_mode() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 2)).unwrap();
        raw["items"][0]["content_text"] = json!("tampered");
        let r = Parser::new(ParseOptions::strict()).parse_value(raw);
        assert!(!r.success());
        assert!(r.feed().is_none());
        assert!(r.errors().iter().all(|e| !e.recoverable));
    }

    #[test]
    fn extensions_are_kept_only_on_request() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 1)).unwrap();
        raw["_org_example_theme"] = json!("dark");
        raw["items"][0]["_org_example_mood"] = json!("calm");

        let dropped = Parser::default().parse_value(raw.clone()).into_feed().unwrap();
        assert!(dropped.extensions.is_empty());
        assert!(dropped.items[0].extensions.is_empty());

        let opts = ParseOptions {
            preserve_extensions: true,
            ..ParseOptions::default()
        };
        let kept = Parser::new(opts).parse_value(raw).into_feed().unwrap();
        assert_eq!(kept.extensions["_org_example_theme"], json!("dark"));
        assert_eq!(kept.items[0].extensions["_org_example_mood"], json!("calm"));
    }

    #[test]
    fn signed_extensions_are_verified_even_when_dropped() {
        let kp = KeyPair::generate();
        let mut doc = signed_doc(&kp, 1);
        doc.extensions.insert("_org_example_theme".into(), json!("dark"));
        let doc = sign_document(&doc, kp.signing_key(), ProtocolVersion::CURRENT.signature_algorithm())
            .unwrap();
        let r = Parser::new(ParseOptions::verified()).parse_document(&doc);
        assert!(r.signatures.all_valid);
        assert!(r.feed().unwrap().extensions.is_empty());
    }

    #[test]
    fn missing_author_degrades_with_placeholder() {
        let raw = json!({
            "version": "https://ansybl.org/version/1.0",
            "title": "T",
            "home_page_url": "https://e.com",
            "feed_url": "https://e.com/f.ansybl",
            "items": [
                { "id": "https://e.com/1", "url": "https://e.com/1",
                  "content_text": "hi", "date_published": "2026-01-01T00:00:00Z" },
                "not an item"
            ]
        });
        let r = Parser::default().parse_value(raw);
        assert!(r.success());
        assert!(r.is_degraded());
        let feed = r.feed().unwrap();
        assert_eq!(feed.author.name, PLACEHOLDER_AUTHOR);
        assert_eq!(feed.items.len(), 1);
        assert!(r.degradations().contains(&Degradation::PlaceholderAuthor));
        assert!(r
            .degradations()
            .iter()
            .any(|d| matches!(d, Degradation::ItemDropped { index: 1, .. })));
        assert!(r.report.has_code(ErrorCode::GracefulDegradation));
    }

    #[test]
    fn degradation_caps_item_count() {
        let items: Vec<Value> = (0..25)
            .map(|i| {
                json!({ "id": format!("https://e.com/{i}"), "url": format!("https://e.com/{i}"),
                        "content_text": "x", "date_published": "2026-01-01T00:00:00Z" })
            })
            .collect();
        let raw = json!({ "title": "T", "items": items });
        let opts = ParseOptions {
            degraded_item_limit: 10,
            ..ParseOptions::default()
        };
        let r = Parser::new(opts).parse_value(raw);
        assert_eq!(r.feed().unwrap().items.len(), 10);
        assert!(r.degradations().contains(&Degradation::ItemsTruncated {
            original: 25,
            kept: 10
        }));
        assert!(r.degradations().contains(&Degradation::Defaulted {
            field: "version".into()
        }));
    }

    #[test]
    fn construction_failure_is_fatal_in_strict_mode_without_verification() {
        let raw = json!({ "title": "T", "items": [] });
        let opts = ParseOptions {
            strict_mode: true,
            ..ParseOptions::default()
        };
        let r = Parser::new(opts).parse_value(raw);
        assert!(!r.success());
        assert!(r.report.has_code(ErrorCode::MissingRequiredField));
    }

    #[test]
    fn missing_signatures_are_warnings_when_lenient() {
        let kp = KeyPair::generate();
        let mut doc = signed_doc(&kp, 1);
        doc.signature = None;
        let r = Parser::new(ParseOptions::verified()).parse_document(&doc);
        assert!(r.success());
        assert!(!r.signatures.all_valid);
        assert_eq!(r.signatures.feed, Some(SignatureStatus::Missing));
        assert!(r.errors().is_empty());
        assert_eq!(r.warnings()[0].code, ErrorCode::SignatureMissing);
    }

    #[test]
    fn item_author_key_overrides_feed_key() {
        let feed_kp = KeyPair::generate();
        let guest = KeyPair::generate();
        let mut doc = signed_doc(&feed_kp, 0);
        let mut item = Item::new("https://e.com/g", "https://e.com/g", "2026-01-01T00:00:00Z");
        item.content_text = Some("guest post".into());
        item.author = Some(Author::new("Guest", guest.public_key()));
        let alg = ProtocolVersion::CURRENT.signature_algorithm();
        doc.items.push(sign_item(&item, guest.signing_key(), alg).unwrap());
        let doc = sign_document(&doc, feed_kp.signing_key(), alg).unwrap();

        let r = Parser::new(ParseOptions::verified()).parse_document(&doc);
        assert!(r.signatures.all_valid, "{:?}", r.report);
    }

    /// Sign the raw item and document values directly, so the signed bytes
    /// are exactly what the author wrote.
    fn sign_raw(kp: &KeyPair, raw: &mut Value) {
        for item in raw["items"].as_array_mut().unwrap() {
            let payload = canonicalize_value(item, CanonicalMode::Item).unwrap();
            item["signature"] = json!(crate::signing::sign_content(&payload, kp.signing_key()));
        }
        let payload = canonicalize_value(raw, CanonicalMode::Feed).unwrap();
        raw["signature"] = json!(crate::signing::sign_content(&payload, kp.signing_key()));
    }

    #[test]
    fn typed_result_keeps_the_signed_bytes() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 1)).unwrap();
        raw["items"][0]["interactions"] = json!({ "replies_url": "https://e.com/0/replies" });
        raw["items"][0]["attachments"] = json!([{
            "url": "https://e.com/pano.jpg",
            "mime_type": "image/jpeg",
            "width": 5_000_000_000u64
        }]);
        sign_raw(&kp, &mut raw);

        let first = Parser::new(ParseOptions::verified()).parse_value(raw.clone());
        assert!(first.signatures.all_valid, "{:?}", first.report);
        assert!(matches!(first.outcome, ParseOutcome::Ok(_)));
        let typed = first.into_feed().unwrap();
        assert_eq!(serde_json::to_value(&typed).unwrap(), raw);

        let again = Parser::new(ParseOptions::verified()).parse_document(&typed);
        assert!(again.signatures.all_valid, "{:?}", again.report);
        assert!(crate::signing::verify_item(&typed.items[0], &kp.public_key()).unwrap());
    }

    #[test]
    fn unsigned_item_is_reported_once_when_verifying() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 1)).unwrap();
        raw["items"][0].as_object_mut().unwrap().remove("signature");

        let r = Parser::new(ParseOptions::verified()).parse_value(raw.clone());
        let missing: Vec<_> = r
            .warnings()
            .iter()
            .filter(|w| w.code == ErrorCode::SignatureMissing)
            .map(|w| w.field.as_deref())
            .collect();
        assert_eq!(missing, [Some("items[0].signature")]);
        assert_eq!(r.signatures.items[0].status, SignatureStatus::Missing);

        // Without verification the validator is the only one to mention it.
        let r = Parser::default().parse_value(raw);
        assert_eq!(
            r.warnings().iter().filter(|w| w.code == ErrorCode::SignatureMissing).count(),
            1
        );
    }

    #[test]
    fn filtered_values_mark_the_result_degraded() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 1)).unwrap();
        raw["items"][0]["tags"] = json!(["rust", 3]);
        raw["items"][0]["interactions"] = json!({ "likes_count": -1 });

        let r = Parser::default().parse_value(raw.clone());
        assert!(r.success());
        assert!(r.is_degraded());
        assert_eq!(
            r.degradations(),
            [
                Degradation::FieldDropped { field: "items[0].tags[1]".into() },
                Degradation::FieldDropped { field: "items[0].interactions.likes_count".into() },
            ]
        );
        let item = &r.feed().unwrap().items[0];
        assert_eq!(item.tags.as_deref(), Some(&["rust".to_string()][..]));
        assert_eq!(item.interactions.as_ref().unwrap().likes_count, None);
        assert!(r.report.has_code(ErrorCode::GracefulDegradation));

        let strict = Parser::new(ParseOptions {
            strict_mode: true,
            ..ParseOptions::default()
        })
        .parse_value(raw);
        assert!(!strict.success());
    }

    #[test]
    fn explicit_nulls_read_as_absent() {
        let kp = KeyPair::generate();
        let mut raw = serde_json::to_value(signed_doc(&kp, 1)).unwrap();
        raw["description"] = Value::Null;
        let r = Parser::default().parse_value(raw);
        assert!(matches!(r.outcome, ParseOutcome::Ok(_)));
        assert_eq!(r.feed().unwrap().description, None);
    }

    #[test]
    fn unchecked_signature_report_is_not_all_valid() {
        let kp = KeyPair::generate();
        let r = Parser::default().parse_document(&signed_doc(&kp, 1));
        assert!(!r.signatures.checked);
        assert!(!r.signatures.all_valid);
    }
}
