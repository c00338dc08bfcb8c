//! Structured error reporting shared by the validator, parser and migrator.
//!
//! Untrusted input never produces a Rust `Err` from those layers. Instead
//! every fault becomes a [`ReportEntry`] with a stable [`ErrorCode`], and the
//! entries are collected into a [`Report`] split into blocking errors and
//! non-blocking warnings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad class of a fault.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Malformed JSON, empty input.
    Parse,
    /// Schema violations.
    Validation,
    /// Verification failures, malformed keys or signature strings.
    Signature,
    /// Missing migration path, transformation or step failures.
    Migration,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Parse => "PARSE",
            Category::Validation => "VALIDATION",
            Category::Signature => "SIGNATURE",
            Category::Migration => "MIGRATION",
        })
    }
}

/// Stable, machine-readable fault codes.
///
/// Serialises as `SCREAMING_SNAKE_CASE` (e.g. `"INVALID_MIME_TYPE"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // parse
    InvalidJson,
    EmptyDocument,
    ConstructionFailed,
    GracefulDegradation,

    // validation
    MissingRequiredField,
    InvalidFieldType,
    InvalidUri,
    InvalidDate,
    InvalidMimeType,
    InvalidCounter,
    InvalidNumber,
    MissingContent,
    InvalidVersion,
    UnsupportedVersion,
    InvalidLanguage,
    InvalidExtensionField,
    UnknownField,
    DuplicateItemId,
    DateOrder,

    // signature
    InvalidPublicKey,
    InvalidSignatureFormat,
    SignatureMissing,
    SignatureInvalid,

    // migration
    MigrationPathNotFound,
    TransformationFailed,
    StepValidationFailed,
    PostMigrationValidationFailed,
    SignaturesInvalidated,
    ResignFailed,
    MigrationAdvisory,
}

impl ErrorCode {
    pub fn category(&self) -> Category {
        use ErrorCode::*;
        match self {
            InvalidJson | EmptyDocument | ConstructionFailed | GracefulDegradation => {
                Category::Parse
            }
            MissingRequiredField | InvalidFieldType | InvalidUri | InvalidDate
            | InvalidMimeType | InvalidCounter | InvalidNumber | MissingContent
            | InvalidVersion | UnsupportedVersion | InvalidLanguage | InvalidExtensionField
            | UnknownField | DuplicateItemId | DateOrder => Category::Validation,
            InvalidPublicKey | InvalidSignatureFormat | SignatureMissing | SignatureInvalid => {
                Category::Signature
            }
            MigrationPathNotFound | TransformationFailed | StepValidationFailed
            | PostMigrationValidationFailed | SignaturesInvalidated | ResignFailed
            | MigrationAdvisory => Category::Migration,
        }
    }

    /// The wire spelling, e.g. `"INVALID_JSON"`.
    pub fn as_str(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidJson => "INVALID_JSON",
            EmptyDocument => "EMPTY_DOCUMENT",
            ConstructionFailed => "CONSTRUCTION_FAILED",
            GracefulDegradation => "GRACEFUL_DEGRADATION",
            MissingRequiredField => "MISSING_REQUIRED_FIELD",
            InvalidFieldType => "INVALID_FIELD_TYPE",
            InvalidUri => "INVALID_URI",
            InvalidDate => "INVALID_DATE",
            InvalidMimeType => "INVALID_MIME_TYPE",
            InvalidCounter => "INVALID_COUNTER",
            InvalidNumber => "INVALID_NUMBER",
            MissingContent => "MISSING_CONTENT",
            InvalidVersion => "INVALID_VERSION",
            UnsupportedVersion => "UNSUPPORTED_VERSION",
            InvalidLanguage => "INVALID_LANGUAGE",
            InvalidExtensionField => "INVALID_EXTENSION_FIELD",
            UnknownField => "UNKNOWN_FIELD",
            DuplicateItemId => "DUPLICATE_ITEM_ID",
            DateOrder => "DATE_ORDER",
            InvalidPublicKey => "INVALID_PUBLIC_KEY",
            InvalidSignatureFormat => "INVALID_SIGNATURE_FORMAT",
            SignatureMissing => "SIGNATURE_MISSING",
            SignatureInvalid => "SIGNATURE_INVALID",
            MigrationPathNotFound => "MIGRATION_PATH_NOT_FOUND",
            TransformationFailed => "TRANSFORMATION_FAILED",
            StepValidationFailed => "STEP_VALIDATION_FAILED",
            PostMigrationValidationFailed => "POST_MIGRATION_VALIDATION_FAILED",
            SignaturesInvalidated => "SIGNATURES_INVALIDATED",
            ResignFailed => "RESIGN_FAILED",
            MigrationAdvisory => "MIGRATION_ADVISORY",
        }
    }

    /// Default remediation hints attached to new entries.
    pub fn suggestions(&self) -> &'static [&'static str] {
        use ErrorCode::*;
        match self {
            InvalidJson => &["Check the document with a JSON linter; trailing commas and unquoted keys are not allowed."],
            EmptyDocument => &["Provide a JSON object with version, title, home_page_url, feed_url, author and items."],
            ConstructionFailed | GracefulDegradation => &[
                "Treat the returned feed as partial; do not republish it.",
                "Fix the structural errors reported alongside this entry.",
            ],
            MissingRequiredField => &["Add the missing field; see the field path for its location."],
            InvalidFieldType => &["Check the JSON type of the field (string, number, object, array)."],
            InvalidUri => &["Use an absolute URI with a scheme, e.g. https://example.com/post/1."],
            InvalidDate => &["Use an RFC 3339 timestamp, e.g. 2026-01-01T12:00:00Z."],
            InvalidMimeType => &["Use a type/subtype MIME string, e.g. image/png."],
            InvalidCounter => &["Interaction counters must be non-negative integers."],
            InvalidNumber => &["Sizes and dimensions are non-negative integers; durations non-negative numbers."],
            MissingContent => &["Give the item a title or one of content_text, content_html, content_markdown."],
            InvalidVersion => &["Use a version URI such as https://ansybl.org/version/1.0."],
            UnsupportedVersion => &["Migrate the document to a supported version."],
            InvalidLanguage => &["Use a BCP 47 language tag such as en or en-GB."],
            InvalidExtensionField => &["Extension field names start with '_' followed by lowercase letters, digits or '_'."],
            UnknownField => &["Prefix custom fields with '_' to mark them as extensions."],
            DuplicateItemId => &["Give every item a unique id."],
            DateOrder => &["date_modified should not precede date_published."],
            InvalidPublicKey => &["Public keys are ed25519:<base64> strings of 32 bytes."],
            InvalidSignatureFormat => &["Signatures are <algorithm>:<base64> strings, e.g. ed25519:..."],
            SignatureMissing => &["Sign the object with the author's private key before publishing."],
            SignatureInvalid => &[
                "The content changed after signing, or it was signed with a different key.",
                "Re-sign with the key matching author.public_key.",
            ],
            MigrationPathNotFound => &["Migrate through an intermediate version with an explicit rule."],
            TransformationFailed | StepValidationFailed => &["The source document may not match its declared version."],
            PostMigrationValidationFailed => &["Inspect the attached validation errors for the migrated document."],
            SignaturesInvalidated => &["Pass a signing key to migrate, or re-sign the migrated document."],
            ResignFailed => &["Items signed by other authors must be re-signed by those authors."],
            MigrationAdvisory => &[],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single fault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportEntry {
    pub code: ErrorCode,
    pub message: String,
    pub category: Category,

    /// Dotted path to the offending field, e.g. `items[3].attachments[0].mime_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,

    pub recoverable: bool,
}

impl ReportEntry {
    /// A recoverable entry carrying the code's default suggestions.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category: code.category(),
            field: None,
            details: None,
            suggestions: code.suggestions().iter().map(|s| s.to_string()).collect(),
            recoverable: true,
        }
    }

    pub fn at(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn fatal(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

/// `[CODE] message (at field)`
impl fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (at {field})")?;
        }
        Ok(())
    }
}

/// Ordered collection of blocking errors and non-blocking warnings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub errors: Vec<ReportEntry>,
    pub warnings: Vec<ReportEntry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, entry: ReportEntry) {
        self.errors.push(entry);
    }

    pub fn warning(&mut self, entry: ReportEntry) {
        self.warnings.push(entry);
    }

    /// Append another report, keeping both orderings.
    pub fn merge(&mut self, other: Report) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Move every error into the warnings, marked recoverable.
    pub fn demote_errors(&mut self) {
        for mut entry in self.errors.drain(..) {
            entry.recoverable = true;
            self.warnings.push(entry);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Errors followed by warnings.
    pub fn entries(&self) -> impl Iterator<Item = &ReportEntry> {
        self.errors.iter().chain(self.warnings.iter())
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.entries().any(|e| e.code == code)
    }

    /// One-line summary of the errors, used in `Display` of wrapping errors.
    pub fn summary(&self) -> String {
        match self.errors.as_slice() {
            [] => format!("no errors, {} warning(s)", self.warnings.len()),
            [only] => only.to_string(),
            [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialise_screaming() {
        let json = serde_json::to_string(&ErrorCode::InvalidMimeType).unwrap();
        assert_eq!(json, "\"INVALID_MIME_TYPE\"");
        assert_eq!(ErrorCode::InvalidMimeType.as_str(), "INVALID_MIME_TYPE");
    }

    #[test]
    fn wire_spelling_matches_serde() {
        for code in [
            ErrorCode::InvalidJson,
            ErrorCode::PostMigrationValidationFailed,
            ErrorCode::SignaturesInvalidated,
            ErrorCode::DateOrder,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }

    #[test]
    fn entry_inherits_category_and_suggestions() {
        let e = ReportEntry::new(ErrorCode::SignatureInvalid, "bad").at("items[0].signature");
        assert_eq!(e.category, Category::Signature);
        assert!(!e.suggestions.is_empty());
        assert!(e.recoverable);
        assert_eq!(e.to_string(), "[SIGNATURE_INVALID] bad (at items[0].signature)");
    }

    #[test]
    fn demote_moves_errors_to_warnings() {
        let mut r = Report::new();
        r.error(ReportEntry::new(ErrorCode::InvalidDate, "x").fatal());
        r.warning(ReportEntry::new(ErrorCode::UnknownField, "y"));
        r.demote_errors();
        assert!(!r.has_errors());
        assert_eq!(r.warnings.len(), 2);
        assert!(r.warnings.iter().all(|w| w.recoverable));
    }

    #[test]
    fn summary_counts_extra_errors() {
        let mut r = Report::new();
        r.error(ReportEntry::new(ErrorCode::InvalidUri, "a"));
        r.error(ReportEntry::new(ErrorCode::InvalidUri, "b"));
        assert_eq!(r.summary(), "[INVALID_URI] a (+1 more)");
    }
}
