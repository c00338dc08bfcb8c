use ed25519_dalek::SigningKey;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::registry::MigrationRegistry;
use super::roundtrip::field_paths;
use super::rules::MigrationRule;
use crate::report::{ErrorCode, Report, ReportEntry};
use crate::signing::{ensure_key_matches, sign_document, sign_item, verify_document, verify_item};
use crate::types::Document;
use crate::validation::validate_document;
use crate::version::ProtocolVersion;

/// Caller-controlled migration behaviour.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Run the validator over the final document.
    pub validate_result: bool,
    /// Re-sign items and the document after the last step.
    pub signing_key: Option<SigningKey>,
    /// Chain rules when there is no direct one.
    pub allow_multi_step: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            validate_result: true,
            signing_key: None,
            allow_multi_step: true,
        }
    }
}

/// Outcome of [`Migrator::migrate`]. `document` is `None` on any failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MigrationResult {
    pub source_version: String,
    pub target_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    /// Keys of the rules applied, in order.
    pub steps: Vec<String>,
    pub report: Report,
}

impl MigrationResult {
    pub fn success(&self) -> bool {
        self.document.is_some() && !self.report.has_errors()
    }
}

/// Applies registered rules to documents.
#[derive(Debug, Clone)]
pub struct Migrator {
    registry: MigrationRegistry,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(MigrationRegistry::builtin())
    }
}

impl Migrator {
    pub fn new(registry: MigrationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Migrate `doc` to `target_version` (a version URI or `major.minor`).
    ///
    /// All or nothing: each step works on its own copy and the first failing
    /// transformation or validation discards everything.
    pub fn migrate(
        &self,
        doc: &Document,
        target_version: &str,
        options: &MigrationOptions,
    ) -> MigrationResult {
        let mut result = MigrationResult {
            source_version: doc.version.clone(),
            target_version: target_version.to_string(),
            document: None,
            steps: Vec::new(),
            report: Report::new(),
        };

        let Some(source) = doc.protocol_version() else {
            result.report.error(
                ReportEntry::new(
                    ErrorCode::InvalidVersion,
                    format!("source version {:?} is not a protocol version", doc.version),
                )
                .at("version"),
            );
            return result;
        };
        let target = match ProtocolVersion::parse(target_version) {
            Ok(v) => v,
            Err(e) => {
                result.report.error(ReportEntry::new(
                    ErrorCode::InvalidVersion,
                    format!("target version: {e}"),
                ));
                return result;
            }
        };
        result.source_version = source.major_minor();
        result.target_version = target.major_minor();

        if source.same_line(&target) {
            debug!(version = %source, "already at target version");
            result.document = Some(doc.clone());
            return result;
        }

        let (from, to) = (source.major_minor(), target.major_minor());
        let path = match self.registry.get(&from, &to) {
            Some(rule) => Some(vec![rule]),
            None if options.allow_multi_step => self.registry.find_path(&from, &to),
            None => None,
        };
        let Some(path) = path else {
            warn!(%from, %to, "no migration path");
            result.report.error(
                ReportEntry::new(
                    ErrorCode::MigrationPathNotFound,
                    format!("no migration path from {from} to {to}"),
                )
                .with_details(json!({
                    "supported_versions": self.registry.supported_versions(),
                })),
            );
            return result;
        };

        let mut value = match serde_json::to_value(doc) {
            Ok(v) => v,
            Err(e) => {
                result.report.error(ReportEntry::new(
                    ErrorCode::TransformationFailed,
                    format!("document could not be serialised: {e}"),
                ));
                return result;
            }
        };

        for rule in path {
            match apply_rule(rule, &value) {
                Ok(next) => {
                    debug!(step = %rule.key(), "applied migration step");
                    value = next;
                    result.steps.push(rule.key());
                    for advisory in &rule.warnings {
                        result.report.warning(
                            ReportEntry::new(ErrorCode::MigrationAdvisory, advisory.clone())
                                .with_details(json!({ "step": rule.key() })),
                        );
                    }
                }
                Err(entry) => {
                    warn!(step = %rule.key(), error = %entry.message, "migration aborted");
                    result.report.error(entry);
                    return result;
                }
            }
        }

        if options.validate_result {
            let validation = validate_document(&value);
            for e in &validation.errors {
                let mut entry = ReportEntry::new(
                    ErrorCode::PostMigrationValidationFailed,
                    format!("{}: {}", e.code, e.message),
                );
                entry.field = e.field.clone();
                result.report.error(entry);
            }
            result.report.warnings.extend(validation.warnings);
            if result.report.has_errors() {
                warn!(to = %to, "migrated document failed validation");
                return result;
            }
        }

        let mut migrated = match rebuild(&value) {
            Ok(d) => d,
            Err(entry) => {
                warn!(to = %to, error = %entry.message, "migrated document could not be rebuilt");
                result.report.error(entry);
                return result;
            }
        };

        match &options.signing_key {
            Some(key) => migrated = resign(&migrated, key, &mut result.report),
            None => check_signatures(&migrated, &mut result.report),
        }

        result.document = Some(migrated);
        result
    }
}

/// Run one rule over a copy of `value`.
fn apply_rule(rule: &MigrationRule, value: &Value) -> Result<Value, ReportEntry> {
    let mut next = value.clone();
    for t in &rule.transformations {
        t.apply(&mut next).map_err(|e| {
            ReportEntry::new(
                ErrorCode::TransformationFailed,
                format!("{} failed in {}: {e}", t.name(), rule.key()),
            )
            .with_details(json!({ "step": rule.key(), "transformation": t.name() }))
        })?;
    }
    for v in &rule.validations {
        v.check(&next, rule).map_err(|reason| {
            ReportEntry::new(
                ErrorCode::StepValidationFailed,
                format!("{} failed in {}: {reason}", v.name(), rule.key()),
            )
            .with_details(json!({ "step": rule.key(), "validation": v.name() }))
        })?;
    }
    Ok(next)
}

/// Turn the migrated value back into a [`Document`]. Fields the typed model
/// does not name land in the flattened side-maps; anything that still cannot
/// be represented fails the migration instead of vanishing.
fn rebuild(value: &Value) -> Result<Document, ReportEntry> {
    let doc: Document = serde_json::from_value(value.clone()).map_err(|e| {
        ReportEntry::new(
            ErrorCode::TransformationFailed,
            format!("migrated document could not be rebuilt: {e}"),
        )
    })?;
    let back = serde_json::to_value(&doc).map_err(|e| {
        ReportEntry::new(
            ErrorCode::TransformationFailed,
            format!("migrated document could not be serialised: {e}"),
        )
    })?;
    let after = field_paths(&back);
    let lost: Vec<String> = field_paths(value).difference(&after).cloned().collect();
    if !lost.is_empty() {
        return Err(ReportEntry::new(
            ErrorCode::TransformationFailed,
            format!("migrated document cannot be represented without loss ({} field(s))", lost.len()),
        )
        .with_details(json!({ "fields": lost })));
    }
    Ok(doc)
}

/// Re-sign every item the key is entitled to sign, then the document.
fn resign(doc: &Document, key: &SigningKey, report: &mut Report) -> Document {
    let algorithm = doc
        .protocol_version()
        .unwrap_or(ProtocolVersion::CURRENT)
        .signature_algorithm();
    let mut next = doc.clone();

    for (i, item) in doc.items.iter().enumerate() {
        let signer = doc.signer_key_for(item);
        let signed = ensure_key_matches(key, signer).and_then(|()| sign_item(item, key, algorithm));
        match signed {
            Ok(signed) => next.items[i] = signed,
            Err(e) => report.warning(
                ReportEntry::new(ErrorCode::ResignFailed, format!("item {:?} kept its signature: {e}", item.id))
                    .at(format!("items[{i}].signature")),
            ),
        }
    }

    match sign_document(&next, key, algorithm) {
        Ok(sealed) => sealed,
        Err(e) => {
            report.warning(
                ReportEntry::new(ErrorCode::ResignFailed, format!("document not re-signed: {e}"))
                    .at("signature"),
            );
            next
        }
    }
}

/// Record which signatures the migration broke.
fn check_signatures(doc: &Document, report: &mut Report) {
    let mut broken = Vec::new();
    if doc.signature.is_some() && !verify_document(doc).unwrap_or(false) {
        broken.push("signature".to_string());
    }
    for (i, item) in doc.items.iter().enumerate() {
        if item.signature.is_some() && !verify_item(item, doc.signer_key_for(item)).unwrap_or(false) {
            broken.push(format!("items[{i}].signature"));
        }
    }
    if !broken.is_empty() {
        report.warning(
            ReportEntry::new(
                ErrorCode::SignaturesInvalidated,
                format!("{} signature(s) no longer verify; re-sign the migrated document", broken.len()),
            )
            .with_details(json!({ "fields": broken })),
        );
    }
}
