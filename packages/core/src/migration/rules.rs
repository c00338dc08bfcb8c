//! Declarative migration rules.
//!
//! A rule maps one `major.minor` line to another through an ordered list of
//! [`Transformation`]s, then checks the result with named
//! [`StepValidation`]s. Both are plain `serde` data, so rule sets can be
//! shipped as JSON next to the binary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::signing::SignatureAlgorithm;
use crate::version::ProtocolVersion;

/// A transformation that could not be applied to the document.
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("{0} must be a JSON object")]
    NotAnObject(String),
    #[error("items must be an array")]
    ItemsNotArray,
    #[error("invalid target version {0:?}")]
    InvalidVersion(String),
    #[error("{field}: expected a {expected} signature, found {found:?}")]
    UnexpectedSignature {
        field: String,
        expected: SignatureAlgorithm,
        found: String,
    },
}

/// Which objects a field-level transformation touches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldTarget {
    /// The top-level document object.
    Feed,
    /// Every item.
    Items,
    /// The document author.
    Author,
}

/// One rewrite step, applied in declared order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transformation {
    /// Rewrite the `version` URI.
    VersionUpdate { to: String },
    /// Insert `field` with `default` wherever it is absent.
    FieldAddition {
        target: FieldTarget,
        field: String,
        default: Value,
    },
    /// Delete `field` wherever it is present.
    FieldRemoval { target: FieldTarget, field: String },
    /// Relabel the document signature and every item signature.
    SignatureFormatUpgrade {
        from: SignatureAlgorithm,
        to: SignatureAlgorithm,
    },
    SignatureFormatDowngrade {
        from: SignatureAlgorithm,
        to: SignatureAlgorithm,
    },
}

impl Transformation {
    pub fn name(&self) -> &'static str {
        match self {
            Transformation::VersionUpdate { .. } => "version_update",
            Transformation::FieldAddition { .. } => "field_addition",
            Transformation::FieldRemoval { .. } => "field_removal",
            Transformation::SignatureFormatUpgrade { .. } => "signature_format_upgrade",
            Transformation::SignatureFormatDowngrade { .. } => "signature_format_downgrade",
        }
    }

    /// Apply in place. On error `doc` may be half-rewritten; callers work on
    /// a copy.
    pub fn apply(&self, doc: &mut Value) -> Result<(), TransformError> {
        match self {
            Transformation::VersionUpdate { to } => {
                let version = ProtocolVersion::parse(to)
                    .map_err(|_| TransformError::InvalidVersion(to.clone()))?;
                root(doc)?.insert("version".into(), Value::String(version.to_uri()));
            }
            Transformation::FieldAddition {
                target,
                field,
                default,
            } => {
                for obj in targets(doc, *target)? {
                    obj.entry(field.clone()).or_insert_with(|| default.clone());
                }
            }
            Transformation::FieldRemoval { target, field } => {
                for obj in targets(doc, *target)? {
                    obj.remove(field);
                }
            }
            Transformation::SignatureFormatUpgrade { from, to }
            | Transformation::SignatureFormatDowngrade { from, to } => {
                relabel(doc, *from, *to)?;
            }
        }
        Ok(())
    }
}

fn root(doc: &mut Value) -> Result<&mut Map<String, Value>, TransformError> {
    doc.as_object_mut()
        .ok_or_else(|| TransformError::NotAnObject("document".into()))
}

fn targets(doc: &mut Value, target: FieldTarget) -> Result<Vec<&mut Map<String, Value>>, TransformError> {
    let obj = root(doc)?;
    match target {
        FieldTarget::Feed => Ok(vec![obj]),
        FieldTarget::Author => obj
            .get_mut("author")
            .and_then(Value::as_object_mut)
            .map(|a| vec![a])
            .ok_or_else(|| TransformError::NotAnObject("author".into())),
        FieldTarget::Items => {
            let Some(items) = obj.get_mut("items") else {
                return Ok(Vec::new());
            };
            let items = items.as_array_mut().ok_or(TransformError::ItemsNotArray)?;
            items
                .iter_mut()
                .enumerate()
                .map(|(i, item)| {
                    item.as_object_mut()
                        .ok_or_else(|| TransformError::NotAnObject(format!("items[{i}]")))
                })
                .collect()
        }
    }
}

/// Swap the algorithm prefix on every signature. Signatures already under
/// `to` are left alone; any other algorithm is an error.
fn relabel(
    doc: &mut Value,
    from: SignatureAlgorithm,
    to: SignatureAlgorithm,
) -> Result<(), TransformError> {
    let obj = root(doc)?;
    relabel_one(obj, "signature", from, to)?;
    if let Some(items) = obj.get_mut("items").and_then(Value::as_array_mut) {
        for (i, item) in items.iter_mut().enumerate() {
            if let Some(item) = item.as_object_mut() {
                relabel_one(item, &format!("items[{i}].signature"), from, to)?;
            }
        }
    }
    Ok(())
}

fn relabel_one(
    obj: &mut Map<String, Value>,
    field: &str,
    from: SignatureAlgorithm,
    to: SignatureAlgorithm,
) -> Result<(), TransformError> {
    let Some(Value::String(sig)) = obj.get_mut("signature") else {
        return Ok(());
    };
    if sig.starts_with(&to.prefix()) {
        return Ok(());
    }
    match sig.strip_prefix(&from.prefix()) {
        Some(body) => {
            *sig = format!("{}{body}", to.prefix());
            Ok(())
        }
        None => Err(TransformError::UnexpectedSignature {
            field: field.to_string(),
            expected: from,
            found: sig.split(':').next().unwrap_or_default().to_string(),
        }),
    }
}

/// A named post-step check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum StepValidation {
    /// The `version` field names the rule's target line.
    VersionMatches,
    /// Every listed top-level field is present.
    RequiredFields { fields: Vec<String> },
    /// Every signature present uses `algorithm`.
    SignatureFormat { algorithm: SignatureAlgorithm },
    FieldAbsent { target: FieldTarget, field: String },
    FieldPresent { target: FieldTarget, field: String },
}

impl StepValidation {
    pub fn name(&self) -> &'static str {
        match self {
            StepValidation::VersionMatches => "version_matches",
            StepValidation::RequiredFields { .. } => "required_fields",
            StepValidation::SignatureFormat { .. } => "signature_format",
            StepValidation::FieldAbsent { .. } => "field_absent",
            StepValidation::FieldPresent { .. } => "field_present",
        }
    }

    /// `Err` carries a human-readable reason.
    pub fn check(&self, doc: &Value, rule: &MigrationRule) -> Result<(), String> {
        match self {
            StepValidation::VersionMatches => {
                let version = doc
                    .get("version")
                    .and_then(Value::as_str)
                    .ok_or("version is missing")?;
                let parsed = ProtocolVersion::parse(version).map_err(|e| e.to_string())?;
                if parsed.major_minor() != rule.target {
                    return Err(format!(
                        "version is {}, expected {}",
                        parsed.major_minor(),
                        rule.target
                    ));
                }
                Ok(())
            }
            StepValidation::RequiredFields { fields } => {
                let missing: Vec<&str> = fields
                    .iter()
                    .filter(|f| doc.get(f.as_str()).is_none())
                    .map(String::as_str)
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(format!("missing fields: {}", missing.join(", ")))
                }
            }
            StepValidation::SignatureFormat { algorithm } => {
                let prefix = algorithm.prefix();
                let items = doc.get("items").and_then(Value::as_array);
                let signatures = std::iter::once(doc.get("signature"))
                    .chain(items.into_iter().flatten().map(|i| i.get("signature")))
                    .flatten()
                    .filter_map(Value::as_str);
                for sig in signatures {
                    if !sig.starts_with(&prefix) {
                        return Err(format!("signature {sig:.24}... is not {algorithm}"));
                    }
                }
                Ok(())
            }
            StepValidation::FieldAbsent { target, field } => {
                match objects(doc, *target).find(|o| o.contains_key(field)) {
                    Some(_) => Err(format!("{field} should have been removed")),
                    None => Ok(()),
                }
            }
            StepValidation::FieldPresent { target, field } => {
                match objects(doc, *target).find(|o| !o.contains_key(field)) {
                    Some(_) => Err(format!("{field} is missing")),
                    None => Ok(()),
                }
            }
        }
    }
}

fn objects(doc: &Value, target: FieldTarget) -> Box<dyn Iterator<Item = &Map<String, Value>> + '_> {
    match target {
        FieldTarget::Feed => Box::new(doc.as_object().into_iter()),
        FieldTarget::Author => Box::new(doc.get("author").and_then(Value::as_object).into_iter()),
        FieldTarget::Items => Box::new(
            doc.get("items")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_object),
        ),
    }
}

/// Maps documents on the `source` line to the `target` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MigrationRule {
    /// `major.minor`, e.g. `"1.0"`.
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub transformations: Vec<Transformation>,
    #[serde(default)]
    pub validations: Vec<StepValidation>,
    /// Advisories surfaced to the caller whenever the rule runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationRule {
    /// `"{source}_to_{target}"`, the registry key.
    pub fn key(&self) -> String {
        rule_key(&self.source, &self.target)
    }
}

pub fn rule_key(source: &str, target: &str) -> String {
    format!("{source}_to_{target}")
}

/// 1.0 → 1.1: adds `expired` and moves signatures to the `ed25519-jcs` label.
pub fn upgrade_1_0_to_1_1() -> MigrationRule {
    MigrationRule {
        source: "1.0".into(),
        target: "1.1".into(),
        description: Some("add expired flag, relabel signatures as ed25519-jcs".into()),
        transformations: vec![
            Transformation::VersionUpdate { to: "1.1".into() },
            Transformation::FieldAddition {
                target: FieldTarget::Feed,
                field: "expired".into(),
                default: Value::Bool(false),
            },
            Transformation::SignatureFormatUpgrade {
                from: SignatureAlgorithm::Ed25519,
                to: SignatureAlgorithm::Ed25519Jcs,
            },
        ],
        validations: vec![
            StepValidation::VersionMatches,
            StepValidation::FieldPresent {
                target: FieldTarget::Feed,
                field: "expired".into(),
            },
            StepValidation::SignatureFormat {
                algorithm: SignatureAlgorithm::Ed25519Jcs,
            },
        ],
        warnings: Vec::new(),
    }
}

/// 1.1 → 1.0: drops `expired` and restores the `ed25519` label.
pub fn downgrade_1_1_to_1_0() -> MigrationRule {
    MigrationRule {
        source: "1.1".into(),
        target: "1.0".into(),
        description: Some("drop expired flag, relabel signatures as ed25519".into()),
        transformations: vec![
            Transformation::VersionUpdate { to: "1.0".into() },
            Transformation::FieldRemoval {
                target: FieldTarget::Feed,
                field: "expired".into(),
            },
            Transformation::SignatureFormatDowngrade {
                from: SignatureAlgorithm::Ed25519Jcs,
                to: SignatureAlgorithm::Ed25519,
            },
        ],
        validations: vec![
            StepValidation::VersionMatches,
            StepValidation::FieldAbsent {
                target: FieldTarget::Feed,
                field: "expired".into(),
            },
            StepValidation::SignatureFormat {
                algorithm: SignatureAlgorithm::Ed25519,
            },
        ],
        warnings: vec!["the expired flag is not representable in 1.0 and was dropped".into()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "version": "https://ansybl.org/version/1.0",
            "title": "T",
            "author": { "name": "A", "public_key": "ed25519:x" },
            "items": [
                { "id": "1", "signature": "ed25519:AAAA" },
                { "id": "2" }
            ],
            "signature": "ed25519:BBBB"
        })
    }

    #[test]
    fn version_update_writes_uri() {
        let mut d = doc();
        Transformation::VersionUpdate { to: "1.1".into() }.apply(&mut d).unwrap();
        assert_eq!(d["version"], "https://ansybl.org/version/1.1");
    }

    #[test]
    fn field_addition_keeps_existing_values() {
        let mut d = doc();
        d["items"][0]["lang"] = json!("fr");
        Transformation::FieldAddition {
            target: FieldTarget::Items,
            field: "lang".into(),
            default: json!("en"),
        }
        .apply(&mut d)
        .unwrap();
        assert_eq!(d["items"][0]["lang"], "fr");
        assert_eq!(d["items"][1]["lang"], "en");
    }

    #[test]
    fn field_removal_on_author() {
        let mut d = doc();
        Transformation::FieldRemoval {
            target: FieldTarget::Author,
            field: "name".into(),
        }
        .apply(&mut d)
        .unwrap();
        assert!(d["author"].get("name").is_none());
    }

    #[test]
    fn relabel_touches_every_signature() {
        let mut d = doc();
        upgrade_1_0_to_1_1().transformations[2].apply(&mut d).unwrap();
        assert_eq!(d["signature"], "ed25519-jcs:BBBB");
        assert_eq!(d["items"][0]["signature"], "ed25519-jcs:AAAA");
        assert!(d["items"][1].get("signature").is_none());
    }

    #[test]
    fn relabel_rejects_foreign_algorithm() {
        let mut d = doc();
        d["items"][0]["signature"] = json!("rsa:AAAA");
        let err = Transformation::SignatureFormatUpgrade {
            from: SignatureAlgorithm::Ed25519,
            to: SignatureAlgorithm::Ed25519Jcs,
        }
        .apply(&mut d)
        .unwrap_err();
        assert!(matches!(err, TransformError::UnexpectedSignature { ref field, .. } if field == "items[0].signature"));
    }

    #[test]
    fn items_must_be_an_array() {
        let mut d = doc();
        d["items"] = json!("nope");
        let err = Transformation::FieldAddition {
            target: FieldTarget::Items,
            field: "x".into(),
            default: json!(1),
        }
        .apply(&mut d)
        .unwrap_err();
        assert_eq!(err, TransformError::ItemsNotArray);
    }

    #[test]
    fn validations_pass_after_builtin_upgrade() {
        let rule = upgrade_1_0_to_1_1();
        let mut d = doc();
        for t in &rule.transformations {
            t.apply(&mut d).unwrap();
        }
        for v in &rule.validations {
            v.check(&d, &rule).unwrap_or_else(|e| panic!("{}: {e}", v.name()));
        }
    }

    #[test]
    fn version_matches_fails_without_update() {
        let rule = upgrade_1_0_to_1_1();
        assert!(StepValidation::VersionMatches.check(&doc(), &rule).is_err());
    }

    #[test]
    fn rules_load_from_json() {
        let raw = json!({
            "source": "1.1",
            "target": "1.2",
            "transformations": [
                { "type": "version_update", "to": "1.2" },
                { "type": "field_addition", "target": "items", "field": "lang", "default": "en" }
            ],
            "validations": [
                { "check": "version_matches" },
                { "check": "field_present", "target": "items", "field": "lang" }
            ]
        });
        let rule: MigrationRule = serde_json::from_value(raw).unwrap();
        assert_eq!(rule.key(), "1.1_to_1.2");
        assert_eq!(rule.transformations[1].name(), "field_addition");
        assert!(rule.warnings.is_empty());
    }
}
