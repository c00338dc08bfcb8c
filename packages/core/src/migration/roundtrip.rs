use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use super::engine::{MigrationOptions, MigrationResult, Migrator};
use crate::types::Document;

/// Outcome of a forward-then-backward migration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoundTripReport {
    /// Both legs succeeded and no issue was found.
    pub success: bool,
    /// Data loss or corruption: core fields changed or field paths vanished.
    pub issues: Vec<String>,
    /// Advisories: added field paths and warnings raised by either leg.
    pub warnings: Vec<String>,
    pub forward: MigrationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backward: Option<MigrationResult>,
}

/// Detects lossy migrations by migrating away and back again.
#[derive(Debug, Clone, Default)]
pub struct MigrationValidator {
    migrator: Migrator,
}

impl MigrationValidator {
    pub fn new(migrator: Migrator) -> Self {
        Self { migrator }
    }

    /// Migrate `doc` to `intermediate` and back to its own version, then
    /// compare the result with the original.
    pub fn test_round_trip_migration(&self, doc: &Document, intermediate: &str) -> RoundTripReport {
        let options = MigrationOptions::default();
        let forward = self.migrator.migrate(doc, intermediate, &options);
        let mut report = RoundTripReport {
            success: false,
            issues: Vec::new(),
            warnings: leg_warnings("forward", &forward),
            forward,
            backward: None,
        };

        let Some(migrated) = report.forward.document.as_ref().filter(|_| report.forward.success()) else {
            report.issues.push(format!(
                "forward migration to {intermediate} failed: {}",
                report.forward.report.summary()
            ));
            return report;
        };

        let backward = self.migrator.migrate(migrated, &doc.version, &options);
        report.warnings.extend(leg_warnings("backward", &backward));
        match backward.document.as_ref().filter(|_| backward.success()) {
            Some(restored) => {
                compare_core(doc, restored, &mut report.issues);
                compare_paths(doc, restored, &mut report);
            }
            None => report.issues.push(format!(
                "backward migration to {} failed: {}",
                doc.version,
                backward.report.summary()
            )),
        }
        report.backward = Some(backward);
        report.success = report.issues.is_empty();
        report
    }
}

fn leg_warnings(leg: &str, result: &MigrationResult) -> Vec<String> {
    result
        .report
        .warnings
        .iter()
        .map(|w| format!("{leg}: {w}"))
        .collect()
}

fn compare_core(original: &Document, restored: &Document, issues: &mut Vec<String>) {
    let mut changed = |field: &str, before: &dyn std::fmt::Debug, after: &dyn std::fmt::Debug| {
        issues.push(format!("{field} changed: {before:?} -> {after:?}"));
    };

    if original.protocol_version() != restored.protocol_version() {
        changed("version", &original.version, &restored.version);
    }
    if original.title != restored.title {
        changed("title", &original.title, &restored.title);
    }
    if original.author.name != restored.author.name {
        changed("author.name", &original.author.name, &restored.author.name);
    }
    if original.items.len() != restored.items.len() {
        changed("item count", &original.items.len(), &restored.items.len());
        return;
    }
    for (i, (a, b)) in original.items.iter().zip(&restored.items).enumerate() {
        if a.content_text != b.content_text {
            changed(&format!("items[{i}].content_text"), &a.content_text, &b.content_text);
        }
        if a.content_html != b.content_html {
            changed(&format!("items[{i}].content_html"), &a.content_html, &b.content_html);
        }
        if a.content_markdown != b.content_markdown {
            changed(
                &format!("items[{i}].content_markdown"),
                &a.content_markdown,
                &b.content_markdown,
            );
        }
    }
}

fn compare_paths(original: &Document, restored: &Document, report: &mut RoundTripReport) {
    let (Ok(before), Ok(after)) = (serde_json::to_value(original), serde_json::to_value(restored))
    else {
        report.issues.push("documents could not be serialised for comparison".into());
        return;
    };
    let before = field_paths(&before);
    let after = field_paths(&after);

    for removed in before.difference(&after) {
        report.issues.push(format!("field removed: {removed}"));
    }
    for added in after.difference(&before) {
        report.warnings.push(format!("field added: {added}"));
    }
}

/// Every leaf path in `value`, e.g. `items[0].attachments[1].url`.
pub(crate) fn field_paths(value: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect(value, String::new(), &mut paths);
    paths
}

fn collect(value: &Value, prefix: String, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                collect(v, path, out);
            }
        }
        Value::Array(list) if !list.is_empty() => {
            for (i, v) in list.iter().enumerate() {
                collect(v, format!("{prefix}[{i}]"), out);
            }
        }
        _ => {
            out.insert(prefix);
        }
    }
}
