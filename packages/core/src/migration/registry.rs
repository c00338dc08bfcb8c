use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::rules::{downgrade_1_1_to_1_0, rule_key, upgrade_1_0_to_1_1, MigrationRule};

/// Migration rules keyed by `"{source}_to_{target}"`.
///
/// Owned by whoever runs migrations; there is no process-wide rule table.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    rules: BTreeMap<String, MigrationRule>,
}

impl MigrationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rules shipped with this crate: `1.0_to_1.1` and `1.1_to_1.0`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(upgrade_1_0_to_1_1());
        registry.register(downgrade_1_1_to_1_0());
        registry
    }

    /// Parse a JSON array of rules into a new registry.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let rules: Vec<MigrationRule> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for rule in rules {
            registry.register(rule);
        }
        Ok(registry)
    }

    /// Add a rule, returning the one it replaced.
    pub fn register(&mut self, rule: MigrationRule) -> Option<MigrationRule> {
        self.rules.insert(rule.key(), rule)
    }

    /// Add every rule from `other`, overriding rules with the same key.
    pub fn extend(&mut self, other: MigrationRegistry) {
        self.rules.extend(other.rules);
    }

    pub fn get(&self, source: &str, target: &str) -> Option<&MigrationRule> {
        self.rules.get(&rule_key(source, target))
    }

    pub fn rules(&self) -> impl Iterator<Item = &MigrationRule> {
        self.rules.values()
    }

    /// Every `major.minor` line that appears in some rule.
    pub fn supported_versions(&self) -> BTreeSet<&str> {
        self.rules
            .values()
            .flat_map(|r| [r.source.as_str(), r.target.as_str()])
            .collect()
    }

    /// Shortest chain of rules from `source` to `target`, breadth-first.
    ///
    /// Ties are broken by key order, so the result is deterministic. `None`
    /// when the lines are not connected; `Some(vec![])` when they are equal.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<&MigrationRule>> {
        if source == target {
            return Some(Vec::new());
        }
        let mut previous: BTreeMap<&str, &MigrationRule> = BTreeMap::new();
        let mut queue = VecDeque::from([source]);
        let mut seen = BTreeSet::from([source]);

        while let Some(current) = queue.pop_front() {
            for rule in self.rules.values().filter(|r| r.source == current) {
                let next = rule.target.as_str();
                if !seen.insert(next) {
                    continue;
                }
                previous.insert(next, rule);
                if next == target {
                    let mut path = Vec::new();
                    let mut at = target;
                    while let Some(rule) = previous.get(at) {
                        path.push(*rule);
                        at = rule.source.as_str();
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(source: &str, target: &str) -> MigrationRule {
        MigrationRule {
            source: source.into(),
            target: target.into(),
            description: None,
            transformations: Vec::new(),
            validations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn builtin_rules_are_registered() {
        let r = MigrationRegistry::builtin();
        assert!(r.get("1.0", "1.1").is_some());
        assert!(r.get("1.1", "1.0").is_some());
        assert!(r.get("1.0", "2.0").is_none());
        assert_eq!(r.supported_versions().into_iter().collect::<Vec<_>>(), ["1.0", "1.1"]);
    }

    #[test]
    fn register_replaces_same_key() {
        let mut r = MigrationRegistry::builtin();
        let old = r.register(hop("1.0", "1.1"));
        assert!(old.is_some());
        assert!(r.get("1.0", "1.1").unwrap().transformations.is_empty());
    }

    #[test]
    fn multi_step_path_is_shortest() {
        let mut r = MigrationRegistry::builtin();
        r.register(hop("1.1", "1.2"));
        r.register(hop("1.2", "2.0"));
        r.register(hop("1.0", "1.2"));
        let path: Vec<String> = r
            .find_path("1.0", "2.0")
            .unwrap()
            .iter()
            .map(|rule| rule.key())
            .collect();
        assert_eq!(path, ["1.0_to_1.2", "1.2_to_2.0"]);
    }

    #[test]
    fn disconnected_versions_have_no_path() {
        let mut r = MigrationRegistry::builtin();
        r.register(hop("3.0", "3.1"));
        assert!(r.find_path("1.0", "3.1").is_none());
        assert_eq!(r.find_path("1.0", "1.0").map(|p| p.len()), Some(0));
    }

    #[test]
    fn cycles_terminate() {
        let r = MigrationRegistry::builtin();
        assert!(r.find_path("1.0", "9.9").is_none());
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(MigrationRegistry::from_json("{\"not\": \"a list\"}").is_err());
        let r = MigrationRegistry::from_json("[]").unwrap();
        assert_eq!(r.rules().count(), 0);
    }
}
