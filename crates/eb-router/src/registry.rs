//! RuleRegistry - exact-match store of dispatch rules
//!
//! Rules are keyed by `(event_source, event_type)`. The registry is populated
//! once at startup and then shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use eb_common::{BridgeError, DispatchRule, DuplicatePolicy, RegistryConfig, Result, RuleKey};
use tracing::{debug, info, warn};

use crate::template::validate_path_template;

pub struct RuleRegistry {
    config: RegistryConfig,
    /// Registration order; `list()` walks this
    rules: Vec<Arc<DispatchRule>>,
    by_key: HashMap<RuleKey, usize>,
    by_name: HashMap<String, usize>,
}

impl RuleRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            rules: Vec::new(),
            by_key: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Validate and insert a rule.
    ///
    /// A rule with an empty `event_source` takes the configured default.
    pub fn register(&mut self, mut rule: DispatchRule) -> Result<Arc<DispatchRule>> {
        if rule.event_source.is_empty() {
            rule.event_source = self.config.event_source.clone();
        }

        validate_path_template(&rule.path_template, &rule.path_param_values).map_err(|m| {
            warn!(
                rule = %rule.name,
                template = %m.template,
                expected = m.expected,
                given = m.given,
                "Rejected rule with mismatched path parameters"
            );
            BridgeError::RuleDefinition {
                rule: rule.name.clone(),
                expected: m.expected,
                given: m.given,
            }
        })?;

        let key = rule.key();
        let existing = self.by_key.get(&key).copied();

        if let Some(&owner) = self.by_name.get(&rule.name) {
            if Some(owner) != existing {
                return Err(BridgeError::DuplicateRuleName { name: rule.name });
            }
        }

        let rule = Arc::new(rule);
        match existing {
            Some(index) => match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(BridgeError::DuplicateRule {
                        name: rule.name.clone(),
                        key,
                    });
                }
                DuplicatePolicy::Replace => {
                    warn!(
                        key = %key,
                        old = %self.rules[index].name,
                        new = %rule.name,
                        "Replacing existing rule"
                    );
                    self.by_name.remove(&self.rules[index].name);
                    self.by_name.insert(rule.name.clone(), index);
                    self.rules[index] = rule.clone();
                }
            },
            None => {
                let index = self.rules.len();
                self.by_key.insert(key.clone(), index);
                self.by_name.insert(rule.name.clone(), index);
                self.rules.push(rule.clone());
            }
        }

        debug!(
            rule = %rule.name,
            key = %key,
            method = %rule.method,
            path = %rule.path_template,
            "Registered rule"
        );
        Ok(rule)
    }

    /// Register each rule independently; a failure does not stop the rest.
    pub fn register_all<I>(&mut self, rules: I) -> Vec<BridgeError>
    where
        I: IntoIterator<Item = DispatchRule>,
    {
        let errors: Vec<BridgeError> = rules
            .into_iter()
            .filter_map(|rule| self.register(rule).err())
            .collect();

        info!(
            registered = self.rules.len(),
            rejected = errors.len(),
            "Rule registration complete"
        );
        errors
    }

    /// Exact-match, case-sensitive lookup
    pub fn lookup(&self, event_source: &str, event_type: &str) -> Result<&Arc<DispatchRule>> {
        let key = RuleKey::new(event_source, event_type);
        self.by_key
            .get(&key)
            .map(|&index| &self.rules[index])
            .ok_or_else(|| BridgeError::not_found(&key))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<DispatchRule>> {
        self.by_name.get(name).map(|&index| &self.rules[index])
    }

    /// All rules in registration order. The iterator is cheap to clone and restart.
    pub fn list(&self) -> impl Iterator<Item = &DispatchRule> + Clone + '_ {
        self.rules.iter().map(|rule| rule.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eb_common::HttpMethod;

    fn registry() -> RuleRegistry {
        RuleRegistry::new(RegistryConfig::new("quilt.pkg"))
    }

    fn create_package_rule() -> DispatchRule {
        DispatchRule::new(
            "create_package",
            "quilt.pkg",
            "CreatePackage",
            HttpMethod::Post,
            "/registries/{bucket}/packages",
        )
        .with_path_params(["$.detail.bucket_name"])
    }

    #[test]
    fn test_register_valid_rule() {
        let mut reg = registry();
        let rule = reg.register(create_package_rule()).unwrap();

        assert_eq!(rule.name, "create_package");
        assert_eq!(reg.len(), 1);
        assert!(reg.lookup("quilt.pkg", "CreatePackage").is_ok());
    }

    #[test]
    fn test_register_literal_path_param() {
        let mut reg = registry();
        let rule = DispatchRule::new(
            "fixed",
            "quilt.pkg",
            "CreateFixed",
            HttpMethod::Post,
            "/registries/{bucket}/packages",
        )
        .with_path_params(["my-bucket"]);

        assert!(reg.register(rule).is_ok());
    }

    #[test]
    fn test_register_count_mismatch() {
        let mut reg = registry();
        let rule = create_package_rule().with_path_params(Vec::<String>::new());

        let err = reg.register(rule).unwrap_err();
        assert_eq!(
            err,
            BridgeError::RuleDefinition {
                rule: "create_package".to_string(),
                expected: 1,
                given: 0,
            }
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_empty_source_takes_default() {
        let mut reg = registry();
        let rule = DispatchRule::new("health", "", "GetHealth", HttpMethod::Get, "/health");

        reg.register(rule).unwrap();
        assert_eq!(reg.lookup("quilt.pkg", "GetHealth").unwrap().event_source, "quilt.pkg");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let mut reg = registry();
        reg.register(create_package_rule()).unwrap();

        let err = reg.lookup("quilt.pkg", "createpackage").unwrap_err();
        assert!(matches!(err, BridgeError::NotFound { .. }));
        assert!(reg.lookup("Quilt.pkg", "CreatePackage").is_err());
    }

    #[test]
    fn test_duplicate_key_rejected_by_default() {
        let mut reg = registry();
        reg.register(create_package_rule()).unwrap();

        let mut second = create_package_rule();
        second.name = "create_package_v2".to_string();

        let err = reg.register(second).unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateRule { .. }));
        assert_eq!(
            reg.lookup("quilt.pkg", "CreatePackage").unwrap().name,
            "create_package"
        );
    }

    #[test]
    fn test_duplicate_key_replaced_under_replace_policy() {
        let mut reg = RuleRegistry::new(
            RegistryConfig::new("quilt.pkg").with_duplicate_policy(DuplicatePolicy::Replace),
        );
        reg.register(create_package_rule()).unwrap();

        let mut second = create_package_rule();
        second.name = "create_package_v2".to_string();
        second.path_template = "/v2/registries/{bucket}/packages".to_string();
        reg.register(second).unwrap();

        assert_eq!(reg.len(), 1);
        let rule = reg.lookup("quilt.pkg", "CreatePackage").unwrap();
        assert_eq!(rule.name, "create_package_v2");
        assert!(reg.get_by_name("create_package").is_none());
        assert!(reg.get_by_name("create_package_v2").is_some());
    }

    #[test]
    fn test_duplicate_name_for_different_key_rejected() {
        let mut reg = registry();
        reg.register(create_package_rule()).unwrap();

        let clash = DispatchRule::new("create_package", "quilt.pkg", "GetInfo", HttpMethod::Get, "/info");
        let err = reg.register(clash).unwrap_err();
        assert_eq!(
            err,
            BridgeError::DuplicateRuleName {
                name: "create_package".to_string()
            }
        );
    }

    #[test]
    fn test_list_is_restartable_and_ordered() {
        let mut reg = registry();
        reg.register(DispatchRule::new("info", "quilt.pkg", "GetInfo", HttpMethod::Get, "/info"))
            .unwrap();
        reg.register(DispatchRule::new("health", "quilt.pkg", "GetHealth", HttpMethod::Get, "/health"))
            .unwrap();

        let listing = reg.list();
        let first: Vec<&DispatchRule> = listing.clone().collect();
        let second: Vec<&DispatchRule> = listing.collect();
        let third: Vec<&DispatchRule> = reg.list().collect();

        assert_eq!(first, second);
        assert_eq!(first, third);
        let names: Vec<&str> = first.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["info", "health"]);
    }

    #[test]
    fn test_register_all_continues_after_failure() {
        let mut reg = registry();
        let errors = reg.register_all(vec![
            DispatchRule::new("info", "quilt.pkg", "GetInfo", HttpMethod::Get, "/info"),
            create_package_rule().with_path_params(Vec::<String>::new()),
            DispatchRule::new("health", "quilt.pkg", "GetHealth", HttpMethod::Get, "/health"),
        ]);

        assert_eq!(errors.len(), 1);
        assert_eq!(reg.len(), 2);
    }
}
