//! The set of rules known to an engine

use crate::rule::{Rule, RuleMeta};
use crate::rules;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("rule '{0}' is already registered")]
    Duplicate(String),
}

/// Rules in registration order, looked up by id or fixture name
#[derive(Default)]
pub struct Registry {
    rules: Vec<Box<dyn Rule>>,
    by_id: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in rule
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for rule in rules::builtin() {
            if let Err(err) = registry.register(rule) {
                log::warn!("{}", err);
            }
        }
        registry
    }

    pub fn register(&mut self, rule: Box<dyn Rule>) -> Result<(), RegistryError> {
        let id = rule.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.by_id.insert(id, self.rules.len());
        self.rules.push(rule);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&dyn Rule> {
        self.by_id.get(id).map(|&i| self.rules[i].as_ref())
    }

    /// Find a rule by id or by its name (`DeadStores`), case-insensitively for names
    pub fn find(&self, key: &str) -> Option<&dyn Rule> {
        self.get(key).or_else(|| {
            self.iter()
                .find(|r| r.meta().name.eq_ignore_ascii_case(key))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn metas(&self) -> impl Iterator<Item = &RuleMeta> {
        self.iter().map(|r| r.meta())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(|r| r.id()).collect()
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
    use crate::rules::dead_store::DeadStore;

    #[test]
    fn test_builtin_rules_are_unique() {
        let registry = Registry::builtin();
        assert_eq!(registry.len(), rules::builtin().len());
        assert!(registry.get("dead-store").is_some());
        assert!(registry.get("no-such-rule").is_none());
    }

    #[test]
    fn test_find_by_name() {
        let registry = Registry::builtin();
        assert_eq!(registry.find("DeadStores").map(|r| r.id()), Some("dead-store"));
        assert_eq!(registry.find("deadstores").map(|r| r.id()), Some("dead-store"));
        assert_eq!(
            registry.find("null-pointer-dereference").map(|r| r.meta().name.as_str()),
            Some("NullPointerDereference")
        );
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = Registry::new();
        registry.register(Box::new(DeadStore::new())).unwrap();
        assert_eq!(
            registry.register(Box::new(DeadStore::new())),
            Err(RegistryError::Duplicate("dead-store".to_string()))
        );
        assert_eq!(registry.ids(), vec!["dead-store"]);
    }
}
