// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pattern registry: decides whether a request needs a fix.
//!
//! The engine only depends on [`PatternRegistry`]. [`RuleRegistry`] is a
//! small in-memory implementation with first-match-wins rules over top-level
//! request parameters, loadable from JSON or YAML:
//!
//! ```yaml
//! rules:
//!   - name: hot-temperature
//!     when:
//!       model: { equals: gpt-4.1 }
//!       temperature: { gt: 0.9 }
//!     fix:
//!       temperature: 0.7
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RegistryError;
use crate::types::{FixDescriptor, PatternMatch, RequestParameters};

/// Looks up a fix for normalized request parameters.
///
/// Implementations must be safe for concurrent reads.
#[cfg_attr(test, mockall::automock)]
pub trait PatternRegistry: Send + Sync {
    /// `Ok(None)` means no intervention.
    fn match_params(
        &self,
        params: &RequestParameters,
    ) -> Result<Option<PatternMatch>, RegistryError>;
}

/// Registry that never matches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistry;

impl PatternRegistry for NoopRegistry {
    fn match_params(
        &self,
        _params: &RequestParameters,
    ) -> Result<Option<PatternMatch>, RegistryError> {
        Ok(None)
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Test applied to a single top-level parameter.
///
/// Written as a one-key map in rule files: `{ gt: 0.9 }`, `{ equals: gpt-4.1 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConditionRepr", into = "ConditionRepr")]
pub enum Condition {
    /// Parameter equals the value exactly.
    Equals(Value),
    /// Numeric parameter strictly greater than.
    Gt(f64),
    /// Numeric parameter strictly less than.
    Lt(f64),
    /// Parameter present (`true`) or absent (`false`).
    Exists(bool),
    /// String parameter contains the substring, or array parameter contains
    /// the string as an element.
    Contains(String),
}

/// Map form of a [`Condition`]; exactly one key must be set.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionRepr {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contains: Option<String>,
}

// `equals: null` is a real condition, not an absent key.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<ConditionRepr> for Condition {
    type Error = String;

    fn try_from(repr: ConditionRepr) -> Result<Self, Self::Error> {
        let ConditionRepr {
            equals,
            gt,
            lt,
            exists,
            contains,
        } = repr;
        let mut found = Vec::with_capacity(1);
        if let Some(value) = equals {
            found.push(Self::Equals(value));
        }
        if let Some(bound) = gt {
            found.push(Self::Gt(bound));
        }
        if let Some(bound) = lt {
            found.push(Self::Lt(bound));
        }
        if let Some(expected) = exists {
            found.push(Self::Exists(expected));
        }
        if let Some(needle) = contains {
            found.push(Self::Contains(needle));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("condition needs one of equals, gt, lt, exists, contains".to_string()),
            n => Err(format!("condition has {n} operators, expected exactly one")),
        }
    }
}

impl From<Condition> for ConditionRepr {
    fn from(condition: Condition) -> Self {
        match condition {
            Condition::Equals(value) => Self {
                equals: Some(value),
                ..Self::default()
            },
            Condition::Gt(bound) => Self {
                gt: Some(bound),
                ..Self::default()
            },
            Condition::Lt(bound) => Self {
                lt: Some(bound),
                ..Self::default()
            },
            Condition::Exists(expected) => Self {
                exists: Some(expected),
                ..Self::default()
            },
            Condition::Contains(needle) => Self {
                contains: Some(needle),
                ..Self::default()
            },
        }
    }
}

impl Condition {
    fn holds(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::Exists(expected), v) => v.is_some() == *expected,
            (_, None) => false,
            (Self::Equals(expected), Some(v)) => v == expected,
            (Self::Gt(bound), Some(v)) => v.as_f64().is_some_and(|n| n > *bound),
            (Self::Lt(bound), Some(v)) => v.as_f64().is_some_and(|n| n < *bound),
            (Self::Contains(needle), Some(Value::String(s))) => s.contains(needle.as_str()),
            (Self::Contains(needle), Some(Value::Array(items))) => {
                items.iter().any(|item| item.as_str() == Some(needle.as_str()))
            }
            (Self::Contains(_), Some(_)) => false,
        }
    }
}

/// A named detection rule and the fix it applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub when: BTreeMap<String, Condition>,
    pub fix: FixDescriptor,
}

impl PatternRule {
    pub fn new(name: impl Into<String>, fix: FixDescriptor) -> Self {
        Self {
            name: name.into(),
            description: None,
            when: BTreeMap::new(),
            fix,
        }
    }

    /// Add a condition on a parameter.
    pub fn when(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.when.insert(key.into(), condition);
        self
    }

    /// True when every condition holds.
    pub fn matches(&self, params: &RequestParameters) -> bool {
        self.when
            .iter()
            .all(|(key, condition)| condition.holds(params.get(key)))
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |message: &str| RegistryError::InvalidRule {
            rule: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("rule name is empty"));
        }
        if self.when.is_empty() {
            return Err(invalid("rule has no conditions"));
        }
        if self.fix.is_empty() {
            return Err(invalid("rule has an empty fix"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<PatternRule>,
}

/// In-memory rule registry. Rules are evaluated in registration order.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<Vec<PatternRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from rules, validating each.
    pub fn with_rules(rules: Vec<PatternRule>) -> Result<Self, RegistryError> {
        for rule in &rules {
            rule.validate()?;
        }
        Ok(Self {
            rules: RwLock::new(rules),
        })
    }

    /// Load rules from a JSON or YAML file (by extension).
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let file: RuleFile = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };

        debug!(path = %path.display(), rules = file.rules.len(), "Loaded pattern rules");
        Self::with_rules(file.rules)
    }

    /// Parse rules from a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, RegistryError> {
        let file: RuleFile = serde_yaml::from_str(content)?;
        Self::with_rules(file.rules)
    }

    /// Parse rules from a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, RegistryError> {
        let file: RuleFile = serde_json::from_str(content)?;
        Self::with_rules(file.rules)
    }

    /// Add a rule at the end. Replaces an existing rule with the same name
    /// in place.
    pub fn register(&self, rule: PatternRule) -> Result<(), RegistryError> {
        rule.validate()?;
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        match rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }

    /// Remove a rule by name.
    pub fn remove(&self, name: &str) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    pub fn len(&self) -> usize {
        self.rules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of all registered rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

impl PatternRegistry for RuleRegistry {
    fn match_params(
        &self,
        params: &RequestParameters,
    ) -> Result<Option<PatternMatch>, RegistryError> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rules
            .iter()
            .find(|rule| rule.matches(params))
            .map(|rule| PatternMatch::named(rule.name.clone(), rule.fix.clone())))
    }
}
