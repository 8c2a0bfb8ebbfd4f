// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared by the interception engine and the event builder.
//!
//! Request parameters are plain JSON values keyed by parameter name, in the
//! order the caller supplied them. They are never edited in place: applying
//! a fix always goes through [`RequestParameters::apply_fix`], which hands
//! back either the original (no change) or a fresh copy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

// ============================================================================
// Request Parameters
// ============================================================================

/// Ordered mapping from parameter name to value, normalized from a call's
/// keyword arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParameters(Map<String, Value>);

impl RequestParameters {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a parameter by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Check if a parameter is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The `model` parameter, if it is a string.
    pub fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str)
    }

    /// The `messages` parameter, if it is an array.
    pub fn messages(&self) -> Option<&[Value]> {
        self.get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    /// Borrow the underlying JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Produce the parameter set with the fix's keys overridden.
    ///
    /// Keys not named by the fix keep their value and position; new keys are
    /// appended. `self` is never touched: an empty fix borrows, anything else
    /// returns an owned copy.
    pub fn apply_fix(&self, fix: &FixDescriptor) -> Cow<'_, RequestParameters> {
        if fix.is_empty() {
            return Cow::Borrowed(self);
        }

        let mut modified = self.clone();
        for (key, value) in fix.iter() {
            modified.0.insert(key.clone(), value.clone());
        }
        Cow::Owned(modified)
    }
}

impl From<Map<String, Value>> for RequestParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for RequestParameters {
    type Error = Value;

    /// Only JSON objects convert; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl FromIterator<(String, Value)> for RequestParameters {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Call Arguments
// ============================================================================

/// The full argument set of a wrapped call: positional values plus keyword
/// parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    pub kwargs: RequestParameters,
}

impl CallArgs {
    /// Keyword-only arguments.
    pub fn new(kwargs: RequestParameters) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }

    /// Build from a JSON object of keyword arguments.
    ///
    /// Non-object values become a single positional argument.
    pub fn from_json(value: Value) -> Self {
        match RequestParameters::try_from(value) {
            Ok(kwargs) => Self::new(kwargs),
            Err(other) => Self {
                args: vec![other],
                kwargs: RequestParameters::new(),
            },
        }
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Look up a keyword argument.
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// Replace keyword arguments with the fixed set, keeping positional ones.
    pub fn with_fix(self, fix: &FixDescriptor) -> Self {
        let kwargs = match self.kwargs.apply_fix(fix) {
            Cow::Borrowed(_) => None,
            Cow::Owned(fixed) => Some(fixed),
        };
        match kwargs {
            Some(kwargs) => Self {
                args: self.args,
                kwargs,
            },
            None => self,
        }
    }
}

// ============================================================================
// Pattern Match & Fix
// ============================================================================

/// Parameter overrides produced by a pattern match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixDescriptor(Map<String, Value>);

impl FixDescriptor {
    /// Create an empty fix.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
}

impl From<Map<String, Value>> for FixDescriptor {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl std::fmt::Display for FixDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// A registry hit: the fix to apply and, when known, the pattern that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub fix: FixDescriptor,
}

impl PatternMatch {
    /// A match with no pattern name attached.
    pub fn new(fix: FixDescriptor) -> Self {
        Self { pattern: None, fix }
    }

    /// A match produced by a named pattern.
    pub fn named(pattern: impl Into<String>, fix: FixDescriptor) -> Self {
        Self {
            pattern: Some(pattern.into()),
            fix,
        }
    }
}

// ============================================================================
// Agent Metadata
// ============================================================================

/// Explicit metadata about the agent issuing a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl AgentMetadata {
    /// Metadata naming the agent.
    pub fn named(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: Some(agent_name.into()),
            extra: Map::new(),
        }
    }

    /// Attach an extra key/value.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Response Pieces
// ============================================================================

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage with the total derived from prompt + completion (saturating).
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Function name and arguments of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool call as reported in a model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCall>,
}
