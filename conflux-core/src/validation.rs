//! Constraint-based content validation.
//!
//! A [`Validator`] checks a [`Value`] against an open string map of
//! constraints plus every custom rule registered on it. Built-in constraint
//! keys are listed in [`keys`]. Constraints are checked in key order and
//! the first failure is returned; custom rules run after the built-ins, in
//! name order.

use crate::value::{Value, ValueType};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Constraint set: constraint name to raw constraint value
pub type Constraints = BTreeMap<String, String>;

/// Built-in constraint keys
pub mod keys {
    pub const MIN_LENGTH: &str = "minLength";
    pub const MAX_LENGTH: &str = "maxLength";
    pub const MIN_VALUE: &str = "minValue";
    pub const MAX_VALUE: &str = "maxValue";
    pub const PATTERN: &str = "pattern";
    pub const FORMAT: &str = "format";
    pub const REQUIRED: &str = "required";
    pub const ALLOWED_VALUES: &str = "allowedValues";
}

// Compiled `pattern` constraints kept before the cache is reset.
const PATTERN_CACHE_LIMIT: usize = 256;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z0-9._%+\-]+@",
        r"[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?",
        r"(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*",
        r"\.[A-Za-z]{2,}$",
    ))
    .expect("email pattern is valid")
});

/// Reason a value failed validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The value broke a constraint
    #[error("{constraint}: {reason}")]
    Violated { constraint: String, reason: String },

    /// The constraint does not apply to values of this type
    #[error("{constraint}: type mismatch, expected {expected} but got {actual}")]
    TypeMismatch {
        constraint: String,
        expected: String,
        actual: ValueType,
    },

    /// The constraint value itself could not be interpreted
    #[error("{constraint}: invalid constraint value '{value}'")]
    InvalidConstraint { constraint: String, value: String },

    /// The `pattern` constraint is not a valid regular expression
    #[error("pattern: invalid regular expression '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The `format` constraint names an unknown format
    #[error("format: unknown format '{0}'")]
    UnknownFormat(String),

    /// A custom rule rejected the value
    #[error("{rule}: {message}")]
    RuleFailed { rule: String, message: String },

    /// A custom rule returned an error instead of a verdict
    #[error("{rule}: rule raised an error: {message}")]
    RuleErrored { rule: String, message: String },
}

impl ValidationError {
    /// Name of the constraint or rule that failed
    pub fn constraint(&self) -> &str {
        match self {
            ValidationError::Violated { constraint, .. }
            | ValidationError::TypeMismatch { constraint, .. }
            | ValidationError::InvalidConstraint { constraint, .. } => constraint,
            ValidationError::InvalidPattern { .. } => keys::PATTERN,
            ValidationError::UnknownFormat(_) => keys::FORMAT,
            ValidationError::RuleFailed { rule, .. }
            | ValidationError::RuleErrored { rule, .. } => {
                rule
            }
        }
    }

    fn violated(constraint: &str, reason: impl Into<String>) -> Self {
        Self::Violated {
            constraint: constraint.to_string(),
            reason: reason.into(),
        }
    }

    fn type_mismatch(constraint: &str, expected: &str, actual: &Value) -> Self {
        Self::TypeMismatch {
            constraint: constraint.to_string(),
            expected: expected.to_string(),
            actual: actual.value_type(),
        }
    }

    fn invalid_constraint(constraint: &str, value: &str) -> Self {
        Self::InvalidConstraint {
            constraint: constraint.to_string(),
            value: value.to_string(),
        }
    }
}

/// Predicate of a custom rule
pub type RulePredicate = Arc<dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync>;

/// Named custom validation rule
#[derive(Clone)]
pub struct ValidationRule {
    name: String,
    predicate: RulePredicate,
    message: String,
}

impl ValidationRule {
    /// Create a new rule
    pub fn new<F>(name: impl Into<String>, predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        match (self.predicate)(value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ValidationError::RuleFailed {
                rule: self.name.clone(),
                message: self.message.clone(),
            }),
            Err(err) => Err(ValidationError::RuleErrored {
                rule: self.name.clone(),
                message: format!("{:#}", err),
            }),
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .field("message", &self.message)
            .finish()
    }
}

/// Constraint evaluator with a registry of custom rules.
///
/// The registry can be changed while validations run on other tasks; a
/// validation sees the rules present when it reaches the custom-rule step.
#[derive(Debug, Default)]
pub struct Validator {
    rules: DashMap<String, ValidationRule>,
    patterns: DashMap<String, Regex>,
}

impl Validator {
    /// Create a validator with no custom rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom rule, replacing any rule with the same name
    pub fn register_rule<F>(
        &self,
        name: impl Into<String>,
        predicate: F,
        message: impl Into<String>,
    ) where
        F: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.add_rule(ValidationRule::new(name, predicate, message));
    }

    /// Register a prebuilt rule
    pub fn add_rule(&self, rule: ValidationRule) {
        tracing::debug!("[Validator] registering rule: {}", rule.name);
        self.rules.insert(rule.name.clone(), rule);
    }

    /// Remove a rule by name, returning whether it existed
    pub fn unregister_rule(&self, name: &str) -> bool {
        self.rules.remove(name).is_some()
    }

    /// Whether a rule with this name is registered
    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Names of all registered rules, sorted
    pub fn rule_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Validate a value against constraints and registered rules
    pub fn validate(
        &self,
        value: &Value,
        constraints: &Constraints,
    ) -> Result<(), ValidationError> {
        for (name, raw) in constraints {
            self.check_constraint(value, name, raw)?;
        }

        // Clone the rules out so no registry shard is locked while user code runs.
        let mut rules: Vec<ValidationRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        for rule in &rules {
            rule.check(value)?;
        }

        Ok(())
    }

    fn check_constraint(
        &self,
        value: &Value,
        name: &str,
        raw: &str,
    ) -> Result<(), ValidationError> {
        match name {
            keys::MIN_LENGTH => {
                let min = parse_usize(name, raw)?;
                let len = length_of(name, value)?;
                if len < min {
                    return Err(ValidationError::violated(
                        name,
                        format!("length {} is less than minimum {}", len, min),
                    ));
                }
            }
            keys::MAX_LENGTH => {
                let max = parse_usize(name, raw)?;
                let len = length_of(name, value)?;
                if len > max {
                    return Err(ValidationError::violated(
                        name,
                        format!("length {} exceeds maximum {}", len, max),
                    ));
                }
            }
            keys::MIN_VALUE => {
                let min = parse_f64(name, raw)?;
                let number = number_of(name, value)?;
                if !(number >= min) {
                    return Err(ValidationError::violated(
                        name,
                        format!("{} is less than minimum {}", number, min),
                    ));
                }
            }
            keys::MAX_VALUE => {
                let max = parse_f64(name, raw)?;
                let number = number_of(name, value)?;
                if !(number <= max) {
                    return Err(ValidationError::violated(
                        name,
                        format!("{} exceeds maximum {}", number, max),
                    ));
                }
            }
            keys::PATTERN => {
                let text = string_of(name, value)?;
                let regex = self.compiled_pattern(raw)?;
                if !regex.is_match(text) {
                    return Err(ValidationError::violated(
                        name,
                        format!("value does not match '{}'", raw),
                    ));
                }
            }
            keys::FORMAT => {
                let text = string_of(name, value)?;
                let valid = match raw {
                    "email" => EMAIL.is_match(text),
                    "url" => url::Url::parse(text)
                        .map(|u| !u.scheme().is_empty())
                        .unwrap_or(false),
                    "uuid" => uuid::Uuid::parse_str(text).is_ok(),
                    other => return Err(ValidationError::UnknownFormat(other.to_string())),
                };
                if !valid {
                    return Err(ValidationError::violated(
                        name,
                        format!("value is not a valid {}", raw),
                    ));
                }
            }
            keys::REQUIRED => {
                let required = match raw.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(ValidationError::invalid_constraint(name, raw)),
                };
                if required && is_empty(value) {
                    return Err(ValidationError::violated(name, "value is required but empty"));
                }
            }
            keys::ALLOWED_VALUES => {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int32(i) => i.to_string(),
                    Value::Int64(i) => i.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::Double(d) => d.to_string(),
                    other => return Err(ValidationError::type_mismatch(name, "String", other)),
                };
                if !raw.split(',').map(str::trim).any(|allowed| allowed == rendered) {
                    return Err(ValidationError::violated(
                        name,
                        format!("'{}' is not one of [{}]", rendered, raw),
                    ));
                }
            }
            other => {
                tracing::warn!("[Validator] ignoring unknown constraint: {}", other);
            }
        }
        Ok(())
    }

    fn compiled_pattern(&self, pattern: &str) -> Result<Regex, ValidationError> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(pattern).map_err(|e| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        if self.patterns.len() >= PATTERN_CACHE_LIMIT {
            tracing::debug!("[Validator] resetting pattern cache");
            self.patterns.clear();
        }
        self.patterns.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn parse_usize(name: &str, raw: &str) -> Result<usize, ValidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ValidationError::invalid_constraint(name, raw))
}

fn parse_f64(name: &str, raw: &str) -> Result<f64, ValidationError> {
    match raw.trim().parse::<f64>() {
        Ok(n) if !n.is_nan() => Ok(n),
        _ => Err(ValidationError::invalid_constraint(name, raw)),
    }
}

fn length_of(name: &str, value: &Value) -> Result<usize, ValidationError> {
    value
        .length()
        .ok_or_else(|| ValidationError::type_mismatch(name, "String, Data or collection", value))
}

fn number_of(name: &str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .ok_or_else(|| ValidationError::type_mismatch(name, "numeric", value))
}

fn string_of<'a>(name: &str, value: &'a Value) -> Result<&'a str, ValidationError> {
    value
        .as_str()
        .ok_or_else(|| ValidationError::type_mismatch(name, "String", value))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Data(d) => d.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Map(m) => m.is_empty(),
        Value::Vector(v) => v.is_empty(),
        _ => false,
    }
}
