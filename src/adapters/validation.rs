//! Declarative parameter validation.
//!
//! Each adapter declares a static [`RuleTable`]: for every action, an
//! ordered list of field rules. Validation walks the rules in declaration
//! order and emits at most one message per rule.

use serde_json::Value;

use crate::domain::ValidationResult;

use super::Params;

/// Constraint on one parameter field
#[derive(Debug, Clone, Copy)]
pub struct ParamRule {
    pub field: &'static str,
    pub required: bool,

    /// When set, a present value must be one of these strings
    pub allowed: Option<&'static [&'static str]>,
}

impl ParamRule {
    pub const fn required(field: &'static str) -> Self {
        Self {
            field,
            required: true,
            allowed: None,
        }
    }

    pub const fn optional(field: &'static str) -> Self {
        Self {
            field,
            required: false,
            allowed: None,
        }
    }

    /// Restrict the field to a fixed set of values
    pub const fn one_of(self, allowed: &'static [&'static str]) -> Self {
        Self {
            allowed: Some(allowed),
            ..self
        }
    }

    fn check(&self, action: &str, params: &Params) -> Option<String> {
        let value = match params.get(self.field) {
            Some(v) if !is_blank(v) => v,
            _ if self.required => {
                return Some(format!(
                    "Parameter '{}' is required for {}",
                    self.field, action
                ))
            }
            _ => return None,
        };

        let allowed = self.allowed?;
        let rendered = render(value);
        if allowed.contains(&rendered.as_str()) {
            None
        } else {
            Some(format!(
                "Invalid {} '{}'. Must be one of: {}",
                self.field,
                rendered,
                allowed.join(", ")
            ))
        }
    }
}

/// Rules for one action
#[derive(Debug, Clone, Copy)]
pub struct ActionRules {
    pub action: &'static str,
    pub rules: &'static [ParamRule],
}

/// Rules for every action an adapter supports
#[derive(Debug, Clone, Copy)]
pub struct RuleTable(pub &'static [ActionRules]);

impl RuleTable {
    pub fn rules_for(&self, action: &str) -> Option<&'static ActionRules> {
        self.0.iter().find(|a| a.action == action)
    }

    /// Action identifiers in declaration order
    pub fn actions(&self) -> impl Iterator<Item = &'static str> {
        self.0.iter().map(|a| a.action)
    }

    /// Check `params` against the rules for `action`
    pub fn validate(&self, action: &str, params: &Params) -> ValidationResult {
        let Some(action_rules) = self.rules_for(action) else {
            return ValidationResult::from_errors(vec![format!("Unsupported action: {}", action)]);
        };

        let errors = action_rules
            .rules
            .iter()
            .filter_map(|rule| rule.check(action, params))
            .collect();

        ValidationResult::from_errors(errors)
    }
}

/// Absent, null and empty-string values all count as missing
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
