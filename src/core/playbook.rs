//! Playbook definitions and loading.
//!
//! Playbooks are defined in YAML (or JSON) and consist of ordered steps,
//! each naming an adapter, an action, its parameters and an execution mode.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{Params, RetryPolicy};
use crate::domain::ExecutionMode;

/// A complete playbook definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Playbook name (used in reports)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Ordered list of steps to execute
    pub steps: Vec<Step>,
}

impl Playbook {
    /// Load a playbook from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read playbook file: {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        parsed.with_context(|| format!("Invalid playbook: {}", path.display()))
    }

    /// Parse a playbook from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse playbook YAML")
    }

    /// Parse a playbook from JSON content
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse playbook JSON")
    }

    /// Problems with the playbook's own structure (no adapter knowledge needed)
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("Playbook name cannot be empty".to_string());
        }

        if self.steps.is_empty() {
            problems.push("Playbook must have at least one step".to_string());
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                problems.push(format!("Step {} has an empty name", i));
            } else if !seen.insert(step.name.as_str()) {
                problems.push(format!("Duplicate step name '{}'", step.name));
            }

            if step.adapter.trim().is_empty() {
                problems.push(format!("Step '{}' does not name an adapter", step.name));
            }
            if step.action.trim().is_empty() {
                problems.push(format!("Step '{}' does not name an action", step.name));
            }
        }

        problems
    }

    /// Validate the playbook definition
    pub fn validate(&self) -> Result<()> {
        let problems = self.structural_problems();
        if !problems.is_empty() {
            anyhow::bail!("{}", problems.join("; "));
        }
        Ok(())
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// A single step in a playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name (unique within playbook)
    pub name: String,

    /// Name of a registered adapter
    pub adapter: String,

    /// Action identifier understood by that adapter
    pub action: String,

    #[serde(default)]
    pub params: Params,

    /// Requested mode; the orchestrator may downgrade it
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Step-level retry of the whole `execute` call (default: one attempt)
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl Step {
    /// Effective step-level retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_else(RetryPolicy::single_attempt)
    }
}
