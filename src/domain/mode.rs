//! Execution modes and automation levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a single `execute` call is allowed to touch the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Synthetic output, no external I/O, no validation
    Simulation,

    /// Validate parameters and report intent, no external I/O
    DryRun,

    /// Validate, then perform the real external effect
    #[default]
    Production,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::DryRun => "dry-run",
            Self::Production => "production",
        }
    }

    /// Whether this mode may cause external side effects
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulation" => Ok(Self::Simulation),
            "dry-run" | "dry_run" => Ok(Self::DryRun),
            "production" => Ok(Self::Production),
            other => Err(format!("Unknown execution mode: {}", other)),
        }
    }
}

/// How much of a playbook run proceeds without a human.
///
/// Serialized as the bare integers `0`, `1`, `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AutomationLevel {
    /// Advisory: production steps are downgraded to dry-run
    L0,

    /// Assisted: production steps need approval, failures pause for approval
    #[default]
    L1,

    /// Autonomous: unattended, must be explicitly enabled
    L2,
}

impl AutomationLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::L0 => 0,
            Self::L1 => 1,
            Self::L2 => 2,
        }
    }

    /// Full automation: no approval pauses at all
    pub fn is_full(&self) -> bool {
        matches!(self, Self::L2)
    }
}

impl TryFrom<u8> for AutomationLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::L0),
            1 => Ok(Self::L1),
            2 => Ok(Self::L2),
            other => Err(format!("Automation level must be 0, 1 or 2 (got {})", other)),
        }
    }
}

impl fmt::Display for AutomationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.as_u8())
    }
}

impl Serialize for AutomationLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for AutomationLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(serde_json::to_string(&ExecutionMode::DryRun).unwrap(), "\"dry-run\"");
        let parsed: ExecutionMode = serde_json::from_str("\"simulation\"").unwrap();
        assert_eq!(parsed, ExecutionMode::Simulation);
        assert_eq!("dry_run".parse::<ExecutionMode>(), Ok(ExecutionMode::DryRun));
        assert!("live".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_automation_level_from_integer() {
        let level: AutomationLevel = serde_yaml::from_str("2").unwrap();
        assert_eq!(level, AutomationLevel::L2);
        assert!(serde_yaml::from_str::<AutomationLevel>("3").is_err());
        assert!(AutomationLevel::L0 < AutomationLevel::L2);
        assert_eq!(AutomationLevel::default(), AutomationLevel::L1);
    }
}
