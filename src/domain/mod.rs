//! Domain types for the runbookpilot orchestrator.
//!
//! This module contains the core data structures:
//! - Result: action results, error details, validation and health values
//! - Mode: execution modes and automation levels
//! - Run: playbook execution state

pub mod mode;
pub mod result;
pub mod run;

// Re-export commonly used types
pub use mode::{AutomationLevel, ExecutionMode};
pub use result::{
    ActionResult, ErrorDetail, HealthState, HealthStatus, ValidationResult,
    ROLLBACK_NOT_SUPPORTED, VALIDATION_ERROR,
};
pub use run::{PlaybookRun, RunState, StepOutcome, StepStatus};
