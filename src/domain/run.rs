//! Playbook run state.
//!
//! A run is held in memory for the duration of one `run_playbook` call and
//! handed back to the caller; nothing is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mode::{AutomationLevel, ExecutionMode};
use super::result::ActionResult;

/// A single execution of a playbook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the playbook being executed
    pub playbook_name: String,

    /// Automation level the run executed under
    pub automation_level: AutomationLevel,

    pub state: RunState,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Outcome of each step, in execution order
    pub steps: Vec<StepOutcome>,

    /// Compensating rollbacks issued after an abort, most recent step first
    pub rollbacks: Vec<StepOutcome>,
}

impl PlaybookRun {
    pub fn new(playbook_name: String, automation_level: AutomationLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            playbook_name,
            automation_level,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            rollbacks: Vec::new(),
        }
    }

    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    /// Number of steps that ended in failure
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }
}

/// State of a playbook run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// Steps are still executing
    Running,

    /// Every step ran (failures approved to continue are allowed)
    Completed,

    /// A step failed and the run stopped
    Failed { step: String, error: String },

    /// An approval was denied before a step ran
    Aborted { step: String, reason: String },
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub adapter: String,
    pub action: String,

    /// Mode the step actually executed in (after automation gating)
    pub mode: ExecutionMode,

    pub status: StepStatus,

    /// Orchestrator-level attempts (adapter-level retries are in result metadata)
    pub attempts: u32,

    /// Adapter result; absent when the step never reached the adapter
    pub result: Option<ActionResult>,

    /// Why the step did not reach the adapter, or why it is considered failed
    pub note: Option<String>,
}

impl StepOutcome {
    pub fn error_code(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error_code())
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,

    /// Failed, but an approver chose to continue the run
    FailedContinued,

    /// Not executed (approval denied)
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_running() {
        let run = PlaybookRun::new("triage".into(), AutomationLevel::L1);
        assert_eq!(run.state, RunState::Running);
        assert!(run.completed_at.is_none());
        assert!(!run.is_success());
    }

    #[test]
    fn test_finish_sets_completion_time() {
        let mut run = PlaybookRun::new("triage".into(), AutomationLevel::L2);
        run.finish(RunState::Completed);
        assert!(run.is_success());
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_run_state_serialization() {
        let state = RunState::Failed {
            step: "enrich".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["step"], "enrich");
    }
}
