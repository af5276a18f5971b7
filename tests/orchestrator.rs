//! Orchestrator Integration Tests
//!
//! Automation levels, approval, step retry and rollback against a
//! scripted test adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use runbookpilot::adapters::{
    ActionRules, Adapter, AdapterConfig, AdapterError, Capabilities, ManualClock, ParamRule,
    Params, RuleTable, VirusTotalAdapter,
};
use runbookpilot::core::{
    ApprovalDecision, ApprovalGate, ApprovalKind, ApprovalRequest, AutoApprove, Orchestrator,
    Playbook, RunOptions,
};
use runbookpilot::domain::{
    ActionResult, AutomationLevel, ErrorDetail, ExecutionMode, HealthState, HealthStatus,
    RunState, StepStatus, ValidationResult,
};

static RULES: RuleTable = RuleTable(&[
    ActionRules {
        action: "block",
        rules: &[ParamRule::required("target")],
    },
    ActionRules {
        action: "flaky",
        rules: &[],
    },
    ActionRules {
        action: "explode",
        rules: &[],
    },
]);

/// Firewall stand-in that records every call
struct Firewall {
    name: &'static str,
    rollback: bool,
    calls: Arc<Mutex<Vec<String>>>,
    flaky_failures: Mutex<u32>,
}

impl Firewall {
    fn new(name: &'static str, rollback: bool) -> Self {
        Self {
            name,
            rollback,
            calls: Arc::new(Mutex::new(Vec::new())),
            flaky_failures: Mutex::new(0),
        }
    }

    fn failing_flaky(self, failures: u32) -> Self {
        *self.flaky_failures.lock().unwrap() = failures;
        self
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Adapter for Firewall {
    fn name(&self) -> &str {
        self.name
    }

    fn adapter_type(&self) -> &'static str {
        "firewall"
    }

    fn initialize(&mut self, _config: AdapterConfig) -> Result<(), AdapterError> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_simulation: true,
            supports_rollback: self.rollback,
            supports_validation: true,
            max_concurrency: 2,
            supported_actions: &["block", "flaky", "explode"],
        }
    }

    async fn execute(
        &self,
        action: &str,
        params: &Params,
        mode: ExecutionMode,
    ) -> Result<ActionResult, AdapterError> {
        let target = params.get("target").and_then(|v| v.as_str()).unwrap_or("-");
        self.record(format!("execute {} {} {}", action, target, mode));

        let result = match action {
            "block" => ActionResult::succeeded(action, self.name, json!({ "blocked": target })),
            "flaky" => {
                let mut remaining = self.flaky_failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    ActionResult::failed(action, self.name, ErrorDetail::transport("FIREWALL", "timeout"))
                } else {
                    ActionResult::succeeded(action, self.name, json!({}))
                }
            }
            "explode" => ActionResult::failed(
                action,
                self.name,
                ErrorDetail::api("FIREWALL", "rule rejected", false),
            ),
            other => {
                return Err(AdapterError::UnsupportedAction {
                    adapter: self.name.to_string(),
                    action: other.to_string(),
                })
            }
        };
        Ok(result.with_metadata("mode", mode.as_str()))
    }

    fn validate_parameters(
        &self,
        action: &str,
        params: &Params,
    ) -> Result<ValidationResult, AdapterError> {
        Ok(RULES.validate(action, params))
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::new(HealthState::Healthy, "ok", 0)
    }

    async fn rollback(&self, action: &str, params: &Params) -> Result<ActionResult, AdapterError> {
        let target = params.get("target").and_then(|v| v.as_str()).unwrap_or("-");
        self.record(format!("rollback {} {}", action, target));
        Ok(ActionResult::succeeded(action, self.name, json!({ "unblocked": target })))
    }
}

/// Gate that answers with a fixed decision and remembers what it was asked
struct RecordingGate {
    decisions: HashMap<ApprovalKind, ApprovalDecision>,
    requests: Mutex<Vec<ApprovalRequest>>,
}

impl RecordingGate {
    fn new(before_step: ApprovalDecision, after_failure: ApprovalDecision) -> Arc<Self> {
        Arc::new(Self {
            decisions: HashMap::from([
                (ApprovalKind::BeforeStep, before_step),
                (ApprovalKind::AfterFailure, after_failure),
            ]),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn asked(&self) -> Vec<(ApprovalKind, String)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.kind, r.step.clone()))
            .collect()
    }
}

#[async_trait]
impl ApprovalGate for RecordingGate {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        self.requests.lock().unwrap().push(request.clone());
        self.decisions[&request.kind]
    }
}

const CONTAINMENT: &str = r#"
name: containment
steps:
  - name: block-a
    adapter: fw
    action: block
    params: { target: 10.0.0.1 }
  - name: preview
    adapter: fw
    action: block
    mode: simulation
    params: { target: 10.0.0.2 }
  - name: block-b
    adapter: fw
    action: block
    params: { target: 10.0.0.3 }
  - name: commit
    adapter: fw
    action: explode
"#;

fn setup(options: RunOptions, firewall: Firewall) -> (Orchestrator, Arc<Mutex<Vec<String>>>) {
    let calls = firewall.calls.clone();
    let mut orchestrator = Orchestrator::new(options).with_clock(Arc::new(ManualClock::new()));
    orchestrator.register(Arc::new(firewall)).unwrap();
    (orchestrator, calls)
}

fn options(level: AutomationLevel) -> RunOptions {
    RunOptions {
        automation_level: level,
        enable_l2: level == AutomationLevel::L2,
        ..Default::default()
    }
}

fn calls(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_l2_requires_enable_flag() {
    let (orchestrator, log) = setup(
        RunOptions {
            automation_level: AutomationLevel::L2,
            enable_l2: false,
            ..Default::default()
        },
        Firewall::new("fw", true),
    );
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let err = orchestrator.run_playbook(&playbook).await.unwrap_err();
    assert!(err.to_string().contains("L2"));
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn test_failure_rolls_back_in_reverse_order() {
    let (orchestrator, log) = setup(options(AutomationLevel::L2), Firewall::new("fw", true));
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert_eq!(
        run.state,
        RunState::Failed {
            step: "commit".to_string(),
            error: "FIREWALL_API_ERROR: rule rejected".to_string(),
        }
    );
    assert_eq!(run.failed_steps(), 1);

    // The simulated step is not rolled back
    assert_eq!(
        calls(&log),
        vec![
            "execute block 10.0.0.1 production",
            "execute block 10.0.0.2 simulation",
            "execute block 10.0.0.3 production",
            "execute explode - production",
            "rollback block 10.0.0.3",
            "rollback block 10.0.0.1",
        ]
    );
    let rolled_back: Vec<_> = run.rollbacks.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(rolled_back, vec!["block-b", "block-a"]);
    assert!(run.rollbacks.iter().all(|r| r.status == StepStatus::Succeeded));
}

#[tokio::test]
async fn test_no_rollback_without_capability() {
    let (orchestrator, log) = setup(options(AutomationLevel::L2), Firewall::new("fw", false));
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(!run.is_success());
    assert!(run.rollbacks.is_empty());
    assert!(calls(&log).iter().all(|c| !c.starts_with("rollback")));
}

#[tokio::test]
async fn test_l0_downgrades_production_to_dry_run() {
    let gate = RecordingGate::new(ApprovalDecision::Deny, ApprovalDecision::Deny);
    let (orchestrator, log) = setup(options(AutomationLevel::L0), Firewall::new("fw", true));
    let orchestrator = orchestrator.with_approval(gate.clone());

    let playbook = Playbook::from_yaml(
        r#"
name: observe
steps:
  - name: block-a
    adapter: fw
    action: block
    params: { target: 10.0.0.1 }
"#,
    )
    .unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(run.is_success());
    assert_eq!(run.steps[0].mode, ExecutionMode::DryRun);
    assert_eq!(calls(&log), vec!["execute block 10.0.0.1 dry-run"]);
    // Nothing live ran, so nobody was asked
    assert!(gate.asked().is_empty());
}

#[tokio::test]
async fn test_dry_run_flag_overrides_level() {
    let (orchestrator, log) = setup(
        RunOptions {
            dry_run: true,
            ..options(AutomationLevel::L2)
        },
        Firewall::new("fw", true),
    );
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(calls(&log).iter().all(|c| !c.ends_with("production")));
    assert_eq!(run.step("block-a").unwrap().mode, ExecutionMode::DryRun);
    // The test adapter still fails `explode` in dry-run; nothing live to undo
    assert!(run.rollbacks.is_empty());
}

#[tokio::test]
async fn test_l1_asks_before_each_live_step() {
    let gate = RecordingGate::new(ApprovalDecision::Approve, ApprovalDecision::Approve);
    let (orchestrator, _) = setup(options(AutomationLevel::L1), Firewall::new("fw", true));
    let orchestrator = orchestrator.with_approval(gate.clone());
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert_eq!(
        gate.asked(),
        vec![
            (ApprovalKind::BeforeStep, "block-a".to_string()),
            (ApprovalKind::BeforeStep, "block-b".to_string()),
            (ApprovalKind::BeforeStep, "commit".to_string()),
            (ApprovalKind::AfterFailure, "commit".to_string()),
        ]
    );
    // The approver accepted the failure, so the run completes
    assert!(run.is_success());
    assert_eq!(run.step("commit").unwrap().status, StepStatus::FailedContinued);
    assert!(run.rollbacks.is_empty());
}

#[tokio::test]
async fn test_l1_denial_aborts_and_rolls_back() {
    let gate = RecordingGate::new(ApprovalDecision::Approve, ApprovalDecision::Deny);
    let (orchestrator, log) = setup(options(AutomationLevel::L1), Firewall::new("fw", true));
    let orchestrator = orchestrator.with_approval(gate.clone());
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(matches!(run.state, RunState::Failed { ref step, .. } if step == "commit"));
    let failure_request = gate.requests.lock().unwrap().last().cloned().unwrap();
    assert_eq!(failure_request.error.unwrap().code, "FIREWALL_API_ERROR");
    assert!(calls(&log).contains(&"rollback block 10.0.0.1".to_string()));
}

#[tokio::test]
async fn test_l1_denied_step_never_runs() {
    let gate = RecordingGate::new(ApprovalDecision::Deny, ApprovalDecision::Deny);
    let (orchestrator, log) = setup(options(AutomationLevel::L1), Firewall::new("fw", true));
    let orchestrator = orchestrator.with_approval(gate);
    let playbook = Playbook::from_yaml(CONTAINMENT).unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert_eq!(
        run.state,
        RunState::Aborted {
            step: "block-a".to_string(),
            reason: "Approval denied".to_string(),
        }
    );
    assert_eq!(run.steps[0].status, StepStatus::Skipped);
    assert!(calls(&log).is_empty());
}

#[tokio::test]
async fn test_step_retry_reissues_retryable_failures() {
    let (orchestrator, log) = setup(
        options(AutomationLevel::L2),
        Firewall::new("fw", true).failing_flaky(2),
    );
    let playbook = Playbook::from_yaml(
        r#"
name: retrying
steps:
  - name: wobble
    adapter: fw
    action: flaky
    retry: { max_attempts: 3, backoff_ms: 50 }
"#,
    )
    .unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(run.is_success());
    assert_eq!(run.steps[0].attempts, 3);
    assert_eq!(calls(&log).len(), 3);
}

#[tokio::test]
async fn test_step_without_retry_runs_once() {
    let (orchestrator, log) = setup(
        options(AutomationLevel::L2),
        Firewall::new("fw", true).failing_flaky(1),
    );
    let playbook = Playbook::from_yaml(
        r#"
name: single
steps:
  - name: wobble
    adapter: fw
    action: flaky
"#,
    )
    .unwrap();

    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    assert!(!run.is_success());
    assert_eq!(run.steps[0].attempts, 1);
    assert!(run.steps[0].result.as_ref().unwrap().is_retryable());
    assert_eq!(calls(&log).len(), 1);
}

const HASH_AFTER_BLOCK: &str = r#"
name: fingerprint
steps:
  - name: block-a
    adapter: fw
    action: block
    params: { target: 10.0.0.1 }
  - name: hash
    adapter: virustotal
    action: calculate_hash
    params: { data: hello world }
"#;

#[tokio::test]
async fn test_rejected_step_fails_run_and_rolls_back() {
    let gate = RecordingGate::new(ApprovalDecision::Approve, ApprovalDecision::Approve);
    let (mut orchestrator, log) = setup(options(AutomationLevel::L1), Firewall::new("fw", true));
    // Registered without initialize: every call is refused
    orchestrator.register(Arc::new(VirusTotalAdapter::new())).unwrap();
    let orchestrator = orchestrator.with_approval(gate.clone());

    let playbook = Playbook::from_yaml(HASH_AFTER_BLOCK).unwrap();
    let run = orchestrator.run_playbook(&playbook).await.unwrap();

    match &run.state {
        RunState::Failed { step, error } => {
            assert_eq!(step, "hash");
            assert!(error.starts_with("NOT_INITIALIZED: "), "{}", error);
        }
        other => panic!("unexpected state: {:?}", other),
    }

    let hash = run.step("hash").unwrap();
    assert_eq!(hash.status, StepStatus::Failed);
    assert!(hash.result.is_none());
    assert!(hash.note.as_deref().unwrap().starts_with("NOT_INITIALIZED"));

    // The earlier production step is undone
    assert_eq!(
        calls(&log),
        vec!["execute block 10.0.0.1 production", "rollback block 10.0.0.1"]
    );
    assert_eq!(run.rollbacks.len(), 1);
    assert!(run.completed_at.is_some());

    // Refusals are not offered for approval
    assert_eq!(
        gate.asked(),
        vec![
            (ApprovalKind::BeforeStep, "block-a".to_string()),
            (ApprovalKind::BeforeStep, "hash".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_validate_playbook_reports_every_problem() {
    let mut orchestrator = Orchestrator::new(RunOptions::default());
    orchestrator.register(Arc::new(Firewall::new("fw", true))).unwrap();
    orchestrator
        .register_with(Arc::new(Firewall::new("fw-old", true)), false)
        .unwrap();

    let playbook = Playbook::from_yaml(
        r#"
name: broken
steps:
  - name: no-adapter
    adapter: edr
    action: isolate
  - name: no-action
    adapter: fw
    action: reboot
  - name: no-target
    adapter: fw
    action: block
  - name: disabled
    adapter: fw-old
    action: block
    params: { target: 10.0.0.9 }
"#,
    )
    .unwrap();

    let problems = orchestrator.validate_playbook(&playbook, true);
    assert_eq!(
        problems,
        vec![
            "Step 'no-adapter': unknown adapter 'edr'".to_string(),
            "Step 'no-action': adapter 'fw' does not support action 'reboot'".to_string(),
            "Step 'no-target': Parameter 'target' is required for block".to_string(),
            "Step 'disabled': adapter 'fw-old' is disabled".to_string(),
        ]
    );

    // Parameter problems only surface when asked for
    assert_eq!(orchestrator.validate_playbook(&playbook, false).len(), 3);

    let err = orchestrator.run_playbook(&playbook).await.unwrap_err();
    assert!(err.to_string().contains("unknown adapter 'edr'"));
}

#[tokio::test]
async fn test_health_and_listing() {
    let mut orchestrator = Orchestrator::new(RunOptions::default()).with_approval(Arc::new(AutoApprove));
    orchestrator.register(Arc::new(Firewall::new("fw", true))).unwrap();

    let listing = orchestrator.adapters();
    assert_eq!(listing[0].adapter_type, "firewall");
    assert!(listing[0].capabilities.supports_rollback);

    let health = orchestrator.health().await;
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].1.status, HealthState::Healthy);
}
