//! Main orchestrator for playbook execution.
//!
//! Resolves adapters by name, applies the automation level and the global
//! dry-run switch to each step's mode, bounds concurrency per adapter,
//! asks the approval gate where the automation level requires it, and
//! rolls back completed production steps when a run aborts.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    create_adapter, retry_with_policy, Adapter, AdapterConfig, AdapterError, Capabilities, Clock,
    SystemClock,
};
use crate::domain::{
    ActionResult, AutomationLevel, ErrorDetail, ExecutionMode, HealthStatus, PlaybookRun,
    RunState, StepOutcome, StepStatus,
};

use super::approval::{ApprovalDecision, ApprovalGate, ApprovalKind, ApprovalRequest, DenyAll};
use super::playbook::{Playbook, Step};

/// Run-wide switches handed over by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub automation_level: AutomationLevel,

    /// Must be set for `L2` runs
    pub enable_l2: bool,

    /// Force every production step to dry-run
    pub dry_run: bool,

    /// Log step outputs at info level
    pub verbose: bool,
}

/// Registered adapter plus its admission-control permits
struct Registered {
    adapter: Arc<dyn Adapter>,
    enabled: bool,
    permits: Arc<Semaphore>,
}

/// Listing entry for a registered adapter
#[derive(Debug, Clone, Serialize)]
pub struct AdapterSummary {
    pub name: String,
    pub adapter_type: String,
    pub enabled: bool,
    pub capabilities: Capabilities,
}

/// Why a step attempt did not succeed
#[derive(Debug)]
enum StepFailure {
    Operational(ActionResult),
    Misuse(AdapterError),
}

impl StepFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Operational(result) => result.is_retryable(),
            Self::Misuse(_) => false,
        }
    }
}

/// Main playbook orchestrator
pub struct Orchestrator {
    adapters: BTreeMap<String, Registered>,
    options: RunOptions,
    approval: Arc<dyn ApprovalGate>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Create an orchestrator with no adapters and a deny-all approval gate
    pub fn new(options: RunOptions) -> Self {
        Self {
            adapters: BTreeMap::new(),
            options,
            approval: Arc::new(DenyAll),
            clock: Arc::new(SystemClock),
        }
    }

    /// Build every configured adapter and register it
    pub fn from_configs(configs: Vec<AdapterConfig>, options: RunOptions) -> Result<Self> {
        let mut orchestrator = Self::new(options);
        for config in configs {
            let name = config.name.clone();
            let enabled = config.enabled;
            let adapter = create_adapter(config)
                .with_context(|| format!("Failed to create adapter '{}'", name))?;
            orchestrator.register_with(Arc::from(adapter), enabled)?;
        }
        Ok(orchestrator)
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    /// Clock used for step-level retry backoff
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register an enabled adapter under its name
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> Result<()> {
        self.register_with(adapter, true)
    }

    pub fn register_with(&mut self, adapter: Arc<dyn Adapter>, enabled: bool) -> Result<()> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            anyhow::bail!("Adapter '{}' is already registered", name);
        }

        let permits = adapter.capabilities().max_concurrency.max(1);
        debug!(adapter = %name, permits, enabled, "Registering adapter");

        self.adapters.insert(
            name,
            Registered {
                adapter,
                enabled,
                permits: Arc::new(Semaphore::new(permits)),
            },
        );
        Ok(())
    }

    /// Look up an adapter by name
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).map(|r| r.adapter.clone())
    }

    /// Registered adapters, sorted by name
    pub fn adapters(&self) -> Vec<AdapterSummary> {
        self.adapters
            .iter()
            .map(|(name, r)| AdapterSummary {
                name: name.clone(),
                adapter_type: r.adapter.adapter_type().to_string(),
                enabled: r.enabled,
                capabilities: r.adapter.capabilities(),
            })
            .collect()
    }

    /// Health check every registered adapter
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        let mut report = Vec::with_capacity(self.adapters.len());
        for (name, registered) in &self.adapters {
            report.push((name.clone(), registered.adapter.health_check().await));
        }
        report
    }

    /// Mode a step requesting `requested` will actually run in
    pub fn effective_mode(&self, requested: ExecutionMode) -> ExecutionMode {
        match requested {
            ExecutionMode::Production
                if self.options.dry_run || self.options.automation_level == AutomationLevel::L0 =>
            {
                ExecutionMode::DryRun
            }
            mode => mode,
        }
    }

    /// Every problem that would stop the playbook from running.
    ///
    /// With `check_params`, each step's parameters are also checked against
    /// its adapter's rules.
    pub fn validate_playbook(&self, playbook: &Playbook, check_params: bool) -> Vec<String> {
        let mut problems = playbook.structural_problems();

        for step in &playbook.steps {
            let Some(registered) = self.adapters.get(&step.adapter) else {
                problems.push(format!(
                    "Step '{}': unknown adapter '{}'",
                    step.name, step.adapter
                ));
                continue;
            };

            if !registered.enabled {
                problems.push(format!(
                    "Step '{}': adapter '{}' is disabled",
                    step.name, step.adapter
                ));
            }

            let capabilities = registered.adapter.capabilities();
            if !capabilities.supports_action(&step.action) {
                problems.push(format!(
                    "Step '{}': adapter '{}' does not support action '{}'",
                    step.name, step.adapter, step.action
                ));
                continue;
            }

            if step.mode == ExecutionMode::Simulation && !capabilities.supports_simulation {
                problems.push(format!(
                    "Step '{}': adapter '{}' cannot simulate",
                    step.name, step.adapter
                ));
            }

            if check_params && capabilities.supports_validation {
                match registered
                    .adapter
                    .validate_parameters(&step.action, &step.params)
                {
                    Ok(validation) => problems.extend(
                        validation
                            .errors
                            .into_iter()
                            .map(|e| format!("Step '{}': {}", step.name, e)),
                    ),
                    Err(e) => problems.push(format!("Step '{}': {}", step.name, e)),
                }
            }
        }

        problems
    }

    /// Execute a playbook
    #[instrument(skip(self, playbook), fields(playbook = %playbook.name, level = %self.options.automation_level))]
    pub async fn run_playbook(&self, playbook: &Playbook) -> Result<PlaybookRun> {
        let level = self.options.automation_level;
        if level.is_full() && !self.options.enable_l2 {
            anyhow::bail!("Automation level L2 is disabled; pass --enable-l2 to allow unattended runs");
        }

        let problems = self.validate_playbook(playbook, false);
        if !problems.is_empty() {
            anyhow::bail!(
                "Playbook '{}' is invalid:\n  - {}",
                playbook.name,
                problems.join("\n  - ")
            );
        }

        let mut run = PlaybookRun::new(playbook.name.clone(), level);
        info!(run_id = %run.id, steps = playbook.steps.len(), "Starting playbook run");

        // Production steps that succeeded, in order, for rollback
        let mut completed: Vec<&Step> = Vec::new();

        for step in &playbook.steps {
            let registered = self
                .adapters
                .get(&step.adapter)
                .with_context(|| format!("Adapter '{}' disappeared", step.adapter))?;
            let mode = self.effective_mode(step.mode);

            if mode.is_live() && !level.is_full() {
                let request = self.approval_request(playbook, step, mode, ApprovalKind::BeforeStep, None);
                if self.approval.decide(&request).await == ApprovalDecision::Deny {
                    warn!(step = %step.name, "Step not approved, aborting run");
                    run.steps.push(StepOutcome {
                        step: step.name.clone(),
                        adapter: step.adapter.clone(),
                        action: step.action.clone(),
                        mode,
                        status: StepStatus::Skipped,
                        attempts: 0,
                        result: None,
                        note: Some("Approval denied".to_string()),
                    });
                    self.rollback_completed(&mut run, &completed).await;
                    run.finish(RunState::Aborted {
                        step: step.name.clone(),
                        reason: "Approval denied".to_string(),
                    });
                    return Ok(run);
                }
            }

            let mut outcome = self.execute_step(step, registered, mode).await;

            if outcome.status == StepStatus::Succeeded {
                if mode.is_live() {
                    completed.push(step);
                }
                run.steps.push(outcome);
                continue;
            }

            let error = outcome
                .result
                .as_ref()
                .and_then(|r| r.error.clone());

            // Contract misuse leaves no result to approve; abort straight away
            let misuse = outcome.result.is_none();
            if !level.is_full() && !misuse {
                let request =
                    self.approval_request(playbook, step, mode, ApprovalKind::AfterFailure, error.clone());
                if self.approval.decide(&request).await == ApprovalDecision::Approve {
                    info!(step = %step.name, "Failure approved, continuing");
                    outcome.status = StepStatus::FailedContinued;
                    run.steps.push(outcome);
                    continue;
                }
            }

            let message = error
                .map(|e| format!("{}: {}", e.code, e.message))
                .or_else(|| outcome.note.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            error!(step = %step.name, error = %message, "Step failed, aborting run");

            run.steps.push(outcome);
            self.rollback_completed(&mut run, &completed).await;
            run.finish(RunState::Failed {
                step: step.name.clone(),
                error: message,
            });
            return Ok(run);
        }

        info!(run_id = %run.id, "Playbook run completed");
        run.finish(RunState::Completed);
        Ok(run)
    }

    /// Execute one step under its step-level retry policy
    async fn execute_step(&self, step: &Step, registered: &Registered, mode: ExecutionMode) -> StepOutcome {
        let policy = step.retry_policy();
        let adapter = &registered.adapter;
        let permits = &registered.permits;

        info!(step = %step.name, adapter = %step.adapter, action = %step.action, %mode, "Executing step");

        let outcome = retry_with_policy(
            &policy,
            self.clock.as_ref(),
            StepFailure::is_retryable,
            |_| async move {
                // Registry semaphores are never closed
                let _permit = permits.acquire().await.ok();
                match adapter.execute(&step.action, &step.params, mode).await {
                    Ok(result) if result.success => Ok(result),
                    Ok(result) => Err(StepFailure::Operational(result)),
                    Err(e) => Err(StepFailure::Misuse(e)),
                }
            },
        )
        .await;

        let (status, result, note) = match outcome.value {
            Ok(result) => {
                if self.options.verbose {
                    info!(step = %step.name, output = ?result.output, "Step output");
                } else {
                    debug!(step = %step.name, output = ?result.output, "Step output");
                }
                (StepStatus::Succeeded, Some(result), None)
            }
            Err(StepFailure::Operational(result)) => (StepStatus::Failed, Some(result), None),
            Err(StepFailure::Misuse(e)) => {
                error!(step = %step.name, adapter = %step.adapter, code = e.code(), error = %e, "Adapter rejected step");
                (StepStatus::Failed, None, Some(format!("{}: {}", e.code(), e)))
            }
        };

        StepOutcome {
            step: step.name.clone(),
            adapter: step.adapter.clone(),
            action: step.action.clone(),
            mode,
            status,
            attempts: outcome.attempts,
            result,
            note,
        }
    }

    /// Undo completed production steps, most recent first
    async fn rollback_completed(&self, run: &mut PlaybookRun, completed: &[&Step]) {
        for step in completed.iter().rev() {
            let Some(registered) = self.adapters.get(&step.adapter) else {
                continue;
            };

            if !registered.adapter.capabilities().supports_rollback {
                debug!(step = %step.name, "Adapter cannot roll back, skipping");
                continue;
            }

            info!(step = %step.name, adapter = %step.adapter, "Rolling back step");
            let (status, result, note) = match registered
                .adapter
                .rollback(&step.action, &step.params)
                .await
            {
                Ok(result) if result.success => (StepStatus::Succeeded, Some(result), None),
                Ok(result) => (StepStatus::Failed, Some(result), None),
                Err(e) => {
                    warn!(step = %step.name, error = %e, "Rollback refused");
                    (StepStatus::Failed, None, Some(e.to_string()))
                }
            };

            run.rollbacks.push(StepOutcome {
                step: step.name.clone(),
                adapter: step.adapter.clone(),
                action: step.action.clone(),
                mode: ExecutionMode::Production,
                status,
                attempts: 1,
                result,
                note,
            });
        }
    }

    fn approval_request(
        &self,
        playbook: &Playbook,
        step: &Step,
        mode: ExecutionMode,
        kind: ApprovalKind,
        error: Option<ErrorDetail>,
    ) -> ApprovalRequest {
        ApprovalRequest {
            kind,
            playbook: playbook.name.clone(),
            step: step.name.clone(),
            adapter: step.adapter.clone(),
            action: step.action.clone(),
            mode,
            error,
        }
    }
}
