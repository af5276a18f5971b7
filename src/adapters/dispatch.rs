//! Execution mode dispatcher.
//!
//! Routes one `execute` call to the simulated, dry-run or production path.
//! Adapters describe their actions through [`ActionHandler`]; the
//! dispatcher owns the mode semantics so every adapter gets them the same:
//!
//! - simulation: no validation, no external I/O, synthetic output
//! - dry-run: validation only, no external I/O
//! - production: validation, then the real call under the retry policy

use std::fmt;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::domain::{ActionResult, ErrorDetail, ExecutionMode, ValidationResult};

use super::rate_limit::Clock;
use super::retry::{retry_with_policy, RetryPolicy};
use super::{AdapterError, Params};

/// Action-level behaviour of an initialized adapter
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Closed set of actions this adapter understands
    type Action: Copy + Send + Sync + fmt::Debug;

    /// Name reported as `ActionResult.executor`
    fn executor_name(&self) -> &str;

    fn parse_action(&self, action: &str) -> Option<Self::Action>;

    fn validate(&self, action: &str, params: &Params) -> ValidationResult;

    /// Output for simulation mode.
    ///
    /// Must not perform external I/O. Purely local computations may still
    /// run for real.
    fn simulate(&self, action: Self::Action, params: &Params) -> Result<Value, ErrorDetail>;

    /// One real attempt at the action (parameters already validated)
    async fn perform(&self, action: Self::Action, params: &Params) -> Result<Value, ErrorDetail>;

    fn retry_policy(&self) -> &RetryPolicy;

    /// Clock used for backoff sleeps
    fn clock(&self) -> &dyn Clock;
}

/// Run `action` through the path selected by `mode`
pub async fn dispatch<H: ActionHandler>(
    handler: &H,
    action: &str,
    params: &Params,
    mode: ExecutionMode,
) -> Result<ActionResult, AdapterError> {
    let executor = handler.executor_name();
    let parsed = handler
        .parse_action(action)
        .ok_or_else(|| AdapterError::UnsupportedAction {
            adapter: executor.to_string(),
            action: action.to_string(),
        })?;

    debug!(executor, action, %mode, "Dispatching action");

    let result = match mode {
        ExecutionMode::Simulation => match handler.simulate(parsed, params) {
            Ok(output) => ActionResult::succeeded(action, executor, output),
            Err(error) => ActionResult::failed(action, executor, error),
        },

        ExecutionMode::DryRun => {
            let validation = handler.validate(action, params);
            if validation.valid {
                ActionResult::succeeded(
                    action,
                    executor,
                    json!({ "dry_run": true, "params_valid": true, "action": action }),
                )
            } else {
                validation_failure(action, executor, validation)
            }
        }

        ExecutionMode::Production => {
            let validation = handler.validate(action, params);
            if !validation.valid {
                validation_failure(action, executor, validation)
            } else {
                let outcome = retry_with_policy(
                    handler.retry_policy(),
                    handler.clock(),
                    |e: &ErrorDetail| e.retryable,
                    |_| handler.perform(parsed, params),
                )
                .await;

                let result = match outcome.value {
                    Ok(output) => ActionResult::succeeded(action, executor, output),
                    Err(error) => {
                        info!(
                            executor,
                            action,
                            code = %error.code,
                            retryable = error.retryable,
                            attempts = outcome.attempts,
                            "Action failed"
                        );
                        ActionResult::failed(action, executor, error)
                    }
                };
                result.with_metadata("attempts", outcome.attempts)
            }
        }
    };

    Ok(result.with_metadata("mode", mode.as_str()))
}

fn validation_failure(action: &str, executor: &str, validation: ValidationResult) -> ActionResult {
    ActionResult::failed(action, executor, ErrorDetail::validation(validation.message()))
        .with_metadata("validation_errors", validation.errors)
}
