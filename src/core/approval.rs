//! Manual approval gate for runs below full automation.
//!
//! At L1 the orchestrator asks the gate before every production step and
//! after every failed step. The gate is the seam where an analyst (or a
//! chat-ops bot) plugs in.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::domain::{ErrorDetail, ExecutionMode};

/// Why approval is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// A production step is about to run
    BeforeStep,

    /// A step failed; continue with the rest of the playbook?
    AfterFailure,
}

/// Everything an approver needs to decide
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub kind: ApprovalKind,
    pub playbook: String,
    pub step: String,
    pub adapter: String,
    pub action: String,
    pub mode: ExecutionMode,

    /// The failure, for `AfterFailure` requests
    pub error: Option<ErrorDetail>,
}

impl ApprovalRequest {
    /// One-line description for prompts and logs
    pub fn summary(&self) -> String {
        match (&self.kind, &self.error) {
            (ApprovalKind::AfterFailure, Some(error)) => format!(
                "Step '{}' ({}.{}) failed with {}{}: {}. Continue playbook '{}'?",
                self.step,
                self.adapter,
                self.action,
                error.code,
                if error.retryable { " (retryable)" } else { "" },
                error.message,
                self.playbook
            ),
            _ => format!(
                "Run step '{}' ({}.{}) in {} mode for playbook '{}'?",
                self.step, self.adapter, self.action, self.mode, self.playbook
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Decides whether a paused run may proceed
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approves everything (`--yes`)
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

/// Denies everything; the safe default for unattended callers
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        warn!(step = %request.step, kind = ?request.kind, "Approval required but no approver configured");
        ApprovalDecision::Deny
    }
}

/// Prompts on stderr and reads `y`/`yes` from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleApproval;

#[async_trait]
impl ApprovalGate for ConsoleApproval {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        let prompt = request.summary();

        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            write!(stderr, "{} [y/N] ", prompt)?;
            stderr.flush()?;

            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => parse_answer(&line),
            _ => ApprovalDecision::Deny,
        }
    }
}

fn parse_answer(line: &str) -> ApprovalDecision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approve,
        _ => ApprovalDecision::Deny,
    }
}
