//! Core orchestration logic.
//!
//! This module contains:
//! - Playbook: Playbook definitions and loading
//! - Approval: Manual approval gate for L0/L1 runs
//! - Orchestrator: Main execution engine

pub mod approval;
pub mod orchestrator;
pub mod playbook;

// Re-export commonly used types
pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalKind, ApprovalRequest, AutoApprove, ConsoleApproval,
    DenyAll,
};
pub use orchestrator::{AdapterSummary, Orchestrator, RunOptions};
pub use playbook::{Playbook, Step};
