//! runbookpilot - Security playbook orchestrator
//!
//! Runs response playbooks against security tooling through a uniform
//! adapter contract, with three execution modes and graded automation.
//!
//! # Architecture
//!
//! - Every integration implements [`adapters::Adapter`]
//! - Each call runs in simulation, dry-run or production mode
//! - Production calls are validated, rate limited and retried
//! - Runs below full automation pause for approval
//!
//! # Modules
//!
//! - `adapters`: External system integrations (VirusTotal) and their plumbing
//! - `core`: Orchestration logic (Playbook, Approval, Orchestrator)
//! - `domain`: Data structures (ActionResult, ExecutionMode, PlaybookRun)
//! - `config`: Config file discovery and loading
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check a playbook against the configured adapters
//! runbookpilot validate --input playbooks/phishing.yaml
//!
//! # Run it with every production step downgraded to dry-run
//! runbookpilot run --input playbooks/phishing.yaml --dry-run
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{create_adapter, Adapter, AdapterConfig, AdapterError, VirusTotalAdapter};
pub use core::{Orchestrator, Playbook, RunOptions};
pub use domain::{ActionResult, AutomationLevel, ExecutionMode, PlaybookRun, RunState};
