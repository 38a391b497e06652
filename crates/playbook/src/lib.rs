//! Signed playbook verification and execution engine.
//!
//! Playbooks are YAML documents describing an ordered list of desired system
//! changes. Every playbook arrives wrapped in a signed envelope and MUST pass
//! the full verification chain (SHA-256 hash → Ed25519 signature → approval
//! status) before anything else happens to it. A playbook that fails any
//! check is rejected outright; no task runs, no content is interpreted.
//!
//! The crate is organized around a few pieces:
//! - [`verify::Verifier`] — the admission gate
//! - [`parser::Parser`] — YAML → validated [`types::Playbook`] AST
//! - [`vars::Variables`] — three-tier variable resolution and substitution
//! - [`conditions::Condition`] — `when:` expression evaluation
//! - [`executor::Executor`] — the task loop, retries, handlers, reporting
//! - [`actions`] — the action handlers that touch the host OS

pub mod actions;
pub mod cancel;
pub mod conditions;
pub mod error;
pub mod executor;
pub mod parser;
pub mod report;
pub mod types;
pub mod vars;
pub mod verify;

pub use cancel::CancelToken;
pub use error::{ConditionError, ParseError, SecurityError, ValidationError, VariableError};
pub use executor::{Executor, ExecutorConfig};
pub use parser::Parser;
pub use types::{
    ExecutionReport, Playbook, PlaybookStatus, ReportStatus, SignedPlaybook, Task, TaskResult,
    TaskStatus, VerificationRecord,
};
pub use vars::Variables;
pub use verify::Verifier;
