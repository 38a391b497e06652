//! Typed failure taxonomy for the playbook engine.

use thiserror::Error;

/// Security violations raised by the admission gate. All are terminal;
/// none are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("empty playbook content")]
    EmptyContent,

    #[error("missing playbook hash")]
    MissingHash,

    #[error("missing playbook signature")]
    MissingSignature,

    #[error("hash mismatch: expected {expected}, got {calculated}")]
    HashMismatch { expected: String, calculated: String },

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("playbook status is '{0}', expected 'approved' or 'test'")]
    NotApproved(String),

    #[error("invalid signing public key: expected {expected} bytes, got {actual}")]
    InvalidPublicKey { expected: usize, actual: usize },
}

/// A playbook that could not be turned into a valid AST.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("YAML parse failed: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The playbook is valid but does not target this host. Kept distinct
    /// from [`ParseError::Validation`] so the executor can classify it as a
    /// rejection rather than a parse failure.
    #[error("playbook does not support platform '{0}'")]
    PlatformUnsupported(String),
}

/// A structurally valid document that violates the playbook schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation error in '{field}': {message}")]
pub struct ValidationError {
    /// Path of the offending field, e.g. `tasks[2].action`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures while evaluating a `when:` expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unbalanced parentheses in condition: {0}")]
    UnbalancedParens(String),

    #[error("invalid condition syntax: {0}")]
    InvalidSyntax(String),

    #[error("numeric comparison requires numeric values: {0}")]
    NonNumericOperand(String),

    #[error("unknown task result property: {0}")]
    UnknownProperty(String),
}

/// Failures while substituting variables into task parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("variable '{{{{ {0} }}}}' not found")]
    NotFound(String),

    #[error("unknown property '{property}' on task result '{task}'")]
    UnknownProperty { task: String, property: String },
}
