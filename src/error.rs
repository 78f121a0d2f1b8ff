//! Error types for guardlog.
//!
//! All errors are strongly typed using thiserror. Input that the runtime
//! refuses to accept is a `ValidationError`; failures tied to policy lifecycle
//! or runtime resources are `ExecutionError`s. Absence of data is never an
//! error: queries over tables nobody defines simply return no rows.

use thiserror::Error;

/// Errors raised while compiling or validating formulas, batches and config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Syntax error at {offset}: {message}")]
    Syntax {
        offset: usize,
        message: String,
    },

    #[error("Unsafe rule '{rule}': variables {variables:?} do not appear in a positive body literal")]
    Unsafe {
        rule: String,
        variables: Vec<String>,
    },

    #[error("Arity mismatch for table '{table}': expected {expected}, got {actual}")]
    ArityMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Rule makes table '{table}' depend on itself in non-recursive policy '{policy}'")]
    Recursive {
        policy: String,
        table: String,
    },

    #[error("Policy '{policy}' has a cycle through negation: {}", cycle.join(" -> "))]
    Unstratifiable {
        policy: String,
        cycle: Vec<String>,
    },

    #[error("Policies would reference each other cyclically: {}", cycle.join(" -> "))]
    PolicyCycle {
        cycle: Vec<String>,
    },

    #[error("Policy '{policy}' of kind {kind} holds facts only, rejected rule '{rule}'")]
    RuleInFactStore {
        policy: String,
        kind: String,
        rule: String,
    },

    #[error("Fact '{literal}' must not contain variables")]
    NonGroundFact {
        literal: String,
    },

    #[error("Invalid rule head '{head}': {reason}")]
    InvalidHead {
        head: String,
        reason: String,
    },

    #[error("Invalid policy name '{name}'")]
    InvalidPolicyName {
        name: String,
    },

    #[error("Invalid rows: {reason}")]
    InvalidRows {
        reason: String,
    },

    #[error("Invalid simulation constraints: {reason}")]
    InvalidSimulationConstraints {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Event {index} of batch rejected: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Wraps this error as the failure of event `index` in a batch.
    #[must_use]
    pub fn in_batch(self, index: usize) -> Self {
        match self {
            already @ Self::Batch { .. } => already,
            other => Self::Batch {
                index,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through batch wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Batch { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors raised by runtime operations on well-formed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Policy already exists: {name}")]
    PolicyAlreadyExists {
        name: String,
    },

    #[error("Policy not found: {name}")]
    PolicyNotFound {
        name: String,
    },

    #[error("Policy '{name}' is referenced by {dependents:?}")]
    PolicyInUse {
        name: String,
        dependents: Vec<String>,
    },

    #[error("Policy '{name}' is built in and cannot be deleted")]
    BuiltinPolicy {
        name: String,
    },

    #[error("Simulation limit exceeded: {limit_type} (max: {max_value}, actual: {actual_value})")]
    SimulationLimitExceeded {
        limit_type: String,
        max_value: u64,
        actual_value: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for guardlog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GuardError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns the validation error, looking through batch wrappers.
    #[must_use]
    pub fn validation_root(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e.root()),
            _ => None,
        }
    }
}

/// Result type alias for guardlog operations.
pub type GuardResult<T> = Result<T, GuardError>;
