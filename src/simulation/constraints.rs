//! Simulation constraints (resource limits).

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ValidationError};

/// Constraints that bound the work one `simulate` call may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulateConstraints {
    /// Maximum hypothetical events in one call.
    pub max_events: usize,
    /// Maximum theories copied into the sandbox.
    pub max_theories: usize,
}

impl Default for SimulateConstraints {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            max_theories: 64,
        }
    }
}

impl SimulateConstraints {
    /// Validate constraints.
    ///
    /// This must be called before the constraints are installed in a runtime.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_events == 0 {
            return Err(ValidationError::InvalidSimulationConstraints {
                reason: "max_events must be > 0".to_string(),
            });
        }
        if self.max_theories == 0 {
            return Err(ValidationError::InvalidSimulationConstraints {
                reason: "max_theories must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn check_events(&self, events: usize) -> Result<(), ExecutionError> {
        check("max_events", self.max_events, events)
    }

    pub(crate) fn check_theories(&self, theories: usize) -> Result<(), ExecutionError> {
        check("max_theories", self.max_theories, theories)
    }
}

fn check(limit_type: &str, max: usize, actual: usize) -> Result<(), ExecutionError> {
    if actual > max {
        return Err(ExecutionError::SimulationLimitExceeded {
            limit_type: limit_type.to_string(),
            max_value: max as u64,
            actual_value: actual as u64,
        });
    }
    Ok(())
}
