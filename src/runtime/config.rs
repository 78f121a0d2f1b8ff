//! Runtime configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compiler::is_identifier;
use crate::error::ValidationError;
use crate::simulation::SimulateConstraints;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name of the built-in non-recursive policy.
    pub classification_policy: String,
    /// Name of the built-in action policy.
    pub action_policy: String,
    /// Per-stream notification buffer capacity.
    pub stream_capacity: usize,
    /// Limits on `simulate`.
    pub simulate: SimulateConstraints,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            classification_policy: "classification".to_string(),
            action_policy: "action".to_string(),
            stream_capacity: 1024,
            simulate: SimulateConstraints::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for name in [&self.classification_policy, &self.action_policy] {
            if !is_identifier(name) {
                return Err(ValidationError::InvalidConfig {
                    reason: format!("built-in policy name '{name}' is not an identifier"),
                });
            }
        }
        if self.classification_policy == self.action_policy {
            return Err(ValidationError::InvalidConfig {
                reason: "built-in policies must have distinct names".to_string(),
            });
        }
        if self.stream_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "stream_capacity must be > 0".to_string(),
            });
        }
        self.simulate.validate().map_err(|e| ValidationError::InvalidConfig { reason: e.to_string() })
    }
}
