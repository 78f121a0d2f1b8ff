//! Private copies of policies for hypothetical evaluation.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ExecutionError, GuardResult};
use crate::rule::Query;
use crate::runtime::policies::{strip_literal_qualifier, PolicySet, Staged};

use super::constraints::SimulateConstraints;

/// Stable identifier for a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimulationId(Uuid);

impl SimulationId {
    /// Create a new random simulation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SimulationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SimulationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A copy of the policies one simulation can observe.
///
/// The closure is the target policy, every event target and every policy a
/// query literal names, together with everything those reach through rule
/// references after the hypothetical batch. Dropping the sandbox discards it.
pub(crate) struct Sandbox {
    id: SimulationId,
    policies: PolicySet,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("policies", &self.policies.names().collect::<Vec<_>>())
            .finish()
    }
}

impl Sandbox {
    /// Copy the closure of `target`, `staged` and `query` out of `committed`.
    pub fn build(
        committed: &PolicySet,
        staged: &Staged,
        target: &str,
        query: &Query,
        constraints: &SimulateConstraints,
    ) -> GuardResult<Self> {
        let mut roots: BTreeSet<String> = BTreeSet::from([target.to_string()]);
        roots.extend(staged.targets.iter().map(|(name, _)| name.clone()));
        for lit in query.body.iter().chain(query.head.iter()) {
            match &lit.theory {
                Some(theory) => {
                    roots.insert(theory.clone());
                }
                None => {
                    if let Some(owner) = committed.defining(&lit.table, target) {
                        roots.insert(owner.info.name.clone());
                    }
                }
            }
        }

        let closure: BTreeSet<String> = roots
            .iter()
            .flat_map(|root| staged.graph.reachable(root))
            .filter(|name| committed.contains(name))
            .collect();
        constraints.check_theories(closure.len())?;

        let mut policies = PolicySet::default();
        for name in &closure {
            if let Some(policy) = committed.get(name) {
                policies.insert(policy.clone());
            }
        }
        let id = SimulationId::new();
        debug!(simulation = %id, theories = policies.len(), "sandbox created");
        Ok(Self { id, policies })
    }

    /// Apply the hypothetical batch and answer `query` in `target`.
    pub fn run(mut self, staged: &Staged, target: &str, query: &Query) -> GuardResult<Vec<String>> {
        self.policies.commit(staged)?;
        let Some(policy) = self.policies.get(target) else {
            return Err(ExecutionError::PolicyNotFound {
                name: target.to_string(),
            }
            .into());
        };
        let mut query = query.clone();
        for lit in query.body.iter_mut().chain(query.head.iter_mut()) {
            strip_literal_qualifier(target, lit);
        }
        Ok(policy.theory.select(&query, &self.policies.resolver(target)))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        debug!(simulation = %self.id, "sandbox discarded");
    }
}
