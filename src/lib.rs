//! # guardlog - Policy Runtime for Cloud Governance
//!
//! guardlog stores governance rules and the facts published by data sources
//! as named policies, keeps derived tables up to date as facts change, and
//! answers queries against live or hypothetical state.
//!
//! ## Core Concepts
//!
//! - **Policy**: a named theory of facts and Datalog rules. Its kind decides
//!   how derived tables are answered: on demand (`nonrecursive`), from an
//!   incrementally maintained cache (`materialized`), or not at all
//!   (`database`, `action`, which hold facts only).
//! - **Event**: the insertion or deletion of one formula in one policy.
//!   Batches of events are validated in full before anything changes.
//! - **Simulate**: answers a query as if a batch had been applied, on a
//!   private copy of the policies involved.
//! - **Subscription**: one notification per committed batch carrying a
//!   watched table's net delta.
//!
//! ## Usage
//!
//! ```rust
//! use guardlog::{PolicyKind, Runtime};
//!
//! let mut runtime = Runtime::new();
//! runtime.create_policy("nova", PolicyKind::Database)?;
//! runtime.create_policy("reach", PolicyKind::Materialized)?;
//!
//! runtime.insert("link(1, 2) link(2, 3)", "nova")?;
//! runtime.insert(
//!     "path(x, y) :- nova:link(x, y)
//!      path(x, z) :- path(x, y), nova:link(y, z)",
//!     "reach",
//! )?;
//! assert_eq!(runtime.select("path(1, x)", "reach")?, vec!["path(1, 2)", "path(1, 3)"]);
//!
//! let hypothetical = runtime.simulate_text("path(1, x)", "reach", "nova:link+(3, 4)")?;
//! assert_eq!(hypothetical.len(), 3);
//! assert_eq!(runtime.select("path(1, x)", "reach")?.len(), 2);
//! # Ok::<(), guardlog::GuardError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod literal;
pub mod rule;
pub mod schema;
pub mod value;

// Compilation and storage
pub mod compiler;
pub mod index;
pub mod theory;

// Runtime surfaces
pub mod runtime;
pub mod simulation;
pub mod subscription;

// Re-export primary types at crate root for convenience
pub use compiler::{parse, parse_formula, parse_literal, parse_query, parse_rule, parse_update_sequence};
pub use error::{ExecutionError, GuardError, GuardResult, ValidationError};
pub use index::FactStore;
pub use literal::{Fact, Literal, Term, Variable};
pub use rule::{Formula, Query, Rule, RuleId};
pub use runtime::{Changes, Event, PolicyId, PolicyInfo, Runtime, RuntimeConfig, SharedRuntime};
pub use schema::Schema;
pub use simulation::{SimulateConstraints, SimulationId};
pub use subscription::{DeltaNotification, DeltaStream, SubscriptionId};
pub use theory::{PolicyKind, Theory};
pub use value::{tuple, Tuple, Value};
