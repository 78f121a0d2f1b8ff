//! Hypothetical evaluation.
//!
//! A simulation validates a batch against committed state, copies the
//! policies the batch and query can observe into a sandbox, applies the batch
//! there and answers the query. Committed state is only ever read.

pub mod constraints;
pub(crate) mod sandbox;

pub use constraints::SimulateConstraints;
pub use sandbox::SimulationId;

pub(crate) use sandbox::Sandbox;
