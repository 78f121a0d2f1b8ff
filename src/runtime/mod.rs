//! The policy runtime.
//!
//! [`Runtime`] owns every policy, routes event batches to them, resolves
//! cross-policy references and notifies subscribers of net table deltas after
//! each committed batch. Mutators take `&mut self`; see [`SharedRuntime`] for
//! the locking wrapper.
//!
//! # Example
//!
//! ```
//! use guardlog::{PolicyKind, Runtime};
//!
//! let mut runtime = Runtime::new();
//! runtime.create_policy("nova", PolicyKind::Database).unwrap();
//! runtime.insert("server(1, \"active\") server(2, \"error\")", "nova").unwrap();
//! runtime
//!     .insert("broken(id) :- nova:server(id, \"error\")", "classification")
//!     .unwrap();
//! assert_eq!(runtime.select("broken(x)", "classification").unwrap(), vec!["broken(2)"]);
//! ```

pub mod config;
pub mod event;
pub(crate) mod policies;
pub mod shared;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use crate::compiler::{check_query_safety, parse, parse_query, parse_update_sequence};
use crate::error::{ExecutionError, GuardError, GuardResult, ValidationError};
use crate::literal::{Fact, Literal};
use crate::rule::{Formula, Query};
use crate::schema::Schema;
use crate::simulation::Sandbox;
use crate::subscription::{DeltaNotification, DeltaStream, SubscriptionId, SubscriptionRegistry};
use crate::theory::PolicyKind;
use crate::value::Tuple;

pub use config::RuntimeConfig;
pub use event::{Changes, Event};
pub use policies::{PolicyId, PolicyInfo};
pub use shared::SharedRuntime;

use policies::{strip_literal_qualifier, Policy, PolicySet};

const ABBREVIATION_LEN: usize = 5;

static POLICY_NAME: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn check_policy_name(name: &str) -> GuardResult<()> {
    let pattern = POLICY_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
        .map_err(|e| GuardError::internal(format!("policy name pattern: {e}")))?;
    if pattern.is_match(name) && !matches!(name, "not" | "true" | "false") {
        Ok(())
    } else {
        Err(ValidationError::InvalidPolicyName { name: name.to_string() }.into())
    }
}

/// The policy runtime.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    policies: PolicySet,
    schemas: BTreeMap<String, Schema>,
    subscriptions: SubscriptionRegistry,
    sequence: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(RuntimeConfig::default())
    }

    /// Create a runtime with a custom configuration.
    pub fn with_config(config: RuntimeConfig) -> GuardResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        let mut policies = PolicySet::default();
        for (name, kind) in [
            (&config.classification_policy, PolicyKind::NonRecursive),
            (&config.action_policy, PolicyKind::Action),
        ] {
            policies.insert(Policy::new(name, &abbreviate(name), kind));
        }
        Self {
            subscriptions: SubscriptionRegistry::new(config.stream_capacity),
            config,
            policies,
            schemas: BTreeMap::new(),
            sequence: 0,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Number of committed batches that changed something.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    fn is_builtin(&self, name: &str) -> bool {
        name == self.config.classification_policy || name == self.config.action_policy
    }

    // ---------------------------------------------------------------------
    // Policy lifecycle
    // ---------------------------------------------------------------------

    /// Create an empty policy. The abbreviation defaults to the first
    /// characters of the name.
    pub fn create_policy(&mut self, name: &str, kind: PolicyKind) -> GuardResult<PolicyId> {
        self.create_policy_with(name, &abbreviate(name), kind)
    }

    /// Create an empty policy with an explicit abbreviation.
    #[instrument(skip(self, kind), fields(kind = %kind))]
    pub fn create_policy_with(&mut self, name: &str, abbreviation: &str, kind: PolicyKind) -> GuardResult<PolicyId> {
        check_policy_name(name)?;
        if abbreviation.is_empty() {
            return Err(ValidationError::InvalidPolicyName {
                name: abbreviation.to_string(),
            }
            .into());
        }
        if self.policies.contains(name) {
            return Err(ExecutionError::PolicyAlreadyExists { name: name.to_string() }.into());
        }
        let policy = Policy::new(name, abbreviation, kind);
        let id = policy.info.id;
        self.policies.insert(policy);
        info!(policy = name, %id, "policy created");
        Ok(id)
    }

    /// Delete a policy no other policy references.
    ///
    /// Subscribers watching its tables see every row removed.
    #[instrument(skip(self))]
    pub fn delete_policy(&mut self, name: &str) -> GuardResult<bool> {
        if self.is_builtin(name) {
            return Err(ExecutionError::BuiltinPolicy { name: name.to_string() }.into());
        }
        if !self.policies.contains(name) {
            return Err(ExecutionError::PolicyNotFound { name: name.to_string() }.into());
        }
        let dependents = self.policies.dependents(name);
        if !dependents.is_empty() {
            return Err(ExecutionError::PolicyInUse {
                name: name.to_string(),
                dependents,
            }
            .into());
        }

        self.policies.remove(name);
        let graph = self.policies.graph();
        self.policies.settle(&graph)?;
        let notified = self.notify();
        info!(policy = name, notified, "policy deleted");
        Ok(true)
    }

    /// Metadata of one policy.
    pub fn policy(&self, name: &str) -> GuardResult<PolicyInfo> {
        Ok(self.policy_ref(name)?.info.clone())
    }

    /// Metadata of every policy, by name.
    #[must_use]
    pub fn policies(&self) -> Vec<PolicyInfo> {
        self.policies.iter().map(|p| p.info.clone()).collect()
    }

    /// Names of every policy, sorted.
    #[must_use]
    pub fn policy_names(&self) -> Vec<String> {
        self.policies.names().map(str::to_string).collect()
    }

    fn policy_ref(&self, name: &str) -> GuardResult<&Policy> {
        self.policies
            .get(name)
            .ok_or_else(|| ExecutionError::PolicyNotFound { name: name.to_string() }.into())
    }

    /// Facts followed by rules of a policy.
    pub fn rules(&self, policy: &str) -> GuardResult<Vec<Formula>> {
        Ok(self.policy_ref(policy)?.theory.formulas())
    }

    /// Every table a policy mentions, plus its declared schema tables.
    pub fn tablenames(&self, policy: &str) -> GuardResult<BTreeSet<String>> {
        let mut names = self.policy_ref(policy)?.theory.tablenames();
        if let Some(schema) = self.schemas.get(policy) {
            names.extend(schema.table_names().map(str::to_string));
        }
        Ok(names)
    }

    // ---------------------------------------------------------------------
    // Schemas
    // ---------------------------------------------------------------------

    /// Declare the tables a data source publishes.
    ///
    /// Facts the source's policy already holds must agree with the declared
    /// arities.
    #[instrument(skip(self, schema))]
    pub fn set_schema(&mut self, source: &str, schema: Schema) -> GuardResult<()> {
        if let Some(policy) = self.policies.get(source) {
            let arities = policy.theory.arity_map();
            for table in schema.table_names() {
                let (Some(expected), Some(actual)) = (arities.get(table), schema.arity(table)) else {
                    continue;
                };
                if expected != actual {
                    return Err(ValidationError::ArityMismatch {
                        table: format!("{source}:{table}"),
                        expected,
                        actual,
                    }
                    .into());
                }
            }
        }
        info!(source, tables = schema.table_names().count(), "schema set");
        self.schemas.insert(source.to_string(), schema);
        Ok(())
    }

    /// Schema declared for a data source.
    #[must_use]
    pub fn get_schema(&self, source: &str) -> Option<&Schema> {
        self.schemas.get(source)
    }

    // ---------------------------------------------------------------------
    // Updates
    // ---------------------------------------------------------------------

    /// Insert every formula in `text` into `policy`.
    pub fn insert(&mut self, text: &str, policy: &str) -> GuardResult<Changes> {
        let events = parse(text)?.into_iter().map(|f| Event::insert(policy, f)).collect();
        self.update(events)
    }

    /// Delete every formula in `text` from `policy`.
    pub fn delete(&mut self, text: &str, policy: &str) -> GuardResult<Changes> {
        let events = parse(text)?.into_iter().map(|f| Event::delete(policy, f)).collect();
        self.update(events)
    }

    /// Apply a batch atomically.
    ///
    /// Every event is validated before anything changes; the first failure is
    /// reported as [`ValidationError::Batch`] with its index. Subscribers are
    /// notified once per watched table whose contents changed.
    #[instrument(skip(self, events), fields(events = events.len()))]
    pub fn update(&mut self, events: Vec<Event>) -> GuardResult<Changes> {
        let staged = self.policies.stage(events, &self.schemas)?;
        let changed = self.policies.commit(&staged)?;
        let notified = if changed.is_empty() { 0 } else { self.notify() };
        debug!(
            changed = changed.len(),
            policies = staged.targets.len(),
            notified,
            sequence = self.sequence,
            "batch committed"
        );
        Ok(Changes::new(changed))
    }

    /// Replace the contents of `tables` in `policy` with `rows`.
    ///
    /// Subscribers are not notified; their baselines move to the new
    /// contents.
    #[instrument(skip(self, tables, rows))]
    pub fn initialize_tables<I>(&mut self, tables: &[&str], rows: I, policy: &str) -> GuardResult<()>
    where
        I: IntoIterator<Item = Fact>,
    {
        let existing = &self.policy_ref(policy)?.theory;
        let mut events = Vec::new();
        for table in tables {
            for row in existing.store().rows(table) {
                let lit = Literal::from_table_tuple(*table, row.iter().cloned());
                events.push(Event::delete(policy, lit));
            }
        }
        for fact in rows {
            if !tables.contains(&fact.table.as_str()) {
                return Err(ValidationError::InvalidRows {
                    reason: format!("row {fact} is not in any initialized table"),
                }
                .into());
            }
            events.push(Event::insert(policy, fact.to_literal()));
        }

        let staged = self.policies.stage(events, &self.schemas)?;
        let changed = self.policies.commit(&staged)?;
        let policies = &self.policies;
        self.subscriptions.refresh(|p, t| policies.rows(p, t));
        debug!(policy, tables = tables.len(), changed = changed.len(), "tables initialized");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Answer a query, one rendered row per distinct answer, sorted.
    pub fn select(&self, query: &str, policy: &str) -> GuardResult<Vec<String>> {
        self.select_query(&parse_query(query)?, policy)
    }

    /// Answer a query, rows joined by spaces.
    pub fn select_text(&self, query: &str, policy: &str) -> GuardResult<String> {
        Ok(self.select(query, policy)?.join(" "))
    }

    /// Answer a parsed query.
    pub fn select_query(&self, query: &Query, policy: &str) -> GuardResult<Vec<String>> {
        check_query_safety(query)?;
        let target = self.policy_ref(policy)?;
        let mut query = query.clone();
        for lit in query.body.iter_mut().chain(query.head.iter_mut()) {
            strip_literal_qualifier(policy, lit);
        }
        Ok(target.theory.select(&query, &self.policies.resolver(policy)))
    }

    /// Answer a query as if `events` had been applied.
    ///
    /// Nothing committed changes and no subscriber is notified, whether or
    /// not the batch is valid.
    #[instrument(skip(self, events), fields(events = events.len()))]
    pub fn simulate(&self, query: &str, policy: &str, events: Vec<Event>) -> GuardResult<Vec<String>> {
        let query = parse_query(query)?;
        self.simulate_query(&query, policy, events)
    }

    /// Answer a query as if an update sequence such as `p+(1) other:q-(2)`
    /// had been applied. Unqualified updates target `policy`.
    pub fn simulate_text(&self, query: &str, policy: &str, sequence: &str) -> GuardResult<Vec<String>> {
        let query = parse_query(query)?;
        let events = parse_update_sequence(sequence)?
            .into_iter()
            .map(|(mut lit, insert)| {
                let target = lit.theory.take().unwrap_or_else(|| policy.to_string());
                Event::new(target, lit, insert)
            })
            .collect();
        self.simulate_query(&query, policy, events)
    }

    fn simulate_query(&self, query: &Query, policy: &str, events: Vec<Event>) -> GuardResult<Vec<String>> {
        check_query_safety(query)?;
        self.config.simulate.check_events(events.len())?;
        self.policy_ref(policy)?;
        let staged = self.policies.stage(events, &self.schemas)?;
        let sandbox = Sandbox::build(&self.policies, &staged, policy, query, &self.config.simulate)?;
        let rows = sandbox.run(&staged, policy, query)?;
        debug!(policy, events = staged.events.len(), rows = rows.len(), "simulation answered");
        Ok(rows)
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    /// Call `callback` with the net delta of `policy:table` after each
    /// committed batch that changes it.
    pub fn subscribe<F>(&mut self, policy: &str, table: &str, callback: F) -> SubscriptionId
    where
        F: FnMut(&DeltaNotification) + Send + Sync + 'static,
    {
        let policies = &self.policies;
        let id = self
            .subscriptions
            .subscribe(policy, table, Box::new(callback), || policies.rows(policy, table));
        debug!(subscription = %id, policy, table, "subscribed");
        id
    }

    /// Receive the net deltas of `policy:table` on a bounded channel.
    pub fn subscribe_stream(&mut self, policy: &str, table: &str) -> DeltaStream {
        let policies = &self.policies;
        let stream = self
            .subscriptions
            .subscribe_stream(policy, table, || policies.rows(policy, table));
        debug!(subscription = %stream.subscription_id(), policy, table, "stream subscribed");
        stream
    }

    /// Remove a subscription. Returns false if unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Notifications dropped because a stream was full.
    #[must_use]
    pub const fn dropped_notifications(&self) -> u64 {
        self.subscriptions.dropped()
    }

    fn notify(&mut self) -> usize {
        self.sequence += 1;
        let policies = &self.policies;
        self.subscriptions.dispatch(self.sequence, |p, t| policies.rows(p, t))
    }

    /// Current contents of a table as seen from outside its policy.
    #[must_use]
    pub fn rows(&self, policy: &str, table: &str) -> Vec<Tuple> {
        let mut rows = self.policies.rows(policy, table);
        rows.sort();
        rows
    }
}

fn abbreviate(name: &str) -> String {
    name.chars().take(ABBREVIATION_LEN).collect()
}
