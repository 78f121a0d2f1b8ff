//! Events and change sets.

use serde::{Deserialize, Serialize};

use crate::rule::Formula;

/// One requested insertion or deletion of a formula in a policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    /// Policy the formula belongs to.
    pub target: String,
    pub formula: Formula,
    /// True for insertion, false for deletion.
    pub insert: bool,
}

impl Event {
    #[must_use]
    pub fn new(target: impl Into<String>, formula: impl Into<Formula>, insert: bool) -> Self {
        Self {
            target: target.into(),
            formula: formula.into(),
            insert,
        }
    }

    /// An insertion event.
    #[must_use]
    pub fn insert(target: impl Into<String>, formula: impl Into<Formula>) -> Self {
        Self::new(target, formula, true)
    }

    /// A deletion event.
    #[must_use]
    pub fn delete(target: impl Into<String>, formula: impl Into<Formula>) -> Self {
        Self::new(target, formula, false)
    }
}

/// The formulas a batch actually changed, in order of first appearance.
///
/// Inserting something already present or deleting something absent is not a
/// change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changes {
    events: Vec<Event>,
}

impl Changes {
    #[must_use]
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Formulas that were added.
    pub fn inserted(&self) -> impl Iterator<Item = &Formula> {
        self.events.iter().filter(|e| e.insert).map(|e| &e.formula)
    }

    /// Formulas that were removed.
    pub fn deleted(&self) -> impl Iterator<Item = &Formula> {
        self.events.iter().filter(|e| !e.insert).map(|e| &e.formula)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Event> {
        self.events
    }
}

impl IntoIterator for Changes {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a Changes {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
