//! Table dependency graphs.
//!
//! An edge `p -> q` means some rule defining `p` reads `q`. Edges through a
//! negated literal are negative. The same structure, with positive edges only,
//! serves as the policy-reference graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::literal::Literal;
use crate::rule::Rule;

/// Whether a dependency goes through negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Directed graph over names with polarity-labelled edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<(String, Polarity)>>,
    nodes: BTreeSet<String>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of local table dependencies for a set of rules.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        let mut graph = Self::new();
        for rule in rules {
            graph.add_rule(rule);
        }
        graph
    }

    /// Add the edges of one rule. Qualified body literals name other policies
    /// and are not local edges.
    pub fn add_rule(&mut self, rule: &Rule) {
        self.add_node(&rule.head.table);
        for lit in rule.body.iter().filter(|l| l.theory.is_none()) {
            self.add_edge(&rule.head.table, &lit.table, polarity(lit));
        }
    }

    pub fn add_node(&mut self, name: &str) {
        if !self.nodes.contains(name) {
            self.nodes.insert(name.to_string());
        }
    }

    pub fn add_edge(&mut self, from: &str, to: &str, polarity: Polarity) {
        self.add_node(from);
        self.add_node(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert((to.to_string(), polarity));
    }

    /// Direct dependencies of a node.
    pub fn dependencies<'a>(&'a self, name: &str) -> impl Iterator<Item = (&'a str, Polarity)> + 'a {
        self.edges
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|(to, p)| (to.as_str(), *p)))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Shortest path `from -> ... -> to`, inclusive of both ends.
    #[must_use]
    pub fn path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = BTreeSet::from([from]);
        while let Some(node) = queue.pop_front() {
            for (next, _) in self.dependencies(node) {
                if !seen.insert(next) {
                    continue;
                }
                parent.insert(next, node);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cur = to;
                    while let Some(prev) = parent.get(cur) {
                        path.push((*prev).to_string());
                        cur = *prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// True if `from` depends on `to`, directly or transitively.
    #[must_use]
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        self.dependencies(from)
            .any(|(next, _)| self.path(next, to).is_some())
    }

    /// Every node reachable from `start`, including itself.
    #[must_use]
    pub fn reachable(&self, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::from([start.to_string()]);
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(node) = queue.pop_front() {
            for (next, _) in self.dependencies(&node) {
                if seen.insert(next.to_string()) {
                    queue.push_back(next.to_string());
                }
            }
        }
        seen
    }

    /// Some cycle, as `[a, b, ..., a]`, if the graph has one.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        for (from, deps) in &self.edges {
            for (to, _) in deps {
                if let Some(mut path) = self.path(to, from) {
                    path.insert(0, from.clone());
                    return Some(path);
                }
            }
        }
        None
    }

    /// A cycle that passes through at least one negative edge.
    #[must_use]
    pub fn find_negative_cycle(&self) -> Option<Vec<String>> {
        for (from, deps) in &self.edges {
            for (to, polarity) in deps {
                if *polarity != Polarity::Negative {
                    continue;
                }
                if let Some(mut path) = self.path(to, from) {
                    path.insert(0, from.clone());
                    return Some(path);
                }
            }
        }
        None
    }

    /// Assign every node a stratum.
    ///
    /// A node sits at or above the strata of its positive dependencies and
    /// strictly above its negative ones. Fails with the offending cycle when
    /// negation is recursive.
    pub fn stratify(&self) -> Result<Strata, Vec<String>> {
        if let Some(cycle) = self.find_negative_cycle() {
            return Err(cycle);
        }

        let mut strata: BTreeMap<String, usize> =
            self.nodes.iter().map(|n| (n.clone(), 0)).collect();

        // Bounded by the node count once negative cycles are excluded.
        let mut changed = true;
        while changed {
            changed = false;
            for (from, deps) in &self.edges {
                let needed = deps
                    .iter()
                    .map(|(to, polarity)| {
                        let base = strata.get(to).copied().unwrap_or(0);
                        match polarity {
                            Polarity::Positive => base,
                            Polarity::Negative => base + 1,
                        }
                    })
                    .max()
                    .unwrap_or(0);
                let current = strata.entry(from.clone()).or_insert(0);
                if needed > *current {
                    *current = needed;
                    changed = true;
                }
            }
        }

        let count = strata.values().copied().max().map_or(1, |m| m + 1);
        Ok(Strata { strata, count })
    }
}

impl DependencyGraph {
    /// Every node, dependencies before dependents. Nodes on a cycle come out
    /// in an arbitrary order relative to each other.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        fn visit<'a>(graph: &'a DependencyGraph, node: &'a str, seen: &mut BTreeSet<&'a str>, out: &mut Vec<String>) {
            if !seen.insert(node) {
                return;
            }
            for (next, _) in graph.dependencies(node) {
                visit(graph, next, seen, out);
            }
            out.push(node.to_string());
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            visit(self, node, &mut seen, &mut out);
        }
        out
    }
}

fn polarity(lit: &Literal) -> Polarity {
    if lit.negated {
        Polarity::Negative
    } else {
        Polarity::Positive
    }
}

/// Stratum assignment of a stratifiable program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strata {
    strata: BTreeMap<String, usize>,
    count: usize,
}

impl Strata {
    /// Stratum of a table. Tables the program never mentions sit at 0.
    #[must_use]
    pub fn stratum_of(&self, table: &str) -> usize {
        self.strata.get(table).copied().unwrap_or(0)
    }

    /// Number of strata.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::compiler::parse_rule;

    fn graph(rules: &[&str]) -> DependencyGraph {
        let rules: Vec<Rule> = rules.iter().map(|r| parse_rule(r).unwrap()).collect();
        DependencyGraph::from_rules(&rules)
    }

    #[test]
    fn test_recursive_cycle_found() {
        let g = graph(&["p(x) :- q(x)", "q(x) :- r(x)", "r(x) :- p(x)"]);
        let cycle = g.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(g.reaches("p", "p"));
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let g = graph(&["p(x) :- q(x)", "q(x) :- r(x)"]);
        assert!(g.find_cycle().is_none());
        assert!(g.reaches("p", "r"));
        assert!(!g.reaches("r", "p"));
    }

    #[test]
    fn test_qualified_literals_are_not_local_edges() {
        let g = graph(&["p(x) :- other:p(x)"]);
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn test_stratify_with_negation() {
        let g = graph(&[
            "reach(x, y) :- edge(x, y)",
            "reach(x, z) :- reach(x, y), edge(y, z)",
            "unreachable(x, y) :- node(x), node(y), not reach(x, y)",
        ]);
        let strata = g.stratify().unwrap();
        assert_eq!(strata.stratum_of("edge"), 0);
        assert_eq!(strata.stratum_of("reach"), 0);
        assert_eq!(strata.stratum_of("unreachable"), 1);
        assert_eq!(strata.count(), 2);
    }

    #[test]
    fn test_negative_cycle_rejected() {
        let g = graph(&["p(x) :- r(x), not q(x)", "q(x) :- r(x), not p(x)"]);
        let cycle = g.stratify().unwrap_err();
        assert!(cycle.contains(&"p".to_string()));
        assert!(cycle.contains(&"q".to_string()));
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let mut g = DependencyGraph::new();
        g.add_edge("alpha", "nova", Polarity::Positive);
        g.add_edge("nova", "keystone", Polarity::Positive);
        g.add_edge("alpha", "keystone", Polarity::Positive);
        g.add_node("zeta");
        let order = g.topological_order();
        let at = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(at("keystone") < at("nova"));
        assert!(at("nova") < at("alpha"));
    }

    #[test]
    fn test_reachable_includes_start() {
        let mut g = DependencyGraph::new();
        g.add_edge("a", "b", Polarity::Positive);
        g.add_edge("b", "c", Polarity::Positive);
        g.add_node("d");
        let r = g.reachable("a");
        assert_eq!(r.len(), 3);
        assert!(!r.contains("d"));
    }
}
