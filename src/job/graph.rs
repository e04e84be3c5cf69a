// src/job/graph.rs

use std::collections::{HashMap, HashSet};

use crate::job::spec::JobId;

/// Internal node structure: stores immediate prerequisites and dependents.
#[derive(Debug, Clone, Default)]
struct DepNode {
    /// Whether a job with this identity was actually added (as opposed to
    /// only being named as someone's prerequisite).
    known: bool,
    /// Direct prerequisites: jobs that must finish before this one can run.
    prereqs: Vec<JobId>,
    /// Direct dependents: jobs that list this one as a prerequisite.
    dependents: Vec<JobId>,
}

/// In-memory dependency graph keyed by job identity.
///
/// Edges are added as jobs arrive, so a dependent may be inserted before its
/// prerequisite. Acyclicity is *not* checked here; a cycle simply leaves the
/// jobs on it pending forever.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: HashMap<JobId, DepNode>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &JobId, prereqs: &[JobId]) {
        let node = self.nodes.entry(id.clone()).or_default();
        node.known = true;
        node.prereqs = prereqs.to_vec();

        for prereq in prereqs {
            let dep_node = self.nodes.entry(prereq.clone()).or_default();
            if !dep_node.dependents.contains(id) {
                dep_node.dependents.push(id.clone());
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(|n| n.known)
    }

    /// Immediate prerequisites of a job.
    pub fn prerequisites_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.prereqs.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every job that (transitively) depends on `id`, in discovery order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<JobId> {
        let mut out = Vec::new();
        let mut visited: HashSet<JobId> = HashSet::new();
        let mut stack: Vec<JobId> = self.dependents_of(id).iter().rev().cloned().collect();

        while let Some(next) = stack.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            stack.extend(self.dependents_of(next.as_str()).iter().rev().cloned());
            out.push(next);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> JobId {
        JobId::sanitize(s)
    }

    #[test]
    fn dependents_are_linked_regardless_of_insertion_order() {
        let mut g = DepGraph::new();
        g.add_node(&id("test_a"), &[id("build")]);
        g.add_node(&id("build"), &[]);
        g.add_node(&id("test_b"), &[id("build")]);

        assert!(g.contains("build"));
        assert_eq!(g.dependents_of("build"), &[id("test_a"), id("test_b")]);
        assert_eq!(g.prerequisites_of("test_a"), &[id("build")]);
    }

    #[test]
    fn unknown_prerequisite_is_not_contained() {
        let mut g = DepGraph::new();
        g.add_node(&id("a"), &[id("ghost")]);
        assert!(!g.contains("ghost"));
        assert_eq!(g.dependents_of("ghost"), &[id("a")]);
    }

    #[test]
    fn transitive_dependents_walks_chain() {
        let mut g = DepGraph::new();
        g.add_node(&id("a"), &[]);
        g.add_node(&id("b"), &[id("a")]);
        g.add_node(&id("c"), &[id("b")]);
        g.add_node(&id("d"), &[id("a"), id("c")]);

        let deps = g.transitive_dependents("a");
        assert_eq!(deps.len(), 3);
        for name in ["b", "c", "d"] {
            assert!(deps.contains(&id(name)));
        }
    }
}
