//! The scheduled work graph as captured for caching.
//!
//! Only the serialized representation matters here: nodes carry stable ids
//! assigned at store time, and edges are recorded as dependency id lists.
//! Validation builds a petgraph DAG to reject dangling references and cycles
//! before a graph is written or after one is read.

use crate::paths::ProjectPath;
use crate::{Error, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkNode {
    /// Stable id assigned when the graph was captured.
    pub id: u64,
    /// Task path, such as `:app:build`.
    pub task_path: String,
    /// Owning project, or `None` for nodes belonging to other builds.
    pub project: Option<ProjectPath>,
    /// Ids of the nodes this node depends on.
    pub dependencies: Vec<u64>,
}

/// The captured task/work graph of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledWork {
    /// All scheduled nodes, in schedule order.
    pub nodes: Vec<WorkNode>,
    /// Ids of the entry nodes (requested on the command line).
    pub entry_node_ids: Vec<u64>,
}

impl ScheduledWork {
    /// Whether no work was scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of scheduled nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The set of projects owning at least one node, in first-seen order.
    #[must_use]
    pub fn relevant_projects(&self) -> Vec<ProjectPath> {
        let mut seen = Vec::new();
        for node in &self.nodes {
            if let Some(project) = &node.project
                && !seen.contains(project)
            {
                seen.push(project.clone());
            }
        }
        seen
    }

    /// Validate graph structure: every dependency id must name a scheduled
    /// node and the dependency relation must be acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependency`] or [`Error::CycleDetected`].
    pub fn validate(&self) -> Result<()> {
        let mut graph: DiGraph<u64, ()> = DiGraph::new();
        let mut by_id: HashMap<u64, NodeIndex> = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            by_id.insert(node.id, graph.add_node(node.id));
        }
        for node in &self.nodes {
            let to = by_id[&node.id];
            for dep in &node.dependencies {
                let Some(&from) = by_id.get(dep) else {
                    return Err(Error::MissingDependency {
                        node: node.task_path.clone(),
                        dependency: *dep,
                    });
                };
                graph.add_edge(from, to, ());
            }
        }
        if is_cyclic_directed(&graph) {
            return Err(Error::CycleDetected);
        }
        Ok(())
    }
}

/// Complete a project list with every missing ancestor, up to and including
/// the root, so the restored tree never lacks an intermediate node.
///
/// Parents are inserted before their first-encountered descendant; input
/// order is otherwise preserved and no project appears twice.
#[must_use]
pub fn fill_the_gaps_of(projects: &[ProjectPath]) -> Vec<ProjectPath> {
    let mut without_gaps: Vec<ProjectPath> = Vec::with_capacity(projects.len());
    let mut index = 0;
    for project in projects {
        let mut added = 0;
        let mut parent = project.parent();
        while let Some(p) = parent {
            if without_gaps.contains(&p) {
                break;
            }
            without_gaps.insert(index, p.clone());
            added += 1;
            parent = p.parent();
        }
        if !without_gaps.contains(project) {
            without_gaps.push(project.clone());
            added += 1;
        }
        index += added;
    }
    without_gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path(s: &str) -> ProjectPath {
        ProjectPath::new(s).unwrap()
    }

    fn node(id: u64, task: &str, project: &str, deps: &[u64]) -> WorkNode {
        WorkNode {
            id,
            task_path: task.to_string(),
            project: Some(path(project)),
            dependencies: deps.to_vec(),
        }
    }

    #[test]
    fn valid_graph_passes() {
        let work = ScheduledWork {
            nodes: vec![
                node(0, ":lib:compile", ":lib", &[]),
                node(1, ":app:compile", ":app", &[0]),
                node(2, ":app:assemble", ":app", &[1]),
            ],
            entry_node_ids: vec![2],
        };
        work.validate().unwrap();
        assert_eq!(work.relevant_projects(), vec![path(":lib"), path(":app")]);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let work = ScheduledWork {
            nodes: vec![node(0, ":app:build", ":app", &[9])],
            entry_node_ids: vec![0],
        };
        assert!(matches!(
            work.validate(),
            Err(Error::MissingDependency { dependency: 9, .. })
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let work = ScheduledWork {
            nodes: vec![
                node(0, ":a:x", ":a", &[1]),
                node(1, ":a:y", ":a", &[0]),
            ],
            entry_node_ids: vec![],
        };
        assert!(matches!(work.validate(), Err(Error::CycleDetected)));
    }

    #[test]
    fn gaps_are_filled_with_ancestors_in_order() {
        let input = vec![path(":a:b:c"), path(":d")];
        let filled = fill_the_gaps_of(&input);
        assert_eq!(
            filled,
            vec![
                ProjectPath::root(),
                path(":a"),
                path(":a:b"),
                path(":a:b:c"),
                path(":d"),
            ]
        );
    }

    #[test]
    fn already_complete_lists_are_untouched() {
        let input = vec![ProjectPath::root(), path(":a"), path(":a:b")];
        assert_eq!(fill_the_gaps_of(&input), input);
    }

    #[test]
    fn shared_ancestors_appear_once() {
        let input = vec![path(":a:b"), path(":a:c")];
        assert_eq!(
            fill_the_gaps_of(&input),
            vec![ProjectPath::root(), path(":a"), path(":a:b"), path(":a:c")]
        );
    }

    fn arbitrary_path() -> impl Strategy<Value = ProjectPath> {
        proptest::collection::vec("[a-c]{1,2}", 1..4).prop_map(|segments| {
            let mut p = ProjectPath::root();
            for s in segments {
                p = p.child(&s);
            }
            p
        })
    }

    proptest! {
        #[test]
        fn every_ancestor_present_exactly_once(
            input in proptest::collection::vec(arbitrary_path(), 1..8)
        ) {
            let filled = fill_the_gaps_of(&input);
            // No duplicates.
            let mut sorted = filled.clone();
            sorted.sort();
            let mut deduped = sorted.clone();
            deduped.dedup();
            prop_assert_eq!(sorted.len(), deduped.len());
            // Closed under parent(), and parents precede descendants.
            for p in &filled {
                if let Some(parent) = p.parent() {
                    let parent_idx = filled.iter().position(|x| *x == parent);
                    prop_assert!(parent_idx.is_some());
                    let child_idx = filled.iter().position(|x| x == p);
                    prop_assert!(parent_idx < child_idx);
                }
            }
            // Every input project survives.
            for p in &input {
                prop_assert!(filled.contains(p));
            }
        }
    }
}
