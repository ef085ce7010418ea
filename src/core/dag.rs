//! Dependency graph shared by validation, sequencing and layering.
//!
//! `TaskGraph` stores tasks as petgraph nodes with an edge running from a
//! dependency to its dependent. Traversals use explicit three-color
//! marking (white/gray/black) on a heap-allocated stack, so very deep
//! graphs cannot overflow the call stack.
//!
//! The graph is generic over its key so the validator can work on
//! caller-supplied string ids before any task exists, while the
//! orchestrator works on persisted [`TaskId`](crate::core::TaskId)s.

use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// One frame of the explicit DFS stack.
struct Frame {
    node: NodeIndex,
    deps: Vec<NodeIndex>,
    next: usize,
}

pub struct TaskGraph<K> {
    graph: DiGraph<K, ()>,
    index: HashMap<K, NodeIndex>,
}

impl<K> TaskGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node. Adding an existing key returns its index.
    pub fn add_node(&mut self, key: K) -> NodeIndex {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(key.clone());
        self.index.insert(key, idx);
        idx
    }

    /// Record that `task` depends on `dependency`.
    ///
    /// Cycles are not rejected here; call [`find_cycle`](Self::find_cycle)
    /// once the graph is complete.
    pub fn add_dependency(&mut self, task: &K, dependency: &K) -> Result<()> {
        let to = *self
            .index
            .get(task)
            .ok_or_else(|| Error::Internal(format!("Task {} not found in graph", task)))?;
        let from = *self
            .index
            .get(dependency)
            .ok_or_else(|| Error::Internal(format!("Task {} not found in graph", dependency)))?;
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of a node, in the order they were added.
    pub fn dependencies(&self, key: &K) -> Vec<K> {
        match self.index.get(key) {
            Some(&idx) => self
                .deps_of(idx)
                .into_iter()
                .map(|d| self.graph[d].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, key: &K) -> Vec<K> {
        match self.index.get(key) {
            Some(&idx) => {
                let mut out: Vec<K> = self
                    .graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(|d| self.graph[d].clone())
                    .collect();
                out.reverse();
                out
            }
            None => Vec::new(),
        }
    }

    // petgraph yields neighbors newest-first; reverse for insertion order.
    fn deps_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        deps.reverse();
        deps
    }

    /// Three-color DFS over dependency edges.
    ///
    /// Returns the post-order (every dependency before its dependents) or,
    /// on the first back edge, the cycle as a node path whose last element
    /// repeats the first.
    fn walk(&self) -> std::result::Result<Vec<NodeIndex>, Vec<NodeIndex>> {
        let mut color = vec![Color::White; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for root in self.graph.node_indices() {
            if color[root.index()] != Color::White {
                continue;
            }
            color[root.index()] = Color::Gray;
            let mut stack = vec![Frame {
                node: root,
                deps: self.deps_of(root),
                next: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                if frame.next < frame.deps.len() {
                    let child = frame.deps[frame.next];
                    frame.next += 1;
                    match color[child.index()] {
                        Color::White => {
                            color[child.index()] = Color::Gray;
                            stack.push(Frame {
                                node: child,
                                deps: self.deps_of(child),
                                next: 0,
                            });
                        }
                        Color::Gray => {
                            let start = stack
                                .iter()
                                .position(|f| f.node == child)
                                .unwrap_or(0);
                            let mut cycle: Vec<NodeIndex> =
                                stack[start..].iter().map(|f| f.node).collect();
                            cycle.push(child);
                            return Err(cycle);
                        }
                        Color::Black => {}
                    }
                } else {
                    color[frame.node.index()] = Color::Black;
                    order.push(frame.node);
                    stack.pop();
                }
            }
        }

        Ok(order)
    }

    /// The first cycle found, following "depends on" edges.
    ///
    /// For `A` depending on `B` depending on `A` this yields `[A, B, A]`.
    pub fn find_cycle(&self) -> Option<Vec<K>> {
        self.walk()
            .err()
            .map(|path| path.into_iter().map(|n| self.graph[n].clone()).collect())
    }

    /// Keys ordered so every dependency precedes its dependents.
    ///
    /// Roots are visited in insertion order, so the result is
    /// deterministic for a given construction order.
    pub fn topological_order(&self) -> Result<Vec<K>> {
        self.walk()
            .map(|order| order.into_iter().map(|n| self.graph[n].clone()).collect())
            .map_err(|cycle| Error::Internal(format!("Cycle detected: {}", self.render(&cycle))))
    }

    /// Dependency depth of every node: 0 without dependencies, otherwise
    /// one more than the deepest dependency.
    pub fn depths(&self) -> Result<HashMap<K, usize>> {
        let order = self
            .walk()
            .map_err(|cycle| Error::Internal(format!("Cycle detected: {}", self.render(&cycle))))?;
        let mut depth = vec![0usize; self.graph.node_count()];
        for node in order {
            depth[node.index()] = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|d| depth[d.index()] + 1)
                .max()
                .unwrap_or(0);
        }
        Ok(self
            .graph
            .node_indices()
            .map(|n| (self.graph[n].clone(), depth[n.index()]))
            .collect())
    }

    /// Every task `key` transitively depends on.
    pub fn ancestors(&self, key: &K) -> HashSet<K> {
        let mut seen = HashSet::new();
        let Some(&start) = self.index.get(key) else {
            return HashSet::new();
        };
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        seen.into_iter().map(|n| self.graph[n].clone()).collect()
    }

    /// Whether `task` depends on `other`, directly or transitively.
    pub fn depends_on(&self, task: &K, other: &K) -> bool {
        self.ancestors(task).contains(other)
    }

    fn render(&self, path: &[NodeIndex]) -> String {
        path.iter()
            .map(|n| self.graph[*n].to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl<K> Default for TaskGraph<K>
where
    K: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for TaskGraph<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.graph.node_count())
            .field("dependencies", &self.graph.edge_count())
            .finish()
    }
}
