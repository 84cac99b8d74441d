//! Dependency graph used to reject edges that would close a cycle.
//!
//! Nodes live in an arena indexed by position; `edges[i]` holds the nodes
//! node `i` depends on. The graph only ever holds the neighbourhood needed
//! for one check, loaded by the caller.

use std::collections::{HashMap, VecDeque};

use crate::types::DbId;

#[derive(Debug, Default)]
pub struct DependGraph {
    nodes: Vec<DbId>,
    index: HashMap<DbId, usize>,
    /// Forward edges: node -> nodes it depends on.
    edges: Vec<Vec<usize>>,
}

impl DependGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, id: DbId) -> usize {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(id);
        self.edges.push(Vec::new());
        self.index.insert(id, i);
        i
    }

    /// Record that `depend_er` waits for `depend_on`.
    pub fn add_edge(&mut self, depend_er: DbId, depend_on: DbId) {
        let from = self.intern(depend_er);
        let to = self.intern(depend_on);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    pub fn contains(&self, id: DbId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shortest chain of "depends on" edges from `from` to `to`, inclusive.
    pub fn path(&self, from: DbId, to: DbId) -> Option<Vec<DbId>> {
        if from == to {
            return Some(vec![from]);
        }
        let start = *self.index.get(&from)?;
        let goal = *self.index.get(&to)?;

        let mut parent: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;

        while let Some(node) = queue.pop_front() {
            if node == goal {
                let mut path = vec![self.nodes[goal]];
                let mut cur = goal;
                while let Some(p) = parent[cur] {
                    path.push(self.nodes[p]);
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            for &next in &self.edges[node] {
                if !seen[next] {
                    seen[next] = true;
                    parent[next] = Some(node);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// If adding `depend_er -> depend_on` would close a cycle, the cycle it
    /// would close, starting and ending at `depend_er`.
    pub fn cycle_with(&self, depend_er: DbId, depend_on: DbId) -> Option<Vec<DbId>> {
        let mut cycle = vec![depend_er];
        cycle.extend(self.path(depend_on, depend_er)?);
        Some(cycle)
    }
}
