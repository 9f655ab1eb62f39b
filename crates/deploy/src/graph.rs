//! Dependency graph between the layers of an environment.
//!
//! Layers live in the environment's `Vec<Layer>`; the graph only stores edges between
//! their indices, so there are no references between layers themselves.

use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap},
};

/// Nodes left unsorted because they sit on (or behind) a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<usize>);

/// Directed acyclic graph of parent -> child edges, addressed by layer index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerGraph {
    /// Adjacency list: node -> nodes that depend on it.
    children: Vec<BTreeSet<usize>>,
    /// Reverse adjacency list: node -> nodes it depends on.
    parents: Vec<BTreeSet<usize>>,
}

impl LayerGraph {
    /// Create a graph with `len` nodes and no edges.
    pub fn with_nodes(len: usize) -> Self {
        Self {
            children: vec![BTreeSet::new(); len],
            parents: vec![BTreeSet::new(); len],
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Register `child` as depending on `parent`.
    ///
    /// Returns `false` if the edge was already known, in which case nothing changes.
    ///
    /// # Panics
    /// If either index is out of bounds.
    pub fn link(&mut self, parent: usize, child: usize) -> bool {
        let added = self.children[parent].insert(child);
        self.parents[child].insert(parent);
        added
    }

    /// Nodes depending on `node`, in index order.
    pub fn children(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.children.get(node).into_iter().flatten().copied()
    }

    /// Nodes `node` depends on, in index order.
    pub fn parents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.parents.get(node).into_iter().flatten().copied()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.children.iter().map(BTreeSet::len).sum()
    }

    /// Returns the nodes in an order where every parent comes before its children.
    ///
    /// Kahn's algorithm, always picking the lowest ready index. When index order is
    /// already a valid topological order, it is returned unchanged.
    pub fn topological_order(&self) -> Result<Vec<usize>, Cycle> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(node))
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);

            for &child in &self.children[node] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if order.len() != self.len() {
            let unsorted = (0..self.len())
                .filter(|node| in_degree[*node] > 0)
                .collect();
            return Err(Cycle(unsorted));
        }

        Ok(order)
    }
}
