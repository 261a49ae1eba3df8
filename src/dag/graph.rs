// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::Template;
use crate::errors::{EngineError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Declaration position, used to break ordering ties.
    index: usize,
    /// Direct dependencies: resources that must complete before this one starts.
    deps: Vec<String>,
    /// Direct dependents: resources that depend on this one.
    dependents: Vec<String>,
}

/// Forward traversal order (dependencies first).
pub type Order<'a> = std::vec::IntoIter<&'a str>;

/// Ordering structure over resource references.
///
/// An edge `src -> dst` means `src` must be complete before `dst` may start,
/// and symmetrically that `dst` must be torn down before `src`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DagNode>,
    declared: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a template's resource references.
    ///
    /// Every resource becomes a node (in declaration order), and each
    /// reference (`depends_on` entry or `Ref` property) becomes an edge from
    /// the referenced resource to the referencing one. Call
    /// [`validate`](Self::validate) to reject cycles.
    pub fn from_template(template: &Template) -> Self {
        let mut graph = Self::new();

        for resource in template.resources() {
            graph.add_node(&resource.name);
        }

        for resource in template.resources() {
            for dep in template.references_of(&resource.name) {
                graph.add_edge(&dep, &resource.name);
            }
        }

        graph
    }

    /// Add a node if it does not exist yet.
    pub fn add_node(&mut self, name: &str) {
        if self.nodes.contains_key(name) {
            return;
        }
        let index = self.declared.len();
        self.declared.push(name.to_string());
        self.nodes.insert(
            name.to_string(),
            DagNode {
                index,
                deps: Vec::new(),
                dependents: Vec::new(),
            },
        );
    }

    /// Record that `src` must complete before `dst` may start.
    ///
    /// Unknown endpoints are added as nodes; duplicate edges are ignored.
    pub fn add_edge(&mut self, src: &str, dst: &str) {
        self.add_node(src);
        self.add_node(dst);

        if let Some(node) = self.nodes.get_mut(dst) {
            if node.deps.iter().any(|d| d == src) {
                return;
            }
            node.deps.push(src.to_string());
        }
        if let Some(node) = self.nodes.get_mut(src) {
            node.dependents.push(dst.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// All node names, in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(|s| s.as_str())
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Fail with [`EngineError::CircularDependency`] if the graph has a cycle.
    ///
    /// The error names every node on the cycle, in declaration order.
    pub fn validate(&self) -> Result<()> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for node in self.nodes.values() {
            graph.add_node(node.index);
        }
        for node in self.nodes.values() {
            for dep in &node.deps {
                if let Some(dep_node) = self.nodes.get(dep) {
                    graph.add_edge(dep_node.index, node.index, ());
                }
            }
        }

        let cycle = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|mut scc| {
                scc.sort_unstable();
                scc
            })
            .min();

        match cycle {
            None => Ok(()),
            Some(indices) => Err(EngineError::CircularDependency(
                indices
                    .into_iter()
                    .map(|i| self.declared[i].clone())
                    .collect(),
            )),
        }
    }

    /// Nodes ordered so that every dependency precedes its dependents.
    ///
    /// Ties are broken by declaration order, so the result is identical for
    /// an identical edge set.
    pub fn forward_order(&self) -> Result<Order<'_>> {
        let mut in_degree: Vec<usize> = vec![0; self.declared.len()];
        for node in self.nodes.values() {
            in_degree[node.index] = node.deps.len();
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.declared.len());
        while let Some(Reverse(index)) = ready.pop() {
            let name = self.declared[index].as_str();
            order.push(name);

            for dependent in self.dependents_of(name) {
                if let Some(node) = self.nodes.get(dependent) {
                    in_degree[node.index] -= 1;
                    if in_degree[node.index] == 0 {
                        ready.push(Reverse(node.index));
                    }
                }
            }
        }

        if order.len() != self.declared.len() {
            self.validate()?;
            // validate() always reports the leftover cycle; this is unreachable
            // unless the adjacency lists disagree with each other.
            return Err(EngineError::CircularDependency(
                self.declared
                    .iter()
                    .filter(|name| !order.contains(&name.as_str()))
                    .cloned()
                    .collect(),
            ));
        }

        Ok(order.into_iter())
    }

    /// The exact reverse of [`forward_order`](Self::forward_order), for teardown.
    pub fn reverse_order(&self) -> Result<std::iter::Rev<Order<'_>>> {
        Ok(self.forward_order()?.rev())
    }
}
