// src/dag/scheduler.rs

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::node_info::{NodeInfo, NodeName, NodeOutcome, NodeRunState, RunState};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::errors::Result;

/// Which way a run traverses the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies before dependents (create, update, resume).
    Forward,
    /// Dependents before dependencies (delete, suspend).
    Reverse,
}

/// Scheduler holds the graph adjacency (oriented for one direction) plus
/// mutable per-run state.
///
/// It is responsible for:
/// - remembering which nodes are part of the current run
/// - deciding when a node is ready (everything it waits for succeeded)
/// - recording node outcomes
/// - blocking every node that waits, directly or not, on a failed node
#[derive(Debug)]
pub struct Scheduler {
    direction: Direction,
    nodes: HashMap<NodeName, NodeInfo>,
    run_active: bool,
}

impl Scheduler {
    /// Build a scheduler for `graph`, failing if the graph has a cycle.
    pub fn new(graph: &DependencyGraph, direction: Direction) -> Result<Self> {
        let order: Vec<&str> = match direction {
            Direction::Forward => graph.forward_order()?.collect(),
            Direction::Reverse => graph.reverse_order()?.collect(),
        };

        let mut nodes = HashMap::with_capacity(order.len());
        for (rank, name) in order.into_iter().enumerate() {
            let (waits_for, unblocks) = match direction {
                Direction::Forward => (graph.dependencies_of(name), graph.dependents_of(name)),
                Direction::Reverse => (graph.dependents_of(name), graph.dependencies_of(name)),
            };
            nodes.insert(
                name.to_string(),
                NodeInfo {
                    name: name.to_string(),
                    rank,
                    waits_for: waits_for.to_vec(),
                    unblocks: unblocks.to_vec(),
                    run_state: None,
                },
            );
        }

        Ok(Self {
            direction,
            nodes,
            run_active: false,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns `true` if there is currently no active run.
    pub fn is_idle(&self) -> bool {
        !self.run_active
    }

    /// Read-only view of the given node's run state.
    pub fn run_state_of(&self, node: &str) -> Option<NodeRunState> {
        let info = self.nodes.get(node)?;
        Some(info.run_state.into())
    }

    /// Names of nodes in the given state, in traversal order.
    pub fn nodes_in_state(&self, state: NodeRunState) -> Vec<NodeName> {
        let mut found: Vec<&NodeInfo> = self
            .nodes
            .values()
            .filter(|info| NodeRunState::from(info.run_state) == state)
            .collect();
        found.sort_by_key(|info| info.rank);
        found.into_iter().map(|info| info.name.clone()).collect()
    }

    /// Whether everything `node` waits for is satisfied for the current run.
    ///
    /// Returns `None` if the node is unknown.
    pub fn deps_satisfied(&self, node: &str) -> Option<bool> {
        let info = self.nodes.get(node)?;
        Some(ReadOnlyStateManager::new(&self.nodes).waits_satisfied(info))
    }

    /// Start a run over every node of the graph.
    pub fn start_full_run(&mut self) {
        let all: Vec<NodeName> = self.nodes.keys().cloned().collect();
        self.start_run(all);
    }

    /// Start a run over the given nodes only.
    ///
    /// Nodes left out are neither started nor waited on.
    pub fn start_run<I, S>(&mut self, participants: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for info in self.nodes.values_mut() {
            info.run_state = None;
        }

        let mut manager = StateManager::new(&mut self.nodes);
        for name in participants {
            manager.mark_pending(name.as_ref());
        }

        self.run_active = true;
        debug!(direction = ?self.direction, "scheduler: starting new run");
        self.maybe_finish_run();
    }

    /// Hand out pending nodes whose dependencies are satisfied, at most
    /// `limit` of them, and mark them running.
    pub fn collect_ready(&mut self, limit: Option<usize>) -> Vec<NodeName> {
        if !self.run_active {
            return Vec::new();
        }
        StateManager::new(&mut self.nodes).collect_new_ready(limit)
    }

    /// Record the outcome of a running node.
    pub fn handle_completion(&mut self, node: &str, outcome: NodeOutcome) -> SchedulerStep {
        if !self.run_active {
            warn!(node = %node, "completion reported with no active run; ignoring");
            return SchedulerStep::default();
        }

        let mut newly_blocked = Vec::new();

        match self.nodes.get_mut(node) {
            Some(info) => match outcome {
                NodeOutcome::Success => {
                    info.run_state = Some(RunState::DoneSuccess);
                    debug!(node = %info.name, "node completed successfully");
                }
                NodeOutcome::Failed => {
                    info.run_state = Some(RunState::DoneFailed);
                    warn!(node = %info.name, "node failed; blocking everything waiting on it");
                    newly_blocked = StateManager::new(&mut self.nodes).mark_waiters_blocked(node);
                }
            },
            None => warn!(node = %node, "completion for unknown node; ignoring"),
        }

        let run_just_finished = self.maybe_finish_run();

        SchedulerStep {
            newly_blocked,
            run_just_finished,
        }
    }

    /// Close the run if every participant is in a terminal state.
    ///
    /// Returns `true` if this call transitioned the scheduler to idle.
    fn maybe_finish_run(&mut self) -> bool {
        if !self.run_active {
            return false;
        }

        if StateManager::new(&mut self.nodes).all_terminal() {
            info!(direction = ?self.direction, "scheduler: all nodes terminal; run finished");
            self.run_active = false;
            true
        } else {
            false
        }
    }
}
