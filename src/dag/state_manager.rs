// src/dag/state_manager.rs

//! Per-run state management for nodes in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::dag::node_info::{NodeInfo, NodeName, RunState};

/// Manages per-run state transitions for nodes.
pub struct StateManager<'a> {
    nodes: &'a mut HashMap<NodeName, NodeInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(nodes: &'a mut HashMap<NodeName, NodeInfo>) -> Self {
        Self { nodes }
    }

    /// Include a node in this run (marks it `Pending` if it was not part of
    /// the run yet).
    pub fn mark_pending(&mut self, name: &str) {
        match self.nodes.get_mut(name) {
            Some(info) => {
                if info.run_state.is_none() {
                    info.run_state = Some(RunState::Pending);
                    debug!(node = %info.name, "marked Pending for this run");
                }
            }
            None => warn!(node = %name, "node not present in graph; ignoring"),
        }
    }

    /// Mark every pending node that (transitively) waits for `failed` as
    /// `Blocked`.
    ///
    /// Returns `(blocked, cause)` pairs, where `cause` is the node whose
    /// failure reached `blocked` first.
    pub fn mark_waiters_blocked(&mut self, failed: &str) -> Vec<(NodeName, NodeName)> {
        let mut stack: Vec<(NodeName, NodeName)> = self
            .nodes
            .get(failed)
            .map(|info| {
                info.unblocks
                    .iter()
                    .map(|n| (n.clone(), failed.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut visited: HashSet<NodeName> = HashSet::new();
        let mut newly_blocked = Vec::new();

        while let Some((name, cause)) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(info) = self.nodes.get_mut(&name) else {
                continue;
            };

            match info.run_state {
                Some(RunState::Pending) => {
                    info.run_state = Some(RunState::Blocked);
                    debug!(node = %info.name, cause = %cause, "blocked by upstream failure");
                    newly_blocked.push((info.name.clone(), cause.clone()));
                    stack.extend(info.unblocks.iter().map(|n| (n.clone(), cause.clone())));
                }
                None => {
                    // Not part of this run, but nodes beyond it may be.
                    stack.extend(info.unblocks.iter().map(|n| (n.clone(), cause.clone())));
                }
                Some(RunState::Running)
                | Some(RunState::DoneSuccess)
                | Some(RunState::DoneFailed)
                | Some(RunState::Blocked) => {}
            }
        }

        newly_blocked.sort_by_key(|(name, _)| self.rank_of(name));
        newly_blocked
    }

    /// Collect pending nodes whose dependencies are satisfied, mark them
    /// `Running` and return them in rank order.
    pub fn collect_new_ready(&mut self, limit: Option<usize>) -> Vec<NodeName> {
        let mut candidates: Vec<(usize, NodeName)> = self
            .nodes
            .values()
            .filter(|info| {
                matches!(info.run_state, Some(RunState::Pending)) && self.waits_satisfied(info)
            })
            .map(|info| (info.rank, info.name.clone()))
            .collect();
        candidates.sort();

        if let Some(limit) = limit {
            candidates.truncate(limit);
        }

        let mut ready = Vec::with_capacity(candidates.len());
        for (_, name) in candidates {
            if let Some(info) = self.nodes.get_mut(&name) {
                debug!(node = %info.name, "dependencies satisfied; marking Running");
                info.run_state = Some(RunState::Running);
                ready.push(name);
            }
        }
        ready
    }

    /// Check whether every node in the run is in a terminal state.
    pub fn all_terminal(&self) -> bool {
        !self.nodes.values().any(|info| {
            matches!(
                info.run_state,
                Some(RunState::Pending) | Some(RunState::Running)
            )
        })
    }

    fn waits_satisfied(&self, info: &NodeInfo) -> bool {
        ReadOnlyStateManager::new(&*self.nodes).waits_satisfied(info)
    }

    fn rank_of(&self, name: &str) -> usize {
        self.nodes.get(name).map(|i| i.rank).unwrap_or(usize::MAX)
    }
}

/// A read-only view for checking dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    nodes: &'a HashMap<NodeName, NodeInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(nodes: &'a HashMap<NodeName, NodeInfo>) -> Self {
        Self { nodes }
    }

    /// Whether everything `info` waits for is done for the current run.
    ///
    /// Nodes outside the run are treated as already being in the desired
    /// state (they are neither started nor waited on).
    pub fn waits_satisfied(&self, info: &NodeInfo) -> bool {
        for dep_name in &info.waits_for {
            let Some(dep) = self.nodes.get(dep_name) else {
                warn!(node = %info.name, dep = %dep_name, "dependency missing from graph");
                return false;
            };

            match dep.run_state {
                Some(RunState::DoneSuccess) | None => {}
                Some(RunState::Pending)
                | Some(RunState::Running)
                | Some(RunState::DoneFailed)
                | Some(RunState::Blocked) => return false,
            }
        }
        true
    }
}
