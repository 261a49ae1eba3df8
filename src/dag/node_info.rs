// src/dag/node_info.rs

//! Per-node metadata and per-run state.

/// Canonical node name type (a resource's logical name).
pub type NodeName = String;

/// Per-run state of a node (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Part of this run, waiting on dependencies.
    Pending,
    /// Handed out as ready; its task is running.
    Running,
    /// Finished successfully in this run.
    DoneSuccess,
    /// Its own task failed in this run.
    DoneFailed,
    /// Never started because something it depends on failed.
    Blocked,
}

/// Public, read-only view of a node's per-run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    /// The node is not participating in this run.
    NotInRun,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
    Blocked,
}

impl From<Option<RunState>> for NodeRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => NodeRunState::NotInRun,
            Some(RunState::Pending) => NodeRunState::Pending,
            Some(RunState::Running) => NodeRunState::Running,
            Some(RunState::DoneSuccess) => NodeRunState::DoneSuccess,
            Some(RunState::DoneFailed) => NodeRunState::DoneFailed,
            Some(RunState::Blocked) => NodeRunState::Blocked,
        }
    }
}

/// Static adjacency (already oriented for the traversal direction) plus
/// per-run state.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: NodeName,
    /// Position in the traversal order; ready nodes are handed out by rank.
    pub rank: usize,
    /// Nodes that must finish before this one may start.
    pub waits_for: Vec<NodeName>,
    /// Nodes that wait for this one.
    pub unblocks: Vec<NodeName>,
    /// `None` if not participating in the current run.
    pub run_state: Option<RunState>,
}

/// Outcome of a node's task, as reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Success,
    Failed,
}
