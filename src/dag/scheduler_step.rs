// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::node_info::NodeName;

/// Structured result of reporting one node's outcome to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Nodes that can never start in this run because of this step, paired
    /// with the failed node that blocked them.
    pub newly_blocked: Vec<(NodeName, NodeName)>,
    /// Whether this step caused the current run to finish.
    pub run_just_finished: bool,
}
