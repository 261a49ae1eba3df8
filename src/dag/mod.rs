// src/dag/mod.rs

//! Dependency graph and per-run ordering.
//!
//! - [`graph`] holds the resource reference graph and its traversal orders.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   nodes are ready, and which can never run because something they wait
//!   on failed.
//! - [`node_info`] provides node metadata and run states.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod node_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::{DependencyGraph, Order};
pub use node_info::{NodeName, NodeOutcome, NodeRunState};
pub use scheduler::{Direction, Scheduler};
pub use scheduler_step::SchedulerStep;
