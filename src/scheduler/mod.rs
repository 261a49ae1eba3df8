// src/scheduler/mod.rs

//! Cooperative task scheduling.
//!
//! - [`task`] defines the resumable [`Task`] abstraction.
//! - [`runner`] drives one task with a poll cadence and an optional deadline.
//! - [`group`] runs independent tasks in parallel.
//! - [`dependency`] runs one task per graph node in dependency order.

pub mod dependency;
pub mod group;
pub mod runner;
pub mod task;

pub use dependency::{DependencyTaskGroup, NodeTasks};
pub use group::{FailureMode, PollingTaskGroup, TaskGroup};
pub use runner::{DEFAULT_POLL_INTERVAL, TaskRunner};
pub use task::{FnTask, Interrupt, Progress, Sequence, Task, TaskPhase};
