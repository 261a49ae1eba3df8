// src/scheduler/task.rs

//! The resumable unit of work driven by the scheduler.
//!
//! A [`Task`] is an explicit state object: every call to [`Task::step`] runs
//! one piece of work and then hands control back to whoever is driving it.
//! The first call is the initial (non-blocking) step; later calls resume.
//! Nothing ever suspends a task in the middle of a step.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::errors::Result;
use crate::scheduler::runner::TaskRunner;

/// Result of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The task yielded and wants to be resumed later.
    Pending,
    /// The task finished successfully.
    Complete,
}

/// Lifecycle phase of a task, as tracked by its [`TaskRunner`].
///
/// Transitions are monotonic: `NotStarted -> Running -> {Succeeded | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }
}

/// Why a running task is being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Cancelled => f.write_str("cancelled"),
            Interrupt::TimedOut(after) => write!(f, "timed out after {after:?}"),
        }
    }
}

/// A single unit of suspendable work.
pub trait Task: Send {
    /// Name used for logging and error messages.
    fn name(&self) -> &str;

    /// Run the next piece of work.
    fn step(&mut self) -> Result<Progress>;

    /// Unwind a task that will never be resumed again.
    ///
    /// Called at most once, and only for a task that has started but not
    /// finished. Implementations may run a compensating step here.
    fn cancel(&mut self, _cause: &Interrupt) -> Result<()> {
        Ok(())
    }
}

/// Adapts a closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    step_fn: F,
}

impl<F> FnTask<F>
where
    F: FnMut() -> Result<Progress> + Send,
{
    pub fn new(name: impl Into<String>, step_fn: F) -> Self {
        Self {
            name: name.into(),
            step_fn,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: FnMut() -> Result<Progress> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        (self.step_fn)()
    }
}

/// Runs child tasks one after another, yielding between every step.
///
/// A child is only started once the previous one has completed; a child
/// failure fails the whole sequence and the remaining children never run.
pub struct Sequence {
    name: String,
    children: std::collections::VecDeque<TaskRunner>,
    current: Option<TaskRunner>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, children: impl IntoIterator<Item = TaskRunner>) -> Self {
        Self {
            name: name.into(),
            children: children.into_iter().collect(),
            current: None,
        }
    }
}

impl Task for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        loop {
            if self.current.is_none() {
                match self.children.pop_front() {
                    Some(next) => {
                        debug!(sequence = %self.name, child = %next.name(), "starting next child");
                        self.current = Some(next);
                    }
                    None => return Ok(Progress::Complete),
                }
            }
            let Some(current) = self.current.as_mut() else {
                return Ok(Progress::Complete);
            };

            // `step` starts the child on first use, which runs its initial step.
            if !current.step()? {
                return Ok(Progress::Pending);
            }

            self.current = None;
            if self.children.is_empty() {
                return Ok(Progress::Complete);
            }
            // A finished child hands straight over to the next one; the next
            // yield happens inside that child.
        }
    }

    fn cancel(&mut self, _cause: &Interrupt) -> Result<()> {
        self.children.clear();
        match self.current.as_mut() {
            Some(runner) => runner.cancel(),
            None => Ok(()),
        }
    }
}
