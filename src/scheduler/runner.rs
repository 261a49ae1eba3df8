// src/scheduler/runner.rs

//! Drives a single [`Task`] to completion.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, Result};
use crate::scheduler::task::{Interrupt, Progress, Task, TaskPhase};

/// Poll interval used by [`TaskRunner::run`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Owns exactly one task and tracks its lifecycle phase.
///
/// The timeout is a wall-clock deadline measured from `start()`. It is only
/// checked before resuming the task, never in the middle of a step.
pub struct TaskRunner {
    task: Box<dyn Task>,
    phase: TaskPhase,
    timeout: Option<Duration>,
    started_at: Option<Instant>,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("task", &self.task.name())
            .field("phase", &self.phase)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub fn new(task: impl Task + 'static) -> Self {
        Self::from_boxed(Box::new(task))
    }

    pub fn from_boxed(task: Box<dyn Task>) -> Self {
        Self {
            task,
            phase: TaskPhase::NotStarted,
            timeout: None,
            started_at: None,
        }
    }

    /// Fail the task with [`EngineError::Timeout`] once it has been running
    /// longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn started(&self) -> bool {
        self.phase != TaskPhase::NotStarted
    }

    pub fn done(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Time since `start()`, or zero if the task has not started.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Run the initial step of the task.
    ///
    /// Fails with [`EngineError::AlreadyStarted`] if called more than once.
    pub fn start(&mut self) -> Result<()> {
        if self.started() {
            return Err(EngineError::AlreadyStarted(self.name().to_string()));
        }

        debug!(task = %self.name(), timeout = ?self.timeout, "starting task");
        self.phase = TaskPhase::Running;
        self.started_at = Some(Instant::now());
        self.resume()
    }

    /// Resume the task once. Returns whether it is now done.
    ///
    /// A runner that has not been started yet is started instead.
    pub fn step(&mut self) -> Result<bool> {
        match self.phase {
            TaskPhase::NotStarted => {
                self.start()?;
                return Ok(self.done());
            }
            TaskPhase::Running => {}
            _ => return Ok(true),
        }

        if let Some(timeout) = self.timeout {
            let elapsed = self.elapsed();
            if elapsed > timeout {
                return Err(self.time_out(timeout, elapsed));
            }
        }

        self.resume()?;
        Ok(self.done())
    }

    /// Start the task if needed, then keep stepping it every `poll_interval`
    /// until it finishes.
    ///
    /// Calling this on a runner that already succeeded is a no-op.
    pub async fn run_to_completion(&mut self, poll_interval: Duration) -> Result<()> {
        match self.phase {
            TaskPhase::NotStarted => self.start()?,
            TaskPhase::Succeeded => return Ok(()),
            TaskPhase::Cancelled => return Err(EngineError::Cancelled(self.name().to_string())),
            TaskPhase::Failed => {
                return Err(EngineError::Other(anyhow::anyhow!(
                    "task '{}' has already failed",
                    self.name()
                )));
            }
            TaskPhase::Running => {}
        }

        while !self.done() {
            tokio::time::sleep(poll_interval).await;
            self.step()?;
        }

        match self.phase {
            TaskPhase::Cancelled => Err(EngineError::Cancelled(self.name().to_string())),
            _ => Ok(()),
        }
    }

    /// Run to completion with [`DEFAULT_POLL_INTERVAL`].
    pub async fn run(mut self) -> Result<()> {
        self.run_to_completion(DEFAULT_POLL_INTERVAL).await
    }

    /// Cancel the task.
    ///
    /// A running task is given one chance to unwind (see [`Task::cancel`])
    /// before it is marked cancelled. Cancelling a finished task does nothing.
    /// The returned error, if any, is the failure of that unwind step.
    pub fn cancel(&mut self) -> Result<()> {
        match self.phase {
            TaskPhase::NotStarted => {
                debug!(task = %self.name(), "cancelling task before start");
                self.phase = TaskPhase::Cancelled;
                Ok(())
            }
            TaskPhase::Running => {
                info!(task = %self.name(), "cancelling running task");
                self.phase = TaskPhase::Cancelled;
                self.task.cancel(&Interrupt::Cancelled)
            }
            _ => Ok(()),
        }
    }

    fn resume(&mut self) -> Result<()> {
        match self.task.step() {
            Ok(Progress::Pending) => Ok(()),
            Ok(Progress::Complete) => {
                debug!(task = %self.name(), elapsed = ?self.elapsed(), "task complete");
                self.phase = TaskPhase::Succeeded;
                Ok(())
            }
            Err(err) => {
                debug!(task = %self.name(), error = %err, "task failed");
                self.phase = TaskPhase::Failed;
                Err(err)
            }
        }
    }

    fn time_out(&mut self, timeout: Duration, elapsed: Duration) -> EngineError {
        warn!(
            task = %self.name(),
            ?timeout,
            ?elapsed,
            "task exceeded its deadline"
        );
        self.phase = TaskPhase::Failed;
        if let Err(err) = self.task.cancel(&Interrupt::TimedOut(timeout)) {
            warn!(task = %self.name(), error = %err, "unwinding timed-out task failed");
        }
        EngineError::Timeout {
            task: self.name().to_string(),
            elapsed,
        }
    }
}
