// src/scheduler/group.rs

//! Parallel drivers for a fixed set of independent tasks.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{AggregateError, EngineError, Result};
use crate::scheduler::runner::TaskRunner;
use crate::scheduler::task::{Interrupt, Progress, Task};

/// How a group reacts to a member failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Cancel every other member and return the first error immediately.
    #[default]
    FailFast,
    /// Let every member finish, then return an [`AggregateError`].
    Aggregate,
}

/// Runs a set of tasks in parallel, each in its own [`TaskRunner`].
///
/// Every step of the group steps every live member exactly once, so no
/// member is starved. The group is itself a [`Task`], so it can be nested
/// inside a runner, a [`Sequence`](crate::scheduler::Sequence) or another
/// group.
pub struct TaskGroup {
    name: String,
    waiting: VecDeque<TaskRunner>,
    live: Vec<TaskRunner>,
    mode: FailureMode,
    max_concurrency: Option<usize>,
    failures: Vec<EngineError>,
    size: usize,
}

impl TaskGroup {
    /// Poll interval used by [`TaskGroup::run`] when driving local work.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Build a group from already-constructed runners.
    ///
    /// The sequence is collected here, so the group size is fixed from then
    /// on. `with_max_concurrency` only bounds how many of them are started.
    pub fn new(name: impl Into<String>, runners: impl IntoIterator<Item = TaskRunner>) -> Self {
        let waiting: VecDeque<TaskRunner> = runners.into_iter().collect();
        let size = waiting.len();
        Self {
            name: name.into(),
            waiting,
            live: Vec::new(),
            mode: FailureMode::FailFast,
            max_concurrency: None,
            failures: Vec::new(),
            size,
        }
    }

    pub fn from_tasks<T>(name: impl Into<String>, tasks: impl IntoIterator<Item = T>) -> Self
    where
        T: Task + 'static,
    {
        Self::new(name, tasks.into_iter().map(TaskRunner::new))
    }

    /// Build one task per argument. Every task is built up front, before
    /// any of them is started.
    pub fn from_task_with_args<A, T, F>(
        name: impl Into<String>,
        make_task: F,
        args: impl IntoIterator<Item = A>,
    ) -> Self
    where
        F: FnMut(A) -> T,
        T: Task + 'static,
    {
        Self::from_tasks(name, args.into_iter().map(make_task))
    }

    /// `true` waits for every member and reports all failures together;
    /// `false` (the default) fails fast.
    pub fn aggregate_exceptions(mut self, aggregate: bool) -> Self {
        self.mode = if aggregate {
            FailureMode::Aggregate
        } else {
            FailureMode::FailFast
        };
        self
    }

    /// Never run more than `limit` members at the same time.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// Number of members the group was built with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Drive the group to completion.
    pub async fn run(self, poll_interval: Duration) -> Result<()> {
        TaskRunner::new(self).run_to_completion(poll_interval).await
    }

    /// Start waiting members while there is a free slot.
    fn admit(&mut self) -> Result<()> {
        while self.has_free_slot() {
            let Some(mut runner) = self.waiting.pop_front() else {
                break;
            };
            let started = runner.start();
            let finished = runner.done();
            if !finished {
                self.live.push(runner);
            }
            if let Err(err) = started {
                self.member_failed(err)?;
            }
        }
        Ok(())
    }

    fn has_free_slot(&self) -> bool {
        match self.max_concurrency {
            Some(limit) => self.live.len() < limit,
            None => true,
        }
    }

    /// Record a member failure. In fail-fast mode this cancels everything
    /// else and hands the error back to the caller.
    fn member_failed(&mut self, err: EngineError) -> Result<()> {
        match self.mode {
            FailureMode::FailFast => {
                warn!(group = %self.name, error = %err, "member failed; cancelling the rest");
                self.cancel_all();
                Err(err)
            }
            FailureMode::Aggregate => {
                warn!(group = %self.name, error = %err, "member failed");
                self.failures.push(err);
                Ok(())
            }
        }
    }

    fn cancel_all(&mut self) {
        for runner in self.live.iter_mut().chain(self.waiting.iter_mut()) {
            if let Err(err) = runner.cancel() {
                warn!(
                    group = %self.name,
                    task = %runner.name(),
                    error = %err,
                    "cancelling member failed"
                );
            }
        }
        self.live.clear();
        self.waiting.clear();
    }
}

impl Task for TaskGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        self.admit()?;

        let mut still_live = Vec::with_capacity(self.live.len());
        let members = std::mem::take(&mut self.live);
        let mut failure = None;

        for mut runner in members {
            if failure.is_some() {
                // Fail-fast already triggered in this round.
                still_live.push(runner);
                continue;
            }
            match runner.step() {
                Ok(true) => {
                    debug!(group = %self.name, task = %runner.name(), "member finished");
                }
                Ok(false) => still_live.push(runner),
                Err(err) => match self.mode {
                    FailureMode::FailFast => failure = Some(err),
                    FailureMode::Aggregate => {
                        warn!(group = %self.name, task = %runner.name(), error = %err, "member failed");
                        self.failures.push(err);
                    }
                },
            }
        }
        self.live = still_live;

        if let Some(err) = failure {
            warn!(group = %self.name, error = %err, "member failed; cancelling the rest");
            self.cancel_all();
            return Err(err);
        }

        // Slots freed up this round can be refilled straight away.
        self.admit()?;

        if !self.live.is_empty() || !self.waiting.is_empty() {
            return Ok(Progress::Pending);
        }

        if self.failures.is_empty() {
            debug!(group = %self.name, size = self.size, "all members finished");
            Ok(Progress::Complete)
        } else {
            let failures = std::mem::take(&mut self.failures);
            Err(EngineError::Aggregate(AggregateError::new(failures)))
        }
    }

    fn cancel(&mut self, _cause: &Interrupt) -> Result<()> {
        self.cancel_all();
        Ok(())
    }
}

/// A [`TaskGroup`] whose members poll a remote API until ready.
///
/// Behaves exactly like a `TaskGroup`, but is driven at a coarser default
/// cadence suited to polling cloud APIs rather than local work.
pub struct PollingTaskGroup {
    inner: TaskGroup,
}

impl PollingTaskGroup {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(name: impl Into<String>, runners: impl IntoIterator<Item = TaskRunner>) -> Self {
        Self {
            inner: TaskGroup::new(name, runners),
        }
    }

    pub fn from_tasks<T>(name: impl Into<String>, tasks: impl IntoIterator<Item = T>) -> Self
    where
        T: Task + 'static,
    {
        Self {
            inner: TaskGroup::from_tasks(name, tasks),
        }
    }

    pub fn from_task_with_args<A, T, F>(
        name: impl Into<String>,
        make_task: F,
        args: impl IntoIterator<Item = A>,
    ) -> Self
    where
        F: FnMut(A) -> T,
        T: Task + 'static,
    {
        Self {
            inner: TaskGroup::from_task_with_args(name, make_task, args),
        }
    }

    pub fn aggregate_exceptions(self, aggregate: bool) -> Self {
        Self {
            inner: self.inner.aggregate_exceptions(aggregate),
        }
    }

    pub fn with_max_concurrency(self, limit: usize) -> Self {
        Self {
            inner: self.inner.with_max_concurrency(limit),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Drive the group to completion at [`Self::DEFAULT_POLL_INTERVAL`].
    pub async fn run(self) -> Result<()> {
        TaskRunner::new(self)
            .run_to_completion(Self::DEFAULT_POLL_INTERVAL)
            .await
    }
}

impl Task for PollingTaskGroup {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn step(&mut self) -> Result<Progress> {
        self.inner.step()
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        self.inner.cancel(cause)
    }
}
