// src/scheduler/dependency.rs

//! Graph-ordered parallel execution.
//!
//! [`DependencyTaskGroup`] runs one task per graph node. Nodes with no
//! dependency relation between them run concurrently; a node is only started
//! once everything it waits for (in the chosen [`Direction`]) has succeeded.
//! Ordering is enforced purely by when tasks are started, never by locking.

use tracing::{debug, info, warn};

use crate::dag::{DependencyGraph, Direction, NodeName, NodeOutcome, Scheduler};
use crate::errors::{AggregateError, EngineError, Result};
use crate::scheduler::group::FailureMode;
use crate::scheduler::runner::TaskRunner;
use crate::scheduler::task::{Interrupt, Progress, Task};

/// Supplies the task for each graph node, lazily, at the moment the node
/// becomes ready.
pub trait NodeTasks: Send {
    /// Build the runner for `node`. `None` means there is nothing to do for
    /// this node, which counts as success.
    fn make_task(&mut self, node: &str) -> Result<Option<TaskRunner>>;

    /// `node` will never be started in this run because `cause` failed.
    fn blocked(&mut self, _node: &str, _cause: &str) {}
}

pub struct DependencyTaskGroup<P> {
    name: String,
    scheduler: Scheduler,
    tasks: P,
    running: Vec<(NodeName, TaskRunner)>,
    mode: FailureMode,
    max_concurrency: Option<usize>,
    failures: Vec<EngineError>,
    halted: bool,
}

impl<P: NodeTasks> DependencyTaskGroup<P> {
    /// A group over every node of `graph`.
    pub fn new(
        name: impl Into<String>,
        graph: &DependencyGraph,
        direction: Direction,
        tasks: P,
    ) -> Result<Self> {
        let mut scheduler = Scheduler::new(graph, direction)?;
        scheduler.start_full_run();
        Ok(Self {
            name: name.into(),
            scheduler,
            tasks,
            running: Vec::new(),
            mode: FailureMode::FailFast,
            max_concurrency: None,
            failures: Vec::new(),
            halted: false,
        })
    }

    /// Restrict the run to the given nodes. Nodes left out are neither
    /// started nor waited on.
    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scheduler.start_run(participants);
        self
    }

    pub fn with_mode(mut self, mode: FailureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Cap the number of nodes running at once (`0` means unbounded).
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = if limit == 0 { None } else { Some(limit) };
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tasks(&self) -> &P {
        &self.tasks
    }

    /// Start every node that is ready, as long as there is a free slot.
    ///
    /// Nodes that finish on their first step release their dependents
    /// immediately, so this keeps collecting until nothing new is ready.
    fn launch_ready(&mut self) {
        while !self.halted {
            let limit = self
                .max_concurrency
                .map(|max| max.saturating_sub(self.running.len()));
            if limit == Some(0) {
                return;
            }

            let ready = self.scheduler.collect_ready(limit);
            if ready.is_empty() {
                return;
            }

            for node in ready {
                self.launch(node);
                if self.halted {
                    // Nodes already handed out but not started never run.
                    return;
                }
            }
        }
    }

    fn launch(&mut self, node: NodeName) {
        let mut runner = match self.tasks.make_task(&node) {
            Ok(Some(runner)) => runner,
            Ok(None) => {
                debug!(group = %self.name, node = %node, "nothing to do for node");
                self.node_finished(&node, Ok(()));
                return;
            }
            Err(err) => {
                self.node_finished(&node, Err(err));
                return;
            }
        };

        debug!(group = %self.name, node = %node, "starting node task");
        match runner.start() {
            Ok(()) if runner.done() => self.node_finished(&node, Ok(())),
            Ok(()) => self.running.push((node, runner)),
            Err(err) => self.node_finished(&node, Err(err)),
        }
    }

    fn node_finished(&mut self, node: &str, result: Result<()>) {
        match result {
            Ok(()) => {
                self.scheduler.handle_completion(node, NodeOutcome::Success);
            }
            Err(err) => {
                warn!(group = %self.name, node = %node, error = %err, "node failed");
                let step = self.scheduler.handle_completion(node, NodeOutcome::Failed);
                for (blocked, cause) in step.newly_blocked {
                    self.tasks.blocked(&blocked, &cause);
                }
                self.failures.push(err);
                if self.mode == FailureMode::FailFast {
                    self.halted = true;
                }
            }
        }
    }

    fn cancel_running(&mut self) {
        for (node, mut runner) in std::mem::take(&mut self.running) {
            info!(group = %self.name, node = %node, "cancelling in-flight node");
            if let Err(err) = runner.cancel() {
                warn!(group = %self.name, node = %node, error = %err, "cancelling node failed");
            }
        }
    }

    fn finish(&mut self) -> Result<Progress> {
        if self.failures.is_empty() {
            info!(group = %self.name, "all nodes finished");
            return Ok(Progress::Complete);
        }

        let mut failures = std::mem::take(&mut self.failures);
        match self.mode {
            FailureMode::FailFast => Err(failures.swap_remove(0)),
            FailureMode::Aggregate => Err(EngineError::Aggregate(AggregateError::new(failures))),
        }
    }
}

impl<P: NodeTasks> Task for DependencyTaskGroup<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        self.launch_ready();

        // Every in-flight node gets its step this round, even after a
        // fail-fast failure, so siblings are never cut off mid-round.
        for (node, mut runner) in std::mem::take(&mut self.running) {
            match runner.step() {
                Ok(true) => self.node_finished(&node, Ok(())),
                Ok(false) => self.running.push((node, runner)),
                Err(err) => self.node_finished(&node, Err(err)),
            }
        }

        if self.halted {
            self.cancel_running();
            return self.finish();
        }

        self.launch_ready();

        if self.running.is_empty() {
            self.finish()
        } else {
            Ok(Progress::Pending)
        }
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        info!(group = %self.name, %cause, "unwinding dependency group");
        self.halted = true;
        self.cancel_running();
        Ok(())
    }
}
