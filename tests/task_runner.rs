// tests/task_runner.rs

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackdag::errors::{EngineError, Result};
use stackdag::scheduler::{FnTask, Interrupt, Progress, Sequence, Task, TaskPhase, TaskRunner};
use stackdag_test_utils::init_tracing;

type TestResult = std::result::Result<(), Box<dyn Error>>;

/// Completes after `pending` yields; records every step and unwind.
struct CountingTask {
    name: String,
    pending: usize,
    log: Arc<Mutex<Vec<String>>>,
}

impl CountingTask {
    fn new(name: &str, pending: usize, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            pending,
            log: log.clone(),
        }
    }
}

impl Task for CountingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        self.log.lock().unwrap().push(format!("{} step", self.name));
        if self.pending == 0 {
            return Ok(Progress::Complete);
        }
        self.pending -= 1;
        Ok(Progress::Pending)
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} unwind: {cause}", self.name));
        Ok(())
    }
}

fn new_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_start_twice_is_rejected() {
    init_tracing();
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 3, &log));

    runner.start().unwrap();
    match runner.start() {
        Err(EngineError::AlreadyStarted(name)) => assert_eq!(name, "t"),
        other => panic!("Expected AlreadyStarted, got: {:?}", other),
    }
    // The second start did not step the task again.
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn test_step_starts_a_fresh_runner() {
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 1, &log));
    assert_eq!(runner.phase(), TaskPhase::NotStarted);

    assert!(!runner.step().unwrap());
    assert_eq!(runner.phase(), TaskPhase::Running);
    assert!(runner.step().unwrap());
    assert_eq!(runner.phase(), TaskPhase::Succeeded);
    // Finished runners report done without touching the task.
    assert!(runner.step().unwrap());
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_to_completion_steps_until_done() -> TestResult {
    init_tracing();
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 3, &log));

    runner.run_to_completion(Duration::from_millis(10)).await?;

    assert_eq!(runner.phase(), TaskPhase::Succeeded);
    assert_eq!(log.lock().unwrap().len(), 4);
    // Running an already-succeeded runner again is a no-op.
    runner.run_to_completion(Duration::from_millis(10)).await?;
    assert_eq!(log.lock().unwrap().len(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_and_unwinds_the_task() {
    init_tracing();
    let log = new_log();
    let mut runner =
        TaskRunner::new(CountingTask::new("slow", usize::MAX, &log)).with_timeout(Duration::from_secs(1));

    let err = runner
        .run_to_completion(Duration::from_millis(100))
        .await
        .unwrap_err();

    match err {
        EngineError::Timeout { task, elapsed } => {
            assert_eq!(task, "slow");
            assert!(elapsed > Duration::from_secs(1));
            assert!(elapsed < Duration::from_millis(1500));
        }
        other => panic!("Expected Timeout, got: {:?}", other),
    }
    assert_eq!(runner.phase(), TaskPhase::Failed);
    let log = log.lock().unwrap();
    assert_eq!(log.last().unwrap(), "slow unwind: timed out after 1s");
}

#[test]
fn test_cancel_running_task_unwinds_once() {
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 5, &log));
    runner.start().unwrap();

    runner.cancel().unwrap();
    runner.cancel().unwrap();

    assert_eq!(runner.phase(), TaskPhase::Cancelled);
    let log = log.lock().unwrap();
    assert_eq!(*log, vec!["t step".to_string(), "t unwind: cancelled".to_string()]);
}

#[test]
fn test_cancel_before_start_does_not_unwind() {
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 5, &log));

    runner.cancel().unwrap();

    assert_eq!(runner.phase(), TaskPhase::Cancelled);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_after_cancel_reports_cancellation() {
    let log = new_log();
    let mut runner = TaskRunner::new(CountingTask::new("t", 5, &log));
    runner.start().unwrap();
    runner.cancel().unwrap();

    let err = runner
        .run_to_completion(Duration::from_millis(1))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
}

#[test]
fn test_step_error_fails_the_runner() {
    let mut calls = 0;
    let mut runner = TaskRunner::new(FnTask::new("flaky", move || {
        calls += 1;
        if calls == 2 {
            return Err(EngineError::Validation("boom".to_string()));
        }
        Ok(Progress::Pending)
    }));

    runner.start().unwrap();
    let err = runner.step().unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(runner.phase(), TaskPhase::Failed);
    assert!(runner.done());
}

#[test]
fn test_sequence_starts_each_child_after_the_previous_one() {
    let log = new_log();
    let mut runner = TaskRunner::new(Sequence::new(
        "seq",
        [
            TaskRunner::new(CountingTask::new("first", 1, &log)),
            TaskRunner::new(CountingTask::new("second", 0, &log)),
        ],
    ));

    runner.start().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first step".to_string()]);

    assert!(runner.step().unwrap());
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first step".to_string(),
            "first step".to_string(),
            "second step".to_string()
        ]
    );
}

#[test]
fn test_cancelling_a_sequence_unwinds_only_the_current_child() {
    let log = new_log();
    let mut runner = TaskRunner::new(Sequence::new(
        "seq",
        [
            TaskRunner::new(CountingTask::new("first", 3, &log)),
            TaskRunner::new(CountingTask::new("second", 0, &log)),
        ],
    ));
    runner.start().unwrap();
    runner.cancel().unwrap();

    let log = log.lock().unwrap();
    assert!(log.contains(&"first unwind: cancelled".to_string()));
    assert!(!log.iter().any(|e| e.starts_with("second")));
}
