// tests/task_group.rs

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackdag::errors::{EngineError, Result};
use stackdag::scheduler::{
    FailureMode, FnTask, Interrupt, PollingTaskGroup, Progress, Task, TaskGroup, TaskRunner,
};
use stackdag_test_utils::init_tracing;

type TestResult = std::result::Result<(), Box<dyn Error>>;
type Log = Arc<Mutex<Vec<String>>>;

/// Completes after `pending` yields, or fails on step `fail_at` (1-based).
struct Worker {
    name: String,
    pending: usize,
    fail_at: Option<usize>,
    steps: usize,
    log: Log,
}

impl Worker {
    fn ok(name: &str, pending: usize, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            pending,
            fail_at: None,
            steps: 0,
            log: log.clone(),
        }
    }

    fn failing(name: &str, fail_at: usize, log: &Log) -> Self {
        Self {
            fail_at: Some(fail_at),
            ..Self::ok(name, usize::MAX, log)
        }
    }
}

impl Task for Worker {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        self.steps += 1;
        if self.fail_at == Some(self.steps) {
            self.log.lock().unwrap().push(format!("{} failed", self.name));
            return Err(EngineError::Validation(format!("{} broke", self.name)));
        }
        if self.pending == 0 {
            self.log.lock().unwrap().push(format!("{} done", self.name));
            return Ok(Progress::Complete);
        }
        self.pending -= 1;
        Ok(Progress::Pending)
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} unwound: {cause}", self.name));
        Ok(())
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_fail_fast_cancels_siblings_and_returns_first_error() {
    init_tracing();
    let log: Log = Arc::default();
    let group = TaskGroup::from_tasks(
        "three",
        [
            Worker::ok("a", 100, &log),
            Worker::failing("b", 2, &log),
            Worker::ok("c", 100, &log),
        ],
    );
    assert_eq!(group.mode(), FailureMode::FailFast);

    let err = group.run(Duration::from_millis(1)).await.unwrap_err();

    match err {
        EngineError::Validation(msg) => assert_eq!(msg, "b broke"),
        other => panic!("Expected b's error, got: {:?}", other),
    }
    let log = entries(&log);
    assert!(log.contains(&"a unwound: cancelled".to_string()));
    assert!(log.contains(&"c unwound: cancelled".to_string()));
    assert!(!log.iter().any(|e| e.ends_with("done")));
}

#[tokio::test]
async fn test_aggregate_waits_for_every_member_and_reports_all_failures() {
    init_tracing();
    let log: Log = Arc::default();
    let group = TaskGroup::from_tasks(
        "three",
        [
            Worker::ok("a", 3, &log),
            Worker::failing("b", 2, &log),
            Worker::failing("c", 1, &log),
        ],
    )
    .aggregate_exceptions(true);

    let err = group.run(Duration::from_millis(1)).await.unwrap_err();

    match err {
        EngineError::Aggregate(agg) => {
            let messages: Vec<String> = agg.failures().iter().map(|e| e.to_string()).collect();
            assert_eq!(messages.len(), 2);
            assert!(messages.iter().any(|m| m.contains("b broke")));
            assert!(messages.iter().any(|m| m.contains("c broke")));
        }
        other => panic!("Expected Aggregate, got: {:?}", other),
    }
    let log = entries(&log);
    assert!(log.contains(&"a done".to_string()));
    assert!(!log.iter().any(|e| e.contains("unwound")));
}

#[tokio::test]
async fn test_aggregate_wraps_a_single_failure_too() {
    let log: Log = Arc::default();
    let group = TaskGroup::from_tasks(
        "two",
        [Worker::ok("a", 1, &log), Worker::failing("b", 1, &log)],
    )
    .aggregate_exceptions(true);

    match group.run(Duration::from_millis(1)).await {
        Err(EngineError::Aggregate(agg)) => assert_eq!(agg.len(), 1),
        other => panic!("Expected Aggregate, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_all_members_succeed() -> TestResult {
    let log: Log = Arc::default();
    let group = TaskGroup::from_task_with_args(
        "args",
        |(name, pending)| Worker::ok(name, pending, &log),
        [("a", 0), ("b", 2), ("c", 1)],
    );
    assert_eq!(group.size(), 3);

    group.run(Duration::from_millis(1)).await?;

    let mut done = entries(&log);
    done.sort();
    assert_eq!(done, vec!["a done", "b done", "c done"]);
    Ok(())
}

#[test]
fn test_max_concurrency_limits_started_members() {
    let started: Log = Arc::default();
    let tasks = ["a", "b", "c", "d"].map(|name| {
        let started = started.clone();
        let mut polls = 0;
        FnTask::new(name, move || {
            if polls == 0 {
                started.lock().unwrap().push(name.to_string());
            }
            polls += 1;
            // Two steps each: the start and one resume.
            Ok(if polls >= 2 {
                Progress::Complete
            } else {
                Progress::Pending
            })
        })
    });
    let mut runner = TaskRunner::new(TaskGroup::from_tasks("limited", tasks).with_max_concurrency(2));

    runner.start().unwrap();
    // a and b were started, then stepped to completion in the same round,
    // which freed both slots for c and d.
    assert_eq!(entries(&started), vec!["a", "b", "c", "d"]);
    assert!(!runner.done());
    assert!(runner.step().unwrap());
}

#[test]
fn test_max_concurrency_holds_back_members_while_slots_are_busy() {
    let log: Log = Arc::default();
    let group = TaskGroup::from_tasks(
        "limited",
        [
            Worker::ok("a", 5, &log),
            Worker::ok("b", 5, &log),
            Worker::ok("c", 0, &log),
        ],
    )
    .with_max_concurrency(2);
    let mut runner = TaskRunner::new(group);

    runner.start().unwrap();
    runner.step().unwrap();
    // c never got a slot while a and b were pending.
    assert!(entries(&log).is_empty());

    while !runner.step().unwrap() {}
    assert_eq!(entries(&log), vec!["a done", "b done", "c done"]);
}

#[tokio::test(start_paused = true)]
async fn test_polling_group_uses_its_coarse_cadence() -> TestResult {
    init_tracing();
    let log: Log = Arc::default();
    let group = PollingTaskGroup::from_tasks(
        "poll",
        [Worker::ok("a", 2, &log), Worker::ok("b", 3, &log)],
    );

    let begin = tokio::time::Instant::now();
    group.run().await?;

    // Start runs the first two steps; b needs two more polls.
    assert_eq!(begin.elapsed(), PollingTaskGroup::DEFAULT_POLL_INTERVAL * 2);
    assert_eq!(entries(&log), vec!["a done", "b done"]);
    Ok(())
}
