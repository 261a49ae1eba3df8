// tests/dependency_group.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use stackdag::dag::{DependencyGraph, Direction, NodeRunState};
use stackdag::errors::{EngineError, Result};
use stackdag::scheduler::{
    DependencyTaskGroup, FailureMode, Interrupt, NodeTasks, Progress, Task, TaskRunner,
};
use stackdag_test_utils::init_tracing;

type Log = Arc<Mutex<Vec<String>>>;

struct NodeWork {
    name: String,
    pending: usize,
    fail: bool,
    started: bool,
    log: Log,
}

impl Task for NodeWork {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        let mut log = self.log.lock().unwrap();
        if !self.started {
            self.started = true;
            log.push(format!("{} start", self.name));
            if self.fail {
                log.push(format!("{} failed", self.name));
                return Err(EngineError::Validation(format!("{} broke", self.name)));
            }
        }
        if self.pending == 0 {
            log.push(format!("{} done", self.name));
            return Ok(Progress::Complete);
        }
        self.pending -= 1;
        Ok(Progress::Pending)
    }

    fn cancel(&mut self, _cause: &Interrupt) -> Result<()> {
        self.log.lock().unwrap().push(format!("{} cancelled", self.name));
        Ok(())
    }
}

#[derive(Default)]
struct Plan {
    log: Log,
    pending: HashMap<String, usize>,
    failing: HashSet<String>,
    skipped: HashSet<String>,
    blocked: Vec<(String, String)>,
}

impl Plan {
    fn pending(mut self, node: &str, polls: usize) -> Self {
        self.pending.insert(node.to_string(), polls);
        self
    }

    fn failing(mut self, node: &str) -> Self {
        self.failing.insert(node.to_string());
        self
    }

    fn skipped(mut self, node: &str) -> Self {
        self.skipped.insert(node.to_string());
        self
    }
}

impl NodeTasks for Plan {
    fn make_task(&mut self, node: &str) -> Result<Option<TaskRunner>> {
        if self.skipped.contains(node) {
            self.log.lock().unwrap().push(format!("{node} skipped"));
            return Ok(None);
        }
        Ok(Some(TaskRunner::new(NodeWork {
            name: node.to_string(),
            pending: self.pending.get(node).copied().unwrap_or(0),
            fail: self.failing.contains(node),
            started: false,
            log: self.log.clone(),
        })))
    }

    fn blocked(&mut self, node: &str, cause: &str) {
        self.blocked.push((node.to_string(), cause.to_string()));
    }
}

fn graph(edges: &[(&str, &str)], nodes: &[&str]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for node in nodes {
        graph.add_node(node);
    }
    for (src, dst) in edges {
        graph.add_edge(src, dst);
    }
    graph
}

fn drive<P: NodeTasks>(group: &mut DependencyTaskGroup<P>) -> Result<()> {
    for _ in 0..1000 {
        if group.step()? == Progress::Complete {
            return Ok(());
        }
    }
    panic!("dependency group did not finish");
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
}

#[test]
fn test_dependents_start_only_after_dependencies_complete() {
    init_tracing();
    let g = graph(&[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")], &["A", "B", "C", "D"]);
    let plan = Plan::default().pending("A", 2).pending("C", 1);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();

    drive(&mut group).unwrap();

    let log = log.lock().unwrap().clone();
    assert!(position(&log, "A done") < position(&log, "B start"));
    assert!(position(&log, "A done") < position(&log, "C start"));
    assert!(position(&log, "B done") < position(&log, "D start"));
    assert!(position(&log, "C done") < position(&log, "D start"));
}

#[test]
fn test_independent_nodes_run_concurrently() {
    let g = graph(&[], &["A", "B"]);
    let plan = Plan::default().pending("A", 3).pending("B", 3);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();

    assert_eq!(group.step().unwrap(), Progress::Pending);
    let log = log.lock().unwrap().clone();
    assert_eq!(log, vec!["A start", "B start"]);
}

#[test]
fn test_reverse_direction_tears_down_dependents_first() {
    let g = graph(&[("A", "B"), ("B", "C")], &["A", "B", "C"]);
    let plan = Plan::default().pending("C", 1);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("delete", &g, Direction::Reverse, plan).unwrap();

    drive(&mut group).unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec!["C start", "C done", "B start", "B done", "A start", "A done"]
    );
}

#[test]
fn test_fail_fast_stops_launching_and_cancels_in_flight_siblings() {
    init_tracing();
    // B and C both depend on A; B fails while starting, C is never launched.
    let g = graph(&[("A", "B"), ("A", "C")], &["A", "B", "C"]);
    let plan = Plan::default().failing("B");
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();

    let err = drive(&mut group).unwrap_err();

    assert_eq!(err.to_string(), "Validation error: B broke");
    let log = log.lock().unwrap().clone();
    assert!(!log.iter().any(|e| e.starts_with("C ")));
    assert_eq!(
        group.scheduler().run_state_of("C"),
        Some(NodeRunState::Running)
    );
}

#[test]
fn test_fail_fast_lets_running_siblings_finish_their_round_then_cancels() {
    let g = graph(&[], &["A", "B"]);
    // A is already running when B fails on its first step.
    let plan = Plan::default().pending("A", 5).failing("B");
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();
    assert!(drive(&mut group).is_err());
    let log = log.lock().unwrap().clone();
    assert_eq!(log, vec!["A start", "B start", "B failed", "A cancelled"]);
}

#[test]
fn test_aggregate_keeps_independent_branches_going() {
    init_tracing();
    // A -> B -> C and X -> Y; B fails.
    let g = graph(
        &[("A", "B"), ("B", "C"), ("X", "Y")],
        &["A", "B", "C", "X", "Y"],
    );
    let plan = Plan::default().failing("B").pending("Y", 2);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("delete", &g, Direction::Forward, plan)
        .unwrap()
        .with_mode(FailureMode::Aggregate);

    let err = drive(&mut group).unwrap_err();

    match err {
        EngineError::Aggregate(agg) => assert_eq!(agg.len(), 1),
        other => panic!("Expected Aggregate, got: {:?}", other),
    }
    let log = log.lock().unwrap().clone();
    assert!(log.contains(&"Y done".to_string()));
    assert!(!log.iter().any(|e| e.starts_with("C ")));
    assert_eq!(
        group.tasks().blocked,
        vec![("C".to_string(), "B".to_string())]
    );
}

#[test]
fn test_nodes_with_nothing_to_do_release_their_dependents() {
    let g = graph(&[("A", "B"), ("B", "C")], &["A", "B", "C"]);
    let plan = Plan::default().skipped("A").skipped("B");
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();

    drive(&mut group).unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(log, vec!["A skipped", "B skipped", "C start", "C done"]);
}

#[test]
fn test_participants_restrict_the_run() {
    let g = graph(&[("A", "B"), ("B", "C")], &["A", "B", "C"]);
    let plan = Plan::default();
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("delete", &g, Direction::Reverse, plan)
        .unwrap()
        .with_participants(["A", "C"]);

    drive(&mut group).unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(log, vec!["C start", "C done", "A start", "A done"]);
}

#[test]
fn test_max_concurrency_caps_running_nodes() {
    let g = graph(&[], &["A", "B", "C"]);
    let plan = Plan::default().pending("A", 2).pending("B", 2).pending("C", 2);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan)
        .unwrap()
        .with_max_concurrency(2);

    group.step().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["A start", "B start"]);

    drive(&mut group).unwrap();
    assert!(log.lock().unwrap().contains(&"C done".to_string()));
}

#[test]
fn test_cancel_unwinds_running_nodes() {
    let g = graph(&[], &["A", "B"]);
    let plan = Plan::default().pending("A", 10).pending("B", 10);
    let log = plan.log.clone();
    let mut group = DependencyTaskGroup::new("create", &g, Direction::Forward, plan).unwrap();

    group.step().unwrap();
    group.cancel(&Interrupt::Cancelled).unwrap();

    let log = log.lock().unwrap().clone();
    assert!(log.contains(&"A cancelled".to_string()));
    assert!(log.contains(&"B cancelled".to_string()));
}
