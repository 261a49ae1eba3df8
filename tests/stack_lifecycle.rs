// tests/stack_lifecycle.rs

use std::error::Error;
use std::sync::Arc;

use stackdag::config::Template;
use stackdag::engine::ProviderCache;
use stackdag::errors::EngineError;
use stackdag::resource::{TypeRegistry, lock};
use stackdag::stack::Stack;
use stackdag::store::{MemoryStore, StackStore};
use stackdag::types::{Action, Status};
use stackdag_test_utils::builders::{ResourceBuilder, TemplateBuilder};
use stackdag_test_utils::init_tracing;
use stackdag_test_utils::scripted::{Journal, SCRIPTED, STRICT, scripted_registry};

type TestResult = Result<(), Box<dyn Error>>;

struct Env {
    journal: Journal,
    store: Arc<MemoryStore>,
    registry: Arc<TypeRegistry>,
    cache: Arc<ProviderCache>,
}

impl Env {
    fn new() -> Self {
        init_tracing();
        let journal = Journal::new();
        Self {
            registry: Arc::new(scripted_registry(&journal)),
            journal,
            store: Arc::new(MemoryStore::new()),
            cache: Arc::new(ProviderCache::default()),
        }
    }

    fn stack(&self, template: Template) -> Stack {
        Stack::new(
            "s",
            template,
            self.store.clone(),
            self.registry.clone(),
            self.cache.clone(),
        )
        .expect("stack should build")
    }

    fn load(&self, stack: &Stack) -> Stack {
        Stack::load(
            stack.id(),
            self.store.clone(),
            self.registry.clone(),
            self.cache.clone(),
        )
        .expect("stack should load")
    }
}

fn state(stack: &Stack, name: &str) -> (Action, Status) {
    let state = stack
        .resource_state(name)
        .unwrap_or_else(|| panic!("no resource {name}"));
    (state.action, state.status)
}

fn scripted(name: &str) -> ResourceBuilder {
    ResourceBuilder::new(name, SCRIPTED)
}

/// A <- B, A <- C
fn fan_out(b: ResourceBuilder) -> Template {
    TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(b.depends_on("A"))
        .resource(scripted("C").depends_on("A"))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_create_runs_every_resource_in_dependency_order() -> TestResult {
    let env = Env::new();
    let mut stack = env.stack(fan_out(scripted("B").property("polls", 2i64)));

    stack.create().await?;

    assert_eq!((stack.action(), stack.status()), (Action::Create, Status::Complete));
    assert_eq!(stack.status_reason(), "Stack CREATE completed successfully");
    for name in ["A", "B", "C"] {
        assert_eq!(state(&stack, name), (Action::Create, Status::Complete));
    }
    let j = &env.journal;
    assert_eq!(j.started("create"), vec!["A", "B", "C"]);
    assert!(j.position("A create done") < j.position("B create"));
    assert!(j.position("A create done") < j.position("C create"));
    // C finishes while B is still polling.
    assert!(j.position("C create done") < j.position("B create done"));

    let a = stack.resource_by_name("A").unwrap();
    assert_eq!(lock(&a).resource_id(), Some("id-s-A"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_rolls_back_only_created_resources() {
    let env = Env::new();
    let mut stack = env.stack(fan_out(scripted("B").property("fail", "create")));

    let err = stack.create().await.unwrap_err();

    match &err {
        EngineError::ResourceActionFailed { resource, action, .. } => {
            assert_eq!(resource, "B");
            assert_eq!(*action, Action::Create);
        }
        other => panic!("Expected ResourceActionFailed, got: {:?}", other),
    }
    // B failed while starting, so C was never launched.
    assert_eq!(env.journal.started("create"), vec!["A", "B"]);
    assert_eq!(state(&stack, "C"), (Action::Init, Status::Complete));
    assert_eq!(state(&stack, "B"), (Action::Create, Status::Failed));

    // Rollback deleted A and nothing else.
    assert_eq!(env.journal.started("delete"), vec!["A"]);
    assert_eq!(state(&stack, "A"), (Action::Delete, Status::Complete));

    assert_eq!((stack.action(), stack.status()), (Action::Create, Status::Failed));
    assert!(stack.status_reason().ends_with("(rolled back)"));
    assert!(stack.status_reason().contains("create of B failed as scripted"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_marks_blocked_dependents() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A").property("fail", "create"))
        .resource(scripted("C").depends_on("B"))
        .build();
    let mut stack = env.stack(template);

    assert!(stack.create().await.is_err());

    assert_eq!(state(&stack, "C"), (Action::Create, Status::Failed));
    assert_eq!(
        stack.resource_state("C").unwrap().reason,
        "dependency B failed"
    );
    assert!(!env.journal.started("create").contains(&"C".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_disable_rollback_keeps_created_resources() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .disable_rollback()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A").property("fail", "create"))
        .build();
    let mut stack = env.stack(template);

    assert!(stack.create().await.is_err());

    assert!(env.journal.started("delete").is_empty());
    assert_eq!(state(&stack, "A"), (Action::Create, Status::Complete));
    assert!(!stack.status_reason().contains("rolled back"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_rollback_reports_both_errors() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A").property("fail", "delete"))
        .resource(scripted("B").depends_on("A").property("fail", "create"))
        .build();
    let mut stack = env.stack(template);

    let err = stack.create().await.unwrap_err();

    match err {
        EngineError::RollbackFailed { original, rollback } => {
            assert!(original.to_string().contains("create of B failed"));
            assert!(rollback.to_string().contains("delete of A failed"));
        }
        other => panic!("Expected RollbackFailed, got: {:?}", other),
    }
    assert_eq!(stack.status(), Status::Failed);
    assert!(stack.status_reason().contains("rollback failed"));
    assert_eq!(state(&stack, "A"), (Action::Delete, Status::Failed));
}

#[tokio::test(start_paused = true)]
async fn test_create_twice_is_rejected() -> TestResult {
    let env = Env::new();
    let mut stack = env.stack(fan_out(scripted("B")));
    stack.create().await?;

    match stack.create().await {
        Err(EngineError::Validation(msg)) => assert!(msg.contains("already been created")),
        other => panic!("Expected Validation, got: {:?}", other),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resource_timeout_fails_and_unwinds() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A").property("hang", "create").timeout_secs(1))
        .build();
    let mut stack = env.stack(template);

    let err = stack.create().await.unwrap_err();

    match err {
        EngineError::Timeout { task, .. } => assert_eq!(task, "A CREATE"),
        other => panic!("Expected Timeout, got: {:?}", other),
    }
    assert!(env.journal.contains("A create cancelled"));
    let a = stack.resource_state("A").unwrap();
    assert_eq!((a.action, a.status), (Action::Create, Status::Failed));
    assert_eq!(a.reason, "timed out after 1s");
    // Nothing reached CREATE_COMPLETE, so there was nothing to roll back.
    assert!(env.journal.started("delete").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_tears_down_dependents_first() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A"))
        .resource(scripted("C").depends_on("B").property("polls", 1i64))
        .build();
    let mut stack = env.stack(template);
    stack.create().await?;

    stack.delete().await?;

    assert_eq!(env.journal.started("delete"), vec!["C", "B", "A"]);
    assert_eq!((stack.action(), stack.status()), (Action::Delete, Status::Complete));
    for name in ["A", "B", "C"] {
        assert_eq!(state(&stack, name), (Action::Delete, Status::Complete));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_keeps_going_past_failures() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A").property("fail", "delete"))
        .resource(scripted("X"))
        .build();
    let mut stack = env.stack(template);
    stack.create().await?;

    let err = stack.delete().await.unwrap_err();

    match err {
        EngineError::Aggregate(agg) => assert_eq!(agg.len(), 1),
        other => panic!("Expected Aggregate, got: {:?}", other),
    }
    assert_eq!(state(&stack, "X"), (Action::Delete, Status::Complete));
    assert_eq!(state(&stack, "B"), (Action::Delete, Status::Failed));
    // A waits for B, which failed.
    assert_eq!(state(&stack, "A"), (Action::Delete, Status::Failed));
    assert_eq!(stack.resource_state("A").unwrap().reason, "dependency B failed");
    assert_eq!((stack.action(), stack.status()), (Action::Delete, Status::Failed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_suspend_and_resume_follow_graph_direction() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A"))
        .build();
    let mut stack = env.stack(template);
    stack.create().await?;

    stack.suspend().await?;
    assert_eq!(env.journal.started("suspend"), vec!["B", "A"]);
    assert_eq!((stack.action(), stack.status()), (Action::Suspend, Status::Complete));
    assert_eq!(state(&stack, "A"), (Action::Suspend, Status::Complete));

    stack.resume().await?;
    assert_eq!(env.journal.started("resume"), vec!["A", "B"]);
    assert_eq!((stack.action(), stack.status()), (Action::Resume, Status::Complete));
    assert_eq!(state(&stack, "B"), (Action::Resume, Status::Complete));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_suspend_keeps_previous_state() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(
            scripted("U")
                .depends_on("A")
                .property("unsupported", vec!["suspend", "resume"]),
        )
        .build();
    let mut stack = env.stack(template);
    stack.create().await?;

    stack.suspend().await?;

    let u = stack.resource_state("U").unwrap();
    assert_eq!((u.action, u.status), (Action::Create, Status::Complete));
    assert_eq!(u.reason, format!("suspend not supported by {SCRIPTED}"));
    assert_eq!(state(&stack, "A"), (Action::Suspend, Status::Complete));
    assert_eq!(stack.status(), Status::Complete);
    assert!(stack.status_reason().contains("not supported by: U"));

    stack.resume().await?;
    // U was never suspended, so it is not resumed either.
    assert_eq!(env.journal.started("resume"), vec!["A"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_suspend_requires_a_completed_stack() {
    let env = Env::new();
    let mut stack = env.stack(fan_out(scripted("B")));

    match stack.suspend().await {
        Err(EngineError::Validation(msg)) => assert!(msg.contains("cannot be suspended")),
        other => panic!("Expected Validation, got: {:?}", other),
    }
    match stack.resume().await {
        Err(EngineError::Validation(msg)) => assert!(msg.contains("cannot be resumed")),
        other => panic!("Expected Validation, got: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_update_in_place_for_allowed_keys() -> TestResult {
    let env = Env::new();
    let v1 = TemplateBuilder::new()
        .resource(scripted("A").property("tag", "one"))
        .resource(scripted("B").depends_on("A"))
        .build();
    let v2 = TemplateBuilder::new()
        .resource(scripted("A").property("tag", "two"))
        .resource(scripted("B").depends_on("A"))
        .build();
    let mut stack = env.stack(v1);
    stack.create().await?;

    stack.update(v2).await?;

    assert!(env.journal.contains("A changed tag"));
    assert!(env.journal.started("delete").is_empty());
    // B is unchanged and untouched.
    assert_eq!(env.journal.started("update"), vec!["A"]);
    assert_eq!(state(&stack, "A"), (Action::Update, Status::Complete));
    assert_eq!(state(&stack, "B"), (Action::Create, Status::Complete));

    let a = stack.resource_by_name("A").unwrap();
    assert_eq!(lock(&a).properties()["tag"].as_str(), Some("two"));
    assert_eq!((stack.action(), stack.status()), (Action::Update, Status::Complete));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_replaces_for_replace_only_keys() -> TestResult {
    let env = Env::new();
    let v1 = TemplateBuilder::new()
        .resource(scripted("A").property("flavor", "small"))
        .build();
    let v2 = TemplateBuilder::new()
        .resource(scripted("A").property("flavor", "large"))
        .build();
    let mut stack = env.stack(v1);
    stack.create().await?;

    stack.update(v2).await?;

    assert_eq!(env.journal.started("create"), vec!["A", "A"]);
    let entries = env.journal.entries();
    let deleted = entries.iter().position(|e| e == "A delete done").unwrap();
    let recreated = entries.iter().rposition(|e| e == "A create").unwrap();
    assert!(deleted < recreated);

    let a = stack.resource_state("A").unwrap();
    assert_eq!((a.action, a.status), (Action::Update, Status::Complete));
    assert_eq!(a.reason, "replaced");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mixed_update_is_rejected_by_strict_types() -> TestResult {
    let env = Env::new();
    let v1 = TemplateBuilder::new()
        .resource(ResourceBuilder::new("A", STRICT).property("tag", "one").property("flavor", "small"))
        .build();
    let v2 = TemplateBuilder::new()
        .resource(ResourceBuilder::new("A", STRICT).property("tag", "two").property("flavor", "large"))
        .build();
    let mut stack = env.stack(v1);
    stack.create().await?;

    let err = stack.update(v2).await.unwrap_err();

    assert!(err.to_string().contains("requires replacement"));
    assert_eq!(state(&stack, "A"), (Action::Update, Status::Failed));
    assert_eq!((stack.action(), stack.status()), (Action::Update, Status::Failed));
    assert!(env.journal.started("delete").is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_update_adds_and_removes_resources() -> TestResult {
    let env = Env::new();
    let v1 = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").depends_on("A"))
        .build();
    let v2 = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("C").depends_on("A"))
        .build();
    let mut stack = env.stack(v1);
    stack.create().await?;

    stack.update(v2).await?;

    assert_eq!(env.journal.started("create"), vec!["A", "B", "C"]);
    assert_eq!(env.journal.started("delete"), vec!["B"]);
    assert!(stack.resource_by_name("B").is_none());
    assert_eq!(state(&stack, "C"), (Action::Create, Status::Complete));

    let stored: Vec<String> = env
        .store
        .resources(stack.id())?
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert!(!stored.contains(&"B".to_string()));
    assert!(stack.graph().contains("C") && !stack.graph().contains("B"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_refs_resolve_to_the_target_resource_id() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("db"))
        .resource(scripted("app").reference("endpoint", "db"))
        .build();
    let mut stack = env.stack(template);

    stack.create().await?;

    let app = stack.resource_by_name("app").unwrap();
    assert_eq!(lock(&app).properties()["endpoint"].as_str(), Some("id-s-db"));
    assert!(env.journal.position("db create done") < env.journal.position("app create"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_instance_group_resizes_members() -> TestResult {
    let env = Env::new();
    let group = |size: i64| {
        TemplateBuilder::new()
            .resource(
                ResourceBuilder::new("G", "Stackdag::InstanceGroup").property("size", size),
            )
            .build()
    };
    let mut stack = env.stack(group(3));

    stack.create().await?;
    let g = stack.resource_by_name("G").unwrap();
    assert_eq!(lock(&g).resource_id(), Some("G-0,G-1,G-2"));

    stack.update(group(1)).await?;
    assert_eq!(lock(&g).resource_id(), Some("G-0"));
    assert_eq!(state(&stack, "G"), (Action::Update, Status::Complete));

    stack.update(group(2)).await?;
    assert_eq!(lock(&g).resource_id(), Some("G-0,G-1"));

    stack.delete().await?;
    assert_eq!(state(&stack, "G"), (Action::Delete, Status::Complete));
    Ok(())
}

/// An instance group of scripted members where only `G-1` fails to create.
fn flaky_group(size: i64) -> Template {
    let mut members = toml::map::Map::new();
    members.insert("fail".to_string(), "create".into());
    members.insert("fail_only".to_string(), "G-1".into());
    TemplateBuilder::new()
        .disable_rollback()
        .resource(
            ResourceBuilder::new("G", "Stackdag::InstanceGroup")
                .property("size", size)
                .property("member_type", SCRIPTED)
                .property("member_properties", toml::Value::Table(members)),
        )
        .build()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_instance_group_keeps_members_of_a_failed_create() -> TestResult {
    let env = Env::new();
    let mut stack = env.stack(flaky_group(3));

    assert!(stack.create().await.is_err());

    let g = stack.resource_by_name("G").unwrap();
    assert_eq!(state(&stack, "G"), (Action::Create, Status::Failed));
    // G-2 was cancelled before it started, so it never existed.
    assert_eq!(lock(&g).resource_id(), Some("G-0,G-1"));
    assert_eq!(env.journal.started("create"), vec!["G-0", "G-1"]);

    // A fresh load only knows the members through the stored resource id.
    let mut reloaded = env.load(&stack);
    reloaded.delete().await?;

    assert_eq!(sorted(env.journal.started("delete")), vec!["G-0", "G-1"]);
    assert_eq!(state(&reloaded, "G"), (Action::Delete, Status::Complete));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_instance_group_keeps_members_of_a_failed_grow() -> TestResult {
    let env = Env::new();
    let mut stack = env.stack(flaky_group(1));
    stack.create().await?;
    let g = stack.resource_by_name("G").unwrap();
    assert_eq!(lock(&g).resource_id(), Some("G-0"));

    assert!(stack.update(flaky_group(3)).await.is_err());

    assert_eq!(state(&stack, "G"), (Action::Update, Status::Failed));
    assert_eq!(lock(&g).resource_id(), Some("G-0,G-1,G-2"));

    stack.delete().await?;

    assert_eq!(
        sorted(env.journal.started("delete")),
        vec!["G-0", "G-1", "G-2"]
    );
    assert_eq!(state(&stack, "G"), (Action::Delete, Status::Complete));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_generic_resource_failure_and_provider_cache() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(ResourceBuilder::new("img", "Stackdag::Generic").property("image", "cirros"))
        .resource(
            ResourceBuilder::new("bad", "Stackdag::Generic")
                .depends_on("img")
                .property("fail_on", "create"),
        )
        .build();
    let mut stack = env.stack(template);

    let err = stack.create().await.unwrap_err();

    assert!(err.to_string().contains("create of s-bad failed as configured"));
    assert_eq!(
        env.store.resource_data_get(stack.id(), "img", "image_id")?,
        Some("img-cirros".to_string())
    );
    assert_eq!(env.cache.get("image:cirros"), Some("img-cirros".to_string()));
    // Rolled back.
    assert_eq!(state(&stack, "img"), (Action::Delete, Status::Complete));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_invalid_properties_are_rejected_before_anything_runs() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A").property("invalid", true))
        .build();

    let result = Stack::new(
        "s",
        template,
        env.store.clone(),
        env.registry.clone(),
        env.cache.clone(),
    );

    match result {
        Err(EngineError::Validation(msg)) => {
            assert!(msg.contains("resource 'A'"));
            assert!(msg.contains("scripted validation failure"));
        }
        other => panic!("Expected Validation, got: {:?}", other),
    }
    assert!(env.journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_type_is_rejected() {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(ResourceBuilder::new("A", "No::Such"))
        .build();

    let result = Stack::new(
        "s",
        template,
        env.store.clone(),
        env.registry.clone(),
        env.cache.clone(),
    );
    match result {
        Err(EngineError::Validation(msg)) => assert!(msg.contains("unknown resource type 'No::Such'")),
        other => panic!("Expected Validation, got: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_transition_is_recorded_as_an_event() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new().resource(scripted("A")).build();
    let mut stack = env.stack(template);
    stack.create().await?;

    let events: Vec<(String, Action, Status)> = stack
        .events()?
        .into_iter()
        .map(|e| (e.resource_name, e.action, e.status))
        .collect();
    assert_eq!(
        events,
        vec![
            ("A".to_string(), Action::Create, Status::InProgress),
            ("A".to_string(), Action::Create, Status::Complete),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_loaded_stack_keeps_states_and_can_be_deleted() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(scripted("A"))
        .resource(scripted("B").reference("peer", "A"))
        .build();
    let mut stack = env.stack(template);
    stack.create().await?;

    let mut loaded = env.load(&stack);

    assert_eq!(loaded.name(), "s");
    assert_eq!((loaded.action(), loaded.status()), (Action::Create, Status::Complete));
    assert_eq!(state(&loaded, "B"), (Action::Create, Status::Complete));
    let b = loaded.resource_by_name("B").unwrap();
    assert_eq!(lock(&b).resource_id(), Some("id-s-B"));
    assert_eq!(lock(&b).properties()["peer"].as_str(), Some("id-s-A"));

    loaded.delete().await?;
    assert_eq!(env.journal.started("delete"), vec!["B", "A"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_generic_resources_poll_and_opt_out_of_suspend() -> TestResult {
    let env = Env::new();
    let template = TemplateBuilder::new()
        .resource(
            ResourceBuilder::new("slow", "Stackdag::Generic")
                .property("create_polls", 3i64)
                .property("delete_polls", 2i64),
        )
        .resource(
            ResourceBuilder::new("pinned", "Stackdag::Generic").property("suspendable", false),
        )
        .build();
    let mut stack = env.stack(template);

    stack.create().await?;
    let slow = stack.resource_by_name("slow").unwrap();
    assert_eq!(lock(&slow).resource_id(), Some("s-slow"));

    stack.suspend().await?;
    assert_eq!(state(&stack, "slow"), (Action::Suspend, Status::Complete));
    assert_eq!(state(&stack, "pinned"), (Action::Create, Status::Complete));
    assert!(stack.status_reason().contains("not supported by: pinned"));

    stack.delete().await?;
    assert_eq!(state(&stack, "slow"), (Action::Delete, Status::Complete));
    assert_eq!(state(&stack, "pinned"), (Action::Delete, Status::Complete));
    Ok(())
}
