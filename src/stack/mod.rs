// src/stack/mod.rs

//! Whole-stack lifecycle operations.
//!
//! A [`Stack`] owns its resources and the dependency graph over them. Every
//! operation walks the graph through a [`DependencyTaskGroup`] in the
//! direction the action needs:
//!
//! | operation | order   | on failure                                  |
//! |-----------|---------|---------------------------------------------|
//! | create    | forward | fail fast, then roll back created resources |
//! | update    | forward | fail fast (removals: reverse, aggregate)    |
//! | delete    | reverse | keep going, report every failure            |
//! | suspend   | reverse | fail fast                                   |
//! | resume    | forward | fail fast                                   |

mod operations;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::model::{Template, resolve_refs};
use crate::config::validate::validate_stack_name;
use crate::dag::{DependencyGraph, Direction};
use crate::engine::cache::ProviderCache;
use crate::errors::{EngineError, Result};
use crate::resource::{
    Resource, ResourceHandle, ResourceState, StackContext, TypeRegistry, lock,
};
use crate::scheduler::{DependencyTaskGroup, FailureMode, NodeTasks, TaskRunner};
use crate::store::{Event, StackId, StackRecord, StackStore};
use crate::types::{Action, Status};

use operations::{ActionPlan, UpdatePlan};

pub struct Stack {
    name: String,
    template: Template,
    graph: DependencyGraph,
    resources: HashMap<String, ResourceHandle>,
    state: ResourceState,
    context: Arc<StackContext>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("id", &self.context.stack_id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("resources", &self.graph.len())
            .finish_non_exhaustive()
    }
}

/// Instantiate and validate the plugin for every resource of `template`.
fn build_resources(
    template: &Template,
    context: &Arc<StackContext>,
) -> Result<HashMap<String, ResourceHandle>> {
    let mut resources = HashMap::with_capacity(template.len());
    for definition in template.resources() {
        let plugin = context.registry.instantiate(&definition.resource_type)?;
        if let Some(reason) = plugin.validate(&definition.properties) {
            return Err(EngineError::Validation(format!(
                "resource '{}' ({}): {reason}",
                definition.name, definition.resource_type
            )));
        }
        let resource = Resource::new(definition.clone(), plugin, context.clone());
        resources.insert(definition.name.clone(), resource.into_handle());
    }
    Ok(resources)
}

/// `graph` extended with `removed` nodes and their old edges, so an
/// interrupted update still tears them down in a valid order.
fn union_graph(graph: &DependencyGraph, old: &DependencyGraph, removed: &[String]) -> DependencyGraph {
    let mut merged = graph.clone();
    for name in removed {
        merged.add_node(name);
        for dep in old.dependencies_of(name) {
            merged.add_edge(dep, name);
        }
        for dependent in old.dependents_of(name) {
            merged.add_edge(name, dependent);
        }
    }
    if merged.validate().is_ok() {
        return merged;
    }

    warn!("old and new dependency graphs conflict; keeping removed resources unordered");
    let mut fallback = graph.clone();
    for name in removed {
        fallback.add_node(name);
    }
    fallback
}

impl Stack {
    /// Build a new, not yet created stack.
    ///
    /// Validates the stack name, instantiates every resource type through
    /// the registry and runs each type's property validation, all before any
    /// task runs.
    pub fn new(
        name: &str,
        template: Template,
        store: Arc<dyn StackStore>,
        registry: Arc<TypeRegistry>,
        cache: Arc<ProviderCache>,
    ) -> Result<Self> {
        validate_stack_name(name)?;

        let context = Arc::new(StackContext {
            stack_id: Uuid::new_v4(),
            stack_name: name.to_string(),
            store,
            cache,
            registry,
        });
        let graph = DependencyGraph::from_template(&template);
        graph.validate()?;
        let resources = build_resources(&template, &context)?;

        Ok(Self {
            name: name.to_string(),
            template,
            graph,
            resources,
            state: ResourceState::init(),
            context,
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    /// Rebuild a stack, with its resource states and ids, from the store.
    pub fn load(
        id: StackId,
        store: Arc<dyn StackStore>,
        registry: Arc<TypeRegistry>,
        cache: Arc<ProviderCache>,
    ) -> Result<Self> {
        let record = store.load(id)?;
        let records = store.resources(id)?;

        let context = Arc::new(StackContext {
            stack_id: id,
            stack_name: record.name.clone(),
            store,
            cache,
            registry,
        });

        let mut resources = build_resources(&record.template, &context)?;
        let mut graph = DependencyGraph::from_template(&record.template);

        for stored in records {
            let handle = match resources.get(&stored.name) {
                Some(handle) => handle.clone(),
                None => {
                    // Removed by an update that never finished deleting it.
                    let plugin = context
                        .registry
                        .instantiate(&stored.definition.resource_type)?;
                    let handle =
                        Resource::new(stored.definition.clone(), plugin, context.clone()).into_handle();
                    graph.add_node(&stored.name);
                    resources.insert(stored.name.clone(), handle.clone());
                    handle
                }
            };
            let mut resource = lock(&handle);
            // The stored definition is the one the provider side last saw.
            let properties = stored.definition.properties.clone();
            resource.set_definition(stored.definition, properties);
            resource.load_state(
                ResourceState::new(stored.action, stored.status, stored.status_reason),
                stored.resource_id,
            );
        }

        for handle in resources.values() {
            let definition = lock(handle).definition().clone();
            let properties = resolve_refs(&definition.properties, |target| {
                let other = resources.get(target)?;
                if Arc::ptr_eq(other, handle) {
                    return None;
                }
                let other = lock(other);
                Some(other.resource_id().unwrap_or(other.name()).to_string())
            });
            lock(handle).set_properties(properties);
        }

        info!(stack = %record.name, %id, resources = resources.len(), "loaded stack");
        Ok(Self {
            name: record.name,
            template: record.template,
            graph,
            resources,
            state: ResourceState::new(record.action, record.status, record.status_reason),
            context,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    pub fn id(&self) -> StackId {
        self.context.stack_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn action(&self) -> Action {
        self.state.action
    }

    pub fn status(&self) -> Status {
        self.state.status
    }

    pub fn status_reason(&self) -> &str {
        &self.state.reason
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn resource_by_name(&self, name: &str) -> Option<ResourceHandle> {
        self.resources.get(name).cloned()
    }

    /// `(action, status, reason)` of one resource.
    pub fn resource_state(&self, name: &str) -> Option<ResourceState> {
        self.resources.get(name).map(|h| lock(h).state().clone())
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &ResourceHandle)> {
        self.graph
            .nodes()
            .filter_map(|name| self.resources.get(name).map(|handle| (name, handle)))
    }

    pub fn events(&self) -> Result<Vec<Event>> {
        self.context.store.events(self.id())
    }

    pub fn record(&self) -> StackRecord {
        StackRecord {
            id: self.id(),
            name: self.name.clone(),
            template: self.template.clone(),
            action: self.state.action,
            status: self.state.status,
            status_reason: self.state.reason.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn state_set(&mut self, action: Action, status: Status, reason: &str) -> Result<()> {
        self.state = ResourceState::new(action, status, reason);
        self.updated_at = Some(Utc::now());
        match status {
            Status::Failed => warn!(stack = %self.name, %action, %status, reason, "stack state changed"),
            _ => info!(stack = %self.name, %action, %status, "stack state changed"),
        }
        self.context.store.store(self.record())
    }

    fn ensure_not_deleted(&self) -> Result<()> {
        if self.state.is(Action::Delete, Status::Complete) {
            return Err(EngineError::Validation(format!(
                "stack '{}' has been deleted",
                self.name
            )));
        }
        Ok(())
    }

    /// Walk `graph` in `direction`, running `plan`'s task for each node.
    async fn drive<P>(
        &self,
        label: Action,
        graph: &DependencyGraph,
        direction: Direction,
        mode: FailureMode,
        participants: Option<Vec<String>>,
        plan: P,
    ) -> Result<()>
    where
        P: NodeTasks + 'static,
    {
        let config = self.template.config();
        let mut group = DependencyTaskGroup::new(
            format!("{} {}", self.name, label),
            graph,
            direction,
            plan,
        )?
        .with_mode(mode)
        .with_max_concurrency(config.max_concurrency);
        if let Some(participants) = participants {
            group = group.with_participants(participants);
        }

        let mut runner = TaskRunner::new(group);
        if let Some(timeout) = config.timeout() {
            runner = runner.with_timeout(timeout);
        }
        runner.run_to_completion(config.poll_interval()).await
    }

    /// Create every resource, dependencies first.
    ///
    /// On failure the stack becomes `(CREATE, FAILED)` and, unless
    /// `disable_rollback` is set, every resource that reached
    /// `(CREATE, COMPLETE)` is deleted again in reverse order before the
    /// original error is returned.
    pub async fn create(&mut self) -> Result<()> {
        self.ensure_not_deleted()?;
        if self.state.action != Action::Init {
            return Err(EngineError::Validation(format!(
                "stack '{}' has already been created",
                self.name
            )));
        }

        self.state_set(Action::Create, Status::InProgress, "Stack CREATE started")?;
        for (_, handle) in self.resources() {
            lock(handle).store()?;
        }
        let plan = ActionPlan::new(Action::Create, self.resources.clone());
        let outcome = self
            .drive(Action::Create, &self.graph, Direction::Forward, FailureMode::FailFast, None, plan)
            .await;

        let original = match outcome {
            Ok(()) => {
                return self.state_set(
                    Action::Create,
                    Status::Complete,
                    "Stack CREATE completed successfully",
                );
            }
            Err(err) => err,
        };

        let reason = original.to_string();
        self.state_set(Action::Create, Status::Failed, &reason)?;
        if self.template.config().disable_rollback {
            info!(stack = %self.name, "rollback disabled; leaving created resources in place");
            return Err(original);
        }

        match self.rollback().await {
            Ok(()) => {
                self.state_set(
                    Action::Create,
                    Status::Failed,
                    &format!("{reason} (rolled back)"),
                )?;
                Err(original)
            }
            Err(rollback) => {
                self.state_set(
                    Action::Create,
                    Status::Failed,
                    &format!("{reason}; rollback failed: {rollback}"),
                )?;
                Err(EngineError::RollbackFailed {
                    original: Box::new(original),
                    rollback: Box::new(rollback),
                })
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        let created: Vec<String> = self
            .resources()
            .filter(|(_, handle)| lock(handle).state().is(Action::Create, Status::Complete))
            .map(|(name, _)| name.to_string())
            .collect();
        info!(stack = %self.name, resources = ?created, "rolling back created resources");

        let plan = ActionPlan::new(Action::Delete, self.resources.clone());
        self.drive(
            Action::Delete,
            &self.graph,
            Direction::Reverse,
            FailureMode::Aggregate,
            Some(created),
            plan,
        )
        .await
    }

    /// Move the stack to `template`.
    ///
    /// Added resources are created and changed ones updated or replaced in
    /// dependency order over the new graph; resources the new template no
    /// longer declares are then deleted in reverse order of the old graph.
    /// A failed update is not rolled back.
    pub async fn update(&mut self, template: Template) -> Result<()> {
        self.ensure_not_deleted()?;
        if self.state.action == Action::Init {
            return Err(EngineError::Validation(format!(
                "stack '{}' has not been created",
                self.name
            )));
        }

        let new_graph = DependencyGraph::from_template(&template);
        new_graph.validate()?;

        let mut merged = self.resources.clone();
        for (name, handle) in build_resources(&template, &self.context)? {
            merged.entry(name).or_insert(handle);
        }
        let removed: Vec<String> = self
            .graph
            .nodes()
            .filter(|name| !template.contains(name))
            .map(str::to_string)
            .collect();

        let old_graph = self.graph.clone();
        self.graph = union_graph(&new_graph, &old_graph, &removed);
        self.resources = merged;
        self.template = template;
        self.state_set(Action::Update, Status::InProgress, "Stack UPDATE started")?;

        let plan = UpdatePlan::new(self.resources.clone(), self.template.resources().to_vec());
        let outcome = self
            .drive(Action::Update, &new_graph, Direction::Forward, FailureMode::FailFast, None, plan)
            .await;
        if let Err(err) = outcome {
            self.state_set(Action::Update, Status::Failed, &err.to_string())?;
            return Err(err);
        }

        if !removed.is_empty() {
            info!(stack = %self.name, resources = ?removed, "deleting resources removed by update");
            let plan = ActionPlan::new(Action::Delete, self.resources.clone());
            let outcome = self
                .drive(
                    Action::Delete,
                    &old_graph,
                    Direction::Reverse,
                    FailureMode::Aggregate,
                    Some(removed.clone()),
                    plan,
                )
                .await;
            if let Err(err) = outcome {
                self.state_set(Action::Update, Status::Failed, &err.to_string())?;
                return Err(err);
            }
            for name in &removed {
                self.resources.remove(name);
                self.context.store.delete_resource(self.id(), name)?;
            }
        }

        self.graph = new_graph;
        self.state_set(
            Action::Update,
            Status::Complete,
            "Stack UPDATE completed successfully",
        )
    }

    /// Delete every resource that may exist, dependents first. Every
    /// resource is attempted; failures are reported together.
    pub async fn delete(&mut self) -> Result<()> {
        self.ensure_not_deleted()?;
        self.state_set(Action::Delete, Status::InProgress, "Stack DELETE started")?;

        let plan = ActionPlan::new(Action::Delete, self.resources.clone());
        let outcome = self
            .drive(Action::Delete, &self.graph, Direction::Reverse, FailureMode::Aggregate, None, plan)
            .await;

        match outcome {
            Ok(()) => self.state_set(
                Action::Delete,
                Status::Complete,
                "Stack DELETE completed successfully",
            ),
            Err(err) => {
                self.state_set(Action::Delete, Status::Failed, &err.to_string())?;
                Err(err)
            }
        }
    }

    /// Suspend every resource, dependents first. Only a stack whose last
    /// create, update or resume completed can be suspended.
    pub async fn suspend(&mut self) -> Result<()> {
        self.ensure_not_deleted()?;
        let suspendable = matches!(self.state.action, Action::Create | Action::Update | Action::Resume)
            && self.state.status == Status::Complete;
        if !suspendable {
            return Err(EngineError::Validation(format!(
                "stack '{}' cannot be suspended while {}",
                self.name, self.state
            )));
        }
        self.run_toggle(Action::Suspend, Direction::Reverse).await
    }

    /// Resume a suspended stack, dependencies first.
    pub async fn resume(&mut self) -> Result<()> {
        self.ensure_not_deleted()?;
        if !self.state.is(Action::Suspend, Status::Complete) {
            return Err(EngineError::Validation(format!(
                "stack '{}' cannot be resumed while {}",
                self.name, self.state
            )));
        }
        self.run_toggle(Action::Resume, Direction::Forward).await
    }

    async fn run_toggle(&mut self, action: Action, direction: Direction) -> Result<()> {
        self.state_set(action, Status::InProgress, &format!("Stack {action} started"))?;

        let plan = ActionPlan::new(action, self.resources.clone());
        let outcome = self
            .drive(action, &self.graph, direction, FailureMode::FailFast, None, plan)
            .await;
        if let Err(err) = outcome {
            self.state_set(action, Status::Failed, &err.to_string())?;
            return Err(err);
        }

        let unsupported: Vec<String> = self
            .resources()
            .filter(|(_, handle)| lock(handle).unsupported_action() == Some(action))
            .map(|(name, _)| name.to_string())
            .collect();
        let reason = if unsupported.is_empty() {
            format!("Stack {action} completed successfully")
        } else {
            format!(
                "Stack {action} completed; {} not supported by: {}",
                action.as_str().to_lowercase(),
                unsupported.join(", ")
            )
        };
        self.state_set(action, Status::Complete, &reason)
    }
}
