// src/stack/operations.rs

//! Per-node task factories for each stack operation.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::model::{ResourceDefinition, resolve_refs};
use crate::errors::{EngineError, Result};
use crate::resource::{
    ResourceActionTask, ResourceHandle, UpdateDecision, UpdateResourceTask, decide_update, lock,
};
use crate::scheduler::{NodeTasks, TaskRunner};
use crate::types::{Action, Status};

/// Resolve `{ Ref = .. }` properties of `definition` against the current
/// resource ids. A referenced resource without an id resolves to its name.
fn resolve_properties(
    definition: &ResourceDefinition,
    resources: &HashMap<String, ResourceHandle>,
) -> crate::config::Properties {
    resolve_refs(&definition.properties, |target| {
        let handle = resources.get(target)?;
        let resource = lock(handle);
        Some(
            resource
                .resource_id()
                .unwrap_or(resource.name())
                .to_string(),
        )
    })
}

fn with_timeout(runner: TaskRunner, definition: &ResourceDefinition) -> TaskRunner {
    match definition.timeout() {
        Some(timeout) => runner.with_timeout(timeout),
        None => runner,
    }
}

/// Whether a resource should take part in `action`.
fn wants(action: Action, handle: &ResourceHandle) -> bool {
    let resource = lock(handle);
    match action {
        Action::Create => resource.state().is(Action::Init, Status::Complete),
        Action::Delete => resource.exists(),
        Action::Suspend => resource.exists() && resource.action() != Action::Init,
        Action::Resume => resource.state().is(Action::Suspend, Status::Complete),
        Action::Update | Action::Init => false,
    }
}

/// Runs one plain lifecycle action (create, delete, suspend, resume) on
/// every node it is handed.
pub(crate) struct ActionPlan {
    action: Action,
    resources: HashMap<String, ResourceHandle>,
}

impl ActionPlan {
    pub(crate) fn new(action: Action, resources: HashMap<String, ResourceHandle>) -> Self {
        Self { action, resources }
    }
}

impl NodeTasks for ActionPlan {
    fn make_task(&mut self, node: &str) -> Result<Option<TaskRunner>> {
        let handle = self
            .resources
            .get(node)
            .ok_or_else(|| EngineError::ResourceNotFound(node.to_string()))?;

        if !wants(self.action, handle) {
            debug!(resource = %node, action = %self.action, "nothing to do");
            return Ok(None);
        }

        let definition = lock(handle).definition().clone();
        if self.action == Action::Create {
            // Dependencies are complete by now, so their ids are known.
            let properties = resolve_properties(&definition, &self.resources);
            lock(handle).set_properties(properties);
        }

        let runner = TaskRunner::new(ResourceActionTask::new(handle.clone(), self.action));
        Ok(Some(with_timeout(runner, &definition)))
    }

    fn blocked(&mut self, node: &str, cause: &str) {
        let affected = self
            .resources
            .get(node)
            .is_some_and(|handle| wants(self.action, handle));
        if affected {
            mark_blocked(&self.resources, node, self.action, cause);
        }
    }
}

/// Phase one of a stack update: create added resources, update or replace
/// changed ones, leave unchanged ones alone.
pub(crate) struct UpdatePlan {
    resources: HashMap<String, ResourceHandle>,
    definitions: HashMap<String, ResourceDefinition>,
}

impl UpdatePlan {
    pub(crate) fn new(
        resources: HashMap<String, ResourceHandle>,
        definitions: impl IntoIterator<Item = ResourceDefinition>,
    ) -> Self {
        Self {
            resources,
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }
}

impl NodeTasks for UpdatePlan {
    fn make_task(&mut self, node: &str) -> Result<Option<TaskRunner>> {
        let handle = self
            .resources
            .get(node)
            .ok_or_else(|| EngineError::ResourceNotFound(node.to_string()))?;
        let definition = self
            .definitions
            .get(node)
            .ok_or_else(|| EngineError::ResourceNotFound(node.to_string()))?
            .clone();
        let properties = resolve_properties(&definition, &self.resources);

        let (never_created, decision) = {
            let resource = lock(handle);
            let never_created = !resource.exists()
                || resource.state().is(Action::Create, Status::Failed);
            (never_created, decide_update(&resource, &definition, &properties))
        };

        if never_created {
            // Added by this update, or never made it: (re)create from scratch.
            debug!(resource = %node, "creating during update");
            let mut resource = lock(handle);
            resource.set_definition(definition.clone(), properties);
            drop(resource);
            let runner = TaskRunner::new(ResourceActionTask::new(handle.clone(), Action::Create));
            return Ok(Some(with_timeout(runner, &definition)));
        }

        if decision == UpdateDecision::Unchanged {
            lock(handle).set_definition(definition, properties);
            return Ok(None);
        }

        debug!(resource = %node, ?decision, "updating");
        let runner = TaskRunner::new(UpdateResourceTask::new(
            handle.clone(),
            decision,
            definition.clone(),
            properties,
        ));
        Ok(Some(with_timeout(runner, &definition)))
    }

    fn blocked(&mut self, node: &str, cause: &str) {
        mark_blocked(&self.resources, node, Action::Update, cause);
    }
}

fn mark_blocked(
    resources: &HashMap<String, ResourceHandle>,
    node: &str,
    action: Action,
    cause: &str,
) {
    let Some(handle) = resources.get(node) else {
        return;
    };
    let reason = format!("dependency {cause} failed");
    if let Err(err) = lock(handle).state_set(action, Status::Failed, &reason) {
        warn!(resource = %node, error = %err, "failed to persist blocked state");
    }
}
