// src/resource/update.rs

//! Update-in-place versus replace.

use tracing::{debug, info};

use crate::config::model::{Properties, ResourceDefinition};
use crate::errors::{EngineError, Result};
use crate::resource::action::{ResourceActionTask, fail};
use crate::resource::plugin::{Cookie, HookError, PropertyDiff, UpdateOutcome, UpdatePolicy};
use crate::resource::{Resource, ResourceHandle, lock};
use crate::scheduler::{FnTask, Interrupt, Progress, Sequence, Task, TaskRunner};
use crate::types::{Action, Status};

/// How a requested definition is applied to an existing resource.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDecision {
    /// No property or type change; nothing to do on the provider side.
    Unchanged,
    /// Every changed key is in-place-updatable.
    InPlace(PropertyDiff),
    /// Delete and recreate.
    Replace(String),
    /// The change mixes in-place and replace-only keys and the type's policy
    /// forbids replacing.
    Reject(String),
}

/// Classify the change from `resource`'s current state to `new_definition`
/// (whose references are already resolved into `new_properties`).
pub fn decide_update(
    resource: &Resource,
    new_definition: &ResourceDefinition,
    new_properties: &Properties,
) -> UpdateDecision {
    if resource.resource_type() != new_definition.resource_type {
        return UpdateDecision::Replace(format!(
            "type changed from {} to {}",
            resource.resource_type(),
            new_definition.resource_type
        ));
    }

    let diff = PropertyDiff::new(resource.properties(), new_properties);
    if diff.is_empty() {
        return UpdateDecision::Unchanged;
    }

    let allowed = resource.plugin().update_allowed_properties();
    let (in_place, replace_only): (Vec<&String>, Vec<&String>) =
        diff.changed.iter().partition(|key| allowed.contains(key));

    if replace_only.is_empty() {
        return UpdateDecision::InPlace(diff);
    }

    let keys = join(&replace_only);
    if in_place.is_empty() {
        return UpdateDecision::Replace(format!("replace-only properties changed: {keys}"));
    }

    match resource.plugin().update_policy() {
        UpdatePolicy::Replace => UpdateDecision::Replace(format!(
            "replace-only properties changed alongside in-place ones: {keys}"
        )),
        UpdatePolicy::Reject => UpdateDecision::Reject(format!(
            "update of {keys} requires replacement, which {} does not allow together with in-place changes ({})",
            resource.resource_type(),
            join(&in_place)
        )),
    }
}

fn join(keys: &[&String]) -> String {
    keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}

enum Stage {
    NotStarted,
    InPlace(Cookie),
    Replacing(TaskRunner),
    Done,
}

/// Applies one [`UpdateDecision`] to a resource.
///
/// In-place updates poll `check_update_complete` like any other action.
/// A replacement runs delete(old) then create(new) inside the same
/// resource slot, so the resource keeps its position in the graph.
pub struct UpdateResourceTask {
    name: String,
    resource: ResourceHandle,
    decision: Option<UpdateDecision>,
    definition: ResourceDefinition,
    properties: Properties,
    stage: Stage,
}

impl UpdateResourceTask {
    pub fn new(
        resource: ResourceHandle,
        decision: UpdateDecision,
        definition: ResourceDefinition,
        properties: Properties,
    ) -> Self {
        Self {
            name: format!("{} UPDATE", definition.name),
            resource,
            decision: Some(decision),
            definition,
            properties,
            stage: Stage::NotStarted,
        }
    }

    fn begin(&mut self) -> Result<Progress> {
        let decision = self.decision.take().unwrap_or(UpdateDecision::Unchanged);
        let mut resource = lock(&self.resource);

        match decision {
            UpdateDecision::Unchanged => {
                resource.set_definition(self.definition.clone(), self.properties.clone());
                self.stage = Stage::Done;
                Ok(Progress::Complete)
            }
            UpdateDecision::Reject(reason) => {
                resource.state_set(Action::Update, Status::Failed, &reason)?;
                self.stage = Stage::Done;
                Err(EngineError::ResourceActionFailed {
                    resource: resource.name().to_string(),
                    action: Action::Update,
                    reason,
                })
            }
            UpdateDecision::Replace(reason) => {
                resource.state_set(Action::Update, Status::InProgress, "")?;
                info!(resource = %resource.name(), %reason, "replacing resource");
                drop(resource);
                self.start_replacement()
            }
            UpdateDecision::InPlace(diff) => {
                resource.state_set(Action::Update, Status::InProgress, "")?;
                let handled = {
                    let (plugin, mut ctx) = resource.hooks();
                    plugin.handle_update(&mut ctx, &diff)
                };
                match handled {
                    Ok(UpdateOutcome::InPlace(cookie)) => {
                        debug!(resource = %resource.name(), changed = ?diff.changed, "updating in place");
                        self.stage = Stage::InPlace(cookie);
                        Ok(Progress::Pending)
                    }
                    Ok(UpdateOutcome::Replace) => {
                        info!(resource = %resource.name(), "resource type asked for replacement");
                        drop(resource);
                        self.start_replacement()
                    }
                    Err(err) => {
                        self.stage = Stage::Done;
                        let name = resource.name().to_string();
                        Err(fail(&mut resource, &name, Action::Update, err))
                    }
                }
            }
        }
    }

    fn start_replacement(&mut self) -> Result<Progress> {
        let registry = lock(&self.resource).context().registry.clone();
        let plugin = registry.instantiate(&self.definition.resource_type)?;

        let handle = self.resource.clone();
        let mut swap = Some((self.definition.clone(), self.properties.clone(), plugin));
        let swap_task = FnTask::new(format!("{} swap", self.definition.name), move || {
            if let Some((definition, properties, plugin)) = swap.take() {
                lock(&handle).replace_with(definition, properties, plugin);
            }
            Ok(Progress::Complete)
        });

        let runner = TaskRunner::new(Sequence::new(
            format!("{} replace", self.definition.name),
            [
                TaskRunner::new(ResourceActionTask::new(self.resource.clone(), Action::Delete)),
                TaskRunner::new(swap_task),
                TaskRunner::new(ResourceActionTask::new(self.resource.clone(), Action::Create)),
            ],
        ));
        // The runner is started by its first step below.
        self.stage = Stage::Replacing(runner);
        self.advance_replacement()
    }

    fn advance_replacement(&mut self) -> Result<Progress> {
        let Stage::Replacing(runner) = &mut self.stage else {
            return Ok(Progress::Complete);
        };
        if !runner.done() && !runner.step()? {
            return Ok(Progress::Pending);
        }
        self.stage = Stage::Done;
        lock(&self.resource).state_set(Action::Update, Status::Complete, "replaced")?;
        Ok(Progress::Complete)
    }

    fn poll_in_place(&mut self) -> Result<Progress> {
        let Stage::InPlace(cookie) = &mut self.stage else {
            return Ok(Progress::Complete);
        };

        let mut resource = lock(&self.resource);
        let checked = {
            let (plugin, mut ctx) = resource.hooks();
            plugin.check_update_complete(&mut ctx, cookie)
        };

        match checked {
            Ok(false) => Ok(Progress::Pending),
            Ok(true) => {
                resource.set_definition(self.definition.clone(), self.properties.clone());
                resource.state_set(Action::Update, Status::Complete, "")?;
                drop(resource);
                self.stage = Stage::Done;
                Ok(Progress::Complete)
            }
            Err(err) => {
                let name = resource.name().to_string();
                let err = fail(&mut resource, &name, Action::Update, err);
                drop(resource);
                self.stage = Stage::Done;
                Err(err)
            }
        }
    }
}

impl Task for UpdateResourceTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        match self.stage {
            Stage::NotStarted => self.begin(),
            Stage::InPlace(_) => self.poll_in_place(),
            Stage::Replacing(_) => self.advance_replacement(),
            Stage::Done => Ok(Progress::Complete),
        }
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Replacing(mut runner) => runner.cancel(),
            Stage::InPlace(mut cookie) => {
                let mut resource = lock(&self.resource);
                let unwound = {
                    let (plugin, mut ctx) = resource.hooks();
                    plugin.on_cancel(&mut ctx, Action::Update, &mut cookie)
                };
                resource.state_set(Action::Update, Status::Failed, &cause.to_string())?;
                unwound.map_err(|err: HookError| EngineError::ResourceActionFailed {
                    resource: resource.name().to_string(),
                    action: Action::Update,
                    reason: err.to_string(),
                })
            }
            Stage::NotStarted | Stage::Done => Ok(()),
        }
    }
}
