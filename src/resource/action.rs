// src/resource/action.rs

//! Wraps a resource type's `handle_<action>` / `check_<action>_complete`
//! hook pair into a [`Task`].

use tracing::{debug, info, warn};

use crate::errors::{EngineError, Result};
use crate::resource::plugin::{Cookie, HookContext, HookError, HookResult, ResourcePlugin};
use crate::resource::{ResourceHandle, ResourceState, lock};
use crate::scheduler::{Interrupt, Progress, Task};
use crate::types::{Action, Status};

enum Stage {
    NotStarted,
    Checking(Cookie),
    Done,
}

/// Drives one lifecycle action (create, delete, suspend or resume) of one
/// resource.
///
/// The first step moves the resource to `(action, IN_PROGRESS)` and calls
/// `handle_<action>`; every later step polls `check_<action>_complete` until
/// it returns `true`, at which point the resource becomes
/// `(action, COMPLETE)`. Any hook error moves it to `(action, FAILED)` and
/// fails the task.
pub struct ResourceActionTask {
    name: String,
    resource: ResourceHandle,
    action: Action,
    stage: Stage,
}

impl ResourceActionTask {
    pub fn new(resource: ResourceHandle, action: Action) -> Self {
        let name = format!("{} {}", lock(&resource).name(), action);
        Self {
            name,
            resource,
            action,
            stage: Stage::NotStarted,
        }
    }

    pub fn action(&self) -> Action {
        self.action
    }

    fn begin(&mut self) -> Result<Progress> {
        let action = self.action;
        let mut resource = lock(&self.resource);
        let previous = resource.state().clone();
        resource.set_unsupported(None);
        resource.state_set(action, Status::InProgress, "")?;

        let handled = {
            let (plugin, mut ctx) = resource.hooks();
            handle(plugin, &mut ctx, action)
        };

        match handled {
            Ok(cookie) => {
                debug!(resource = %resource.name(), %action, "handle complete; polling");
                self.stage = Stage::Checking(cookie);
                Ok(Progress::Pending)
            }
            Err(HookError::Unsupported(_)) if matches!(action, Action::Suspend | Action::Resume) => {
                let reason = format!(
                    "{} not supported by {}",
                    action.as_str().to_lowercase(),
                    resource.resource_type()
                );
                info!(resource = %resource.name(), %reason, "action unsupported; keeping previous state");
                resource.set_unsupported(Some(action));
                resource.restore_state(ResourceState { reason, ..previous })?;
                self.stage = Stage::Done;
                Ok(Progress::Complete)
            }
            Err(err) => {
                self.stage = Stage::Done;
                let name = resource.name().to_string();
                Err(fail(&mut resource, &name, action, err))
            }
        }
    }

    fn poll(&mut self) -> Result<Progress> {
        let action = self.action;
        let Stage::Checking(cookie) = &mut self.stage else {
            return Ok(Progress::Complete);
        };

        let mut resource = lock(&self.resource);
        let checked = {
            let (plugin, mut ctx) = resource.hooks();
            check(plugin, &mut ctx, action, cookie)
        };

        match checked {
            Ok(false) => Ok(Progress::Pending),
            Ok(true) => {
                resource.state_set(action, Status::Complete, "")?;
                drop(resource);
                self.stage = Stage::Done;
                Ok(Progress::Complete)
            }
            Err(err) => {
                let name = resource.name().to_string();
                let err = fail(&mut resource, &name, action, err);
                drop(resource);
                self.stage = Stage::Done;
                Err(err)
            }
        }
    }
}

impl Task for ResourceActionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self) -> Result<Progress> {
        match self.stage {
            Stage::NotStarted => self.begin(),
            Stage::Checking(_) => self.poll(),
            Stage::Done => Ok(Progress::Complete),
        }
    }

    fn cancel(&mut self, cause: &Interrupt) -> Result<()> {
        let action = self.action;
        let Stage::Checking(mut cookie) = std::mem::replace(&mut self.stage, Stage::Done) else {
            return Ok(());
        };

        let mut resource = lock(&self.resource);
        info!(resource = %resource.name(), %action, %cause, "unwinding resource action");

        let unwound = {
            let (plugin, mut ctx) = resource.hooks();
            plugin.on_cancel(&mut ctx, action, &mut cookie)
        };
        if let Err(err) = &unwound {
            warn!(resource = %resource.name(), %action, error = %err, "compensating step failed");
        }

        resource.state_set(action, Status::Failed, &cause.to_string())?;
        unwound.map_err(|err| EngineError::ResourceActionFailed {
            resource: resource.name().to_string(),
            action,
            reason: err.to_string(),
        })
    }
}

/// Record a hook failure on the resource and turn it into a task error.
pub(crate) fn fail(
    resource: &mut crate::resource::Resource,
    name: &str,
    action: Action,
    err: HookError,
) -> EngineError {
    let reason = err.to_string();
    if let Err(store_err) = resource.state_set(action, Status::Failed, &reason) {
        warn!(resource = %name, error = %store_err, "failed to persist FAILED state");
    }
    EngineError::ResourceActionFailed {
        resource: name.to_string(),
        action,
        reason,
    }
}

fn handle(
    plugin: &mut dyn ResourcePlugin,
    ctx: &mut HookContext<'_>,
    action: Action,
) -> HookResult<Cookie> {
    match action {
        Action::Create => plugin.handle_create(ctx),
        Action::Delete => plugin.handle_delete(ctx),
        Action::Suspend => plugin.handle_suspend(ctx),
        Action::Resume => plugin.handle_resume(ctx),
        Action::Update | Action::Init => Err(HookError::Unsupported(action)),
    }
}

fn check(
    plugin: &mut dyn ResourcePlugin,
    ctx: &mut HookContext<'_>,
    action: Action,
    cookie: &mut Cookie,
) -> HookResult<bool> {
    match action {
        Action::Create => plugin.check_create_complete(ctx, cookie),
        Action::Delete => plugin.check_delete_complete(ctx, cookie),
        Action::Suspend => plugin.check_suspend_complete(ctx, cookie),
        Action::Resume => plugin.check_resume_complete(ctx, cookie),
        Action::Update | Action::Init => Err(HookError::Unsupported(action)),
    }
}
