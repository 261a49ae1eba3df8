// src/resource/plugin.rs

//! The capability set a resource type implements.
//!
//! Every lifecycle action is a pair of hooks: `handle_<action>` issues the
//! provider call and returns a [`Cookie`], then `check_<action>_complete` is
//! polled with that cookie until it reports `true`.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::config::model::Properties;
use crate::engine::cache::ProviderCache;
use crate::errors::{EngineError, Result};
use crate::resource::StackContext;
use crate::resource::registry::TypeRegistry;
use crate::types::Action;

/// Opaque continuation token handed from `handle_*` to `check_*_complete`.
#[derive(Default)]
pub struct Cookie(Option<Box<dyn Any + Send>>);

impl Cookie {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut::<T>()
    }

    pub fn take<T: Any>(&mut self) -> Option<T> {
        let boxed = self.0.take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Cookie(..)"),
            None => f.write_str("Cookie(None)"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    /// The resource type does not implement this action at all.
    #[error("{0} not supported")]
    Unsupported(Action),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// Failure of nested engine work driven by the hook (e.g. member tasks).
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type HookResult<T> = std::result::Result<T, HookError>;

/// Result of `handle_update`.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Update is proceeding in place; poll `check_update_complete`.
    InPlace(Cookie),
    /// The change cannot be applied in place: delete and recreate.
    Replace,
}

/// What to do when one update changes both in-place-updatable and
/// replace-only properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    #[default]
    Replace,
    Reject,
}

/// Property changes between the current and the requested definition.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDiff {
    pub before: Properties,
    pub after: Properties,
    /// Keys added, removed or changed, sorted.
    pub changed: Vec<String>,
}

impl PropertyDiff {
    pub fn new(before: &Properties, after: &Properties) -> Self {
        let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        let changed = keys
            .into_iter()
            .filter(|key| before.get(key.as_str()) != after.get(key.as_str()))
            .cloned()
            .collect();
        Self {
            before: before.clone(),
            after: after.clone(),
            changed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn changed(&self, key: &str) -> bool {
        self.changed.iter().any(|k| k == key)
    }
}

/// What a hook may see and touch of its resource.
pub struct HookContext<'a> {
    pub(crate) name: &'a str,
    pub(crate) resource_type: &'a str,
    pub(crate) properties: &'a Properties,
    pub(crate) resource_id: &'a mut Option<String>,
    pub(crate) stack: &'a Arc<StackContext>,
}

impl HookContext<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn resource_type(&self) -> &str {
        self.resource_type
    }

    pub fn physical_name(&self) -> String {
        format!("{}-{}", self.stack.stack_name, self.name)
    }

    /// Resolved properties (references already replaced).
    pub fn properties(&self) -> &Properties {
        self.properties
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key)?.as_str()
    }

    pub fn property_int(&self, key: &str) -> Option<i64> {
        self.properties.get(key)?.as_integer()
    }

    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key)?.as_bool()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn set_resource_id(&mut self, id: Option<String>) {
        *self.resource_id = id;
    }

    pub fn data_get(&self, key: &str) -> Result<Option<String>> {
        self.stack
            .store
            .resource_data_get(self.stack.stack_id, self.name, key)
    }

    pub fn data_set(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.stack
            .store
            .resource_data_set(self.stack.stack_id, self.name, key, value.into())
    }

    pub fn cache(&self) -> &ProviderCache {
        &self.stack.cache
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.stack.registry
    }

    pub fn stack(&self) -> &Arc<StackContext> {
        self.stack
    }
}

/// Hooks implemented by a resource type.
///
/// Defaults: create, update and delete complete as soon as `handle_*`
/// returns; update replaces; suspend and resume are unsupported.
pub trait ResourcePlugin: Send {
    fn type_name(&self) -> &str;

    /// Static property check; `Some(reason)` rejects the template.
    fn validate(&self, _properties: &Properties) -> Option<String> {
        None
    }

    fn handle_create(&mut self, _ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        Ok(Cookie::none())
    }

    fn check_create_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(true)
    }

    fn handle_update(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _diff: &PropertyDiff,
    ) -> HookResult<UpdateOutcome> {
        Ok(UpdateOutcome::Replace)
    }

    fn check_update_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(true)
    }

    fn handle_delete(&mut self, _ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        Ok(Cookie::none())
    }

    fn check_delete_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(true)
    }

    fn handle_suspend(&mut self, _ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        Err(HookError::Unsupported(Action::Suspend))
    }

    fn check_suspend_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(true)
    }

    fn handle_resume(&mut self, _ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        Err(HookError::Unsupported(Action::Resume))
    }

    fn check_resume_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(true)
    }

    /// Property keys whose change can be applied by `handle_update`.
    fn update_allowed_properties(&self) -> Vec<String> {
        Vec::new()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Replace
    }

    /// Compensating step for an action that is cancelled or times out while
    /// it is being polled.
    fn on_cancel(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _action: Action,
        _cookie: &mut Cookie,
    ) -> HookResult<()> {
        Ok(())
    }
}
