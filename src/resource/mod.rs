// src/resource/mod.rs

//! Per-resource lifecycle state.
//!
//! A [`Resource`] is one managed unit of a stack: its definition, its
//! current `(action, status)` pair and the provider id assigned once it
//! exists. State only moves through [`Resource::state_set`], which persists
//! the resource and records an event for every transition.

pub mod action;
pub mod plugin;
pub mod registry;
pub mod update;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::model::{Properties, ResourceDefinition};
use crate::engine::cache::ProviderCache;
use crate::errors::Result;
use crate::store::{Event, ResourceRecord, StackId, StackStore};
use crate::types::{Action, Status};

pub use action::ResourceActionTask;
pub use plugin::{
    Cookie, HookContext, HookError, HookResult, PropertyDiff, ResourcePlugin, UpdateOutcome,
    UpdatePolicy,
};
pub use registry::TypeRegistry;
pub use update::{UpdateDecision, UpdateResourceTask, decide_update};

/// Shared handle to a resource. Only the task executing the resource's
/// current action locks it.
pub type ResourceHandle = Arc<Mutex<Resource>>;

/// Lock a resource, recovering the guard if a previous holder panicked.
pub fn lock(handle: &ResourceHandle) -> MutexGuard<'_, Resource> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a resource needs from the stack that owns it.
#[derive(Debug, Clone)]
pub struct StackContext {
    pub stack_id: StackId,
    pub stack_name: String,
    pub store: Arc<dyn StackStore>,
    pub cache: Arc<ProviderCache>,
    pub registry: Arc<TypeRegistry>,
}

/// `(action, status, reason)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub action: Action,
    pub status: Status,
    pub reason: String,
}

impl ResourceState {
    pub fn new(action: Action, status: Status, reason: impl Into<String>) -> Self {
        Self {
            action,
            status,
            reason: reason.into(),
        }
    }

    /// The implicit state before the first action.
    pub fn init() -> Self {
        Self::new(Action::Init, Status::Complete, "")
    }

    pub fn is(&self, action: Action, status: Status) -> bool {
        self.action == action && self.status == status
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.action, self.status)
    }
}

pub struct Resource {
    name: String,
    definition: ResourceDefinition,
    properties: Properties,
    state: ResourceState,
    resource_id: Option<String>,
    unsupported: Option<Action>,
    plugin: Box<dyn ResourcePlugin>,
    context: Arc<StackContext>,
    persist: bool,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("type", &self.definition.resource_type)
            .field("state", &self.state)
            .field("resource_id", &self.resource_id)
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub fn new(
        definition: ResourceDefinition,
        plugin: Box<dyn ResourcePlugin>,
        context: Arc<StackContext>,
    ) -> Self {
        Self {
            name: definition.name.clone(),
            properties: definition.properties.clone(),
            definition,
            state: ResourceState::init(),
            resource_id: None,
            unsupported: None,
            plugin,
            context,
            persist: true,
        }
    }

    /// A resource owned by another resource rather than by the stack. Its
    /// transitions are neither persisted nor recorded as events.
    pub fn nested(
        definition: ResourceDefinition,
        plugin: Box<dyn ResourcePlugin>,
        context: Arc<StackContext>,
    ) -> Self {
        Self {
            persist: false,
            ..Self::new(definition, plugin, context)
        }
    }

    pub fn into_handle(self) -> ResourceHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        &self.definition.resource_type
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Resolved properties (references replaced by ids).
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
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

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn set_resource_id(&mut self, id: Option<String>) {
        self.resource_id = id;
    }

    /// `<stack>-<resource>`, the name used on the provider side.
    pub fn physical_resource_name(&self) -> String {
        format!("{}-{}", self.context.stack_name, self.name)
    }

    pub fn context(&self) -> &Arc<StackContext> {
        &self.context
    }

    pub fn plugin(&self) -> &dyn ResourcePlugin {
        self.plugin.as_ref()
    }

    /// The action the resource type reported as unsupported during the most
    /// recent action, if any.
    pub fn unsupported_action(&self) -> Option<Action> {
        self.unsupported
    }

    pub(crate) fn set_unsupported(&mut self, action: Option<Action>) {
        self.unsupported = action;
    }

    /// Whether the resource may exist on the provider side.
    pub fn exists(&self) -> bool {
        !(self.state.is(Action::Init, Status::Complete)
            || self.state.is(Action::Delete, Status::Complete))
    }

    /// Move to `(action, status)`, persist the resource and record an event.
    /// An empty reason becomes "state changed".
    pub fn state_set(&mut self, action: Action, status: Status, reason: &str) -> Result<()> {
        let reason = if reason.is_empty() { "state changed" } else { reason };
        let previous = std::mem::replace(&mut self.state, ResourceState::new(action, status, reason));

        match status {
            Status::Failed => warn!(
                stack = %self.context.stack_name,
                resource = %self.name,
                from = %previous,
                to = %self.state,
                reason,
                "resource state changed"
            ),
            _ => info!(
                stack = %self.context.stack_name,
                resource = %self.name,
                from = %previous,
                to = %self.state,
                "resource state changed"
            ),
        }

        if !self.persist {
            return Ok(());
        }
        self.store()?;
        self.context.store.record_event(Event {
            id: Uuid::new_v4(),
            stack_id: self.context.stack_id,
            resource_name: self.name.clone(),
            resource_type: self.definition.resource_type.clone(),
            physical_resource_id: self.resource_id.clone(),
            action,
            status,
            reason: reason.to_string(),
            properties: self.properties.clone(),
            timestamp: Utc::now(),
        })
    }

    /// Put back a previously observed state, e.g. after an unsupported
    /// action, without recording it as a transition of its own.
    pub(crate) fn restore_state(&mut self, state: ResourceState) -> Result<()> {
        self.state = state;
        if self.persist { self.store() } else { Ok(()) }
    }

    /// Set state and id from a stored record.
    pub(crate) fn load_state(&mut self, state: ResourceState, resource_id: Option<String>) {
        self.state = state;
        self.resource_id = resource_id;
    }

    /// Swap in a new definition and plugin (replacement), keeping the slot.
    pub(crate) fn replace_with(
        &mut self,
        definition: ResourceDefinition,
        properties: Properties,
        plugin: Box<dyn ResourcePlugin>,
    ) {
        self.definition = definition;
        self.properties = properties;
        self.plugin = plugin;
        self.resource_id = None;
        self.state = ResourceState::init();
    }

    /// Take a new definition whose changes need no provider call.
    pub(crate) fn set_definition(&mut self, definition: ResourceDefinition, properties: Properties) {
        self.definition = definition;
        self.properties = properties;
    }

    pub(crate) fn store(&self) -> Result<()> {
        self.context.store.store_resource(ResourceRecord {
            stack_id: self.context.stack_id,
            name: self.name.clone(),
            definition: self.definition.clone(),
            action: self.state.action,
            status: self.state.status,
            status_reason: self.state.reason.clone(),
            resource_id: self.resource_id.clone(),
            updated_at: Utc::now(),
        })
    }

    /// Split the resource into its plugin and the context its hooks see.
    pub(crate) fn hooks(&mut self) -> (&mut dyn ResourcePlugin, HookContext<'_>) {
        let ctx = HookContext {
            name: &self.name,
            resource_type: &self.definition.resource_type,
            properties: &self.properties,
            resource_id: &mut self.resource_id,
            stack: &self.context,
        };
        (self.plugin.as_mut(), ctx)
    }
}
