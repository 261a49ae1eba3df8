// src/engine/mod.rs

//! Multi-stack service facade.
//!
//! The engine owns every live [`Stack`], the shared type registry, the store
//! and the provider cache. It guarantees that only one lifecycle action runs
//! per stack at a time: each stack sits behind its own async mutex, and a
//! second request either queues behind it or is rejected, depending on
//! [`ConcurrentActionBehaviour`]. Different stacks share no mutable state.
//!
//! Lifecycle methods return an error for requests that cannot start
//! (validation, unknown stack, busy stack). Failures of an operation that did
//! start are reflected in the stack's status, visible via
//! [`Engine::describe_stack`].

pub mod cache;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::model::Template;
use crate::config::validate::validate_stack_name;
use crate::errors::{EngineError, Result};
use crate::resource::TypeRegistry;
use crate::stack::Stack;
use crate::store::{Event, ResourceRecord, StackId, StackRecord, StackStore};
use crate::types::{Action, ConcurrentActionBehaviour, Status};

pub use cache::ProviderCache;

/// Overview of one stack, as returned by `describe_stack` / `list_stacks`.
#[derive(Debug, Clone, Serialize)]
pub struct StackSummary {
    pub id: StackId,
    pub name: String,
    pub action: Action,
    pub status: Status,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resource_count: usize,
}

impl StackSummary {
    fn from_record(record: StackRecord, resource_count: usize) -> Self {
        Self {
            id: record.id,
            name: record.name,
            action: record.action,
            status: record.status,
            status_reason: record.status_reason,
            created_at: record.created_at,
            updated_at: record.updated_at,
            resource_count,
        }
    }

    /// `<ACTION>_<STATUS>`, e.g. `CREATE_COMPLETE`.
    pub fn state(&self) -> String {
        format!("{}_{}", self.action, self.status)
    }
}

/// Overview of one resource of a stack.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSummary {
    pub stack_id: StackId,
    pub name: String,
    pub resource_type: String,
    pub action: Action,
    pub status: Status,
    pub status_reason: String,
    pub resource_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<ResourceRecord> for ResourceSummary {
    fn from(record: ResourceRecord) -> Self {
        Self {
            stack_id: record.stack_id,
            name: record.name,
            resource_type: record.definition.resource_type,
            action: record.action,
            status: record.status,
            status_reason: record.status_reason,
            resource_id: record.resource_id,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
struct StackSlot {
    name: String,
    stack: Arc<AsyncMutex<Stack>>,
}

#[derive(Debug)]
pub struct Engine {
    registry: Arc<TypeRegistry>,
    store: Arc<dyn StackStore>,
    cache: Arc<ProviderCache>,
    behaviour: ConcurrentActionBehaviour,
    stacks: Mutex<HashMap<StackId, StackSlot>>,
}

impl Engine {
    pub fn new(
        registry: Arc<TypeRegistry>,
        store: Arc<dyn StackStore>,
        cache: Arc<ProviderCache>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            behaviour: ConcurrentActionBehaviour::default(),
            stacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_behaviour(mut self, behaviour: ConcurrentActionBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn behaviour(&self) -> ConcurrentActionBehaviour {
        self.behaviour
    }

    pub fn store(&self) -> &Arc<dyn StackStore> {
        &self.store
    }

    fn stacks(&self) -> MutexGuard<'_, HashMap<StackId, StackSlot>> {
        self.stacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The live stack for `id`, loading it from the store on first use.
    fn slot(&self, id: StackId) -> Result<StackSlot> {
        let mut stacks = self.stacks();
        if let Some(slot) = stacks.get(&id) {
            return Ok(slot.clone());
        }

        let stack = Stack::load(
            id,
            self.store.clone(),
            self.registry.clone(),
            self.cache.clone(),
        )?;
        let slot = StackSlot {
            name: stack.name().to_string(),
            stack: Arc::new(AsyncMutex::new(stack)),
        };
        stacks.insert(id, slot.clone());
        Ok(slot)
    }

    /// Exclusive access to a stack for one lifecycle action.
    async fn acquire(&self, id: StackId) -> Result<OwnedMutexGuard<Stack>> {
        let slot = self.slot(id)?;
        match self.behaviour {
            ConcurrentActionBehaviour::Queue => {
                debug!(stack = %slot.name, "waiting for stack lock");
                Ok(slot.stack.lock_owned().await)
            }
            ConcurrentActionBehaviour::Reject => slot
                .stack
                .try_lock_owned()
                .map_err(|_| EngineError::ActionInProgress(slot.name.clone())),
        }
    }

    /// Surface only errors that kept an operation from starting.
    fn settle(stack: &str, action: Action, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err @ (EngineError::Validation(_) | EngineError::ActionInProgress(_))) => Err(err),
            Err(err) => {
                warn!(stack, %action, error = %err, "stack operation failed");
                Ok(())
            }
        }
    }

    /// Create a stack named `name` from `template`.
    ///
    /// Template and property validation errors, as well as a duplicate name,
    /// are returned before anything runs.
    pub async fn create_stack(&self, name: &str, template: Template) -> Result<StackId> {
        validate_stack_name(name)?;
        let stack = Stack::new(
            name,
            template,
            self.store.clone(),
            self.registry.clone(),
            self.cache.clone(),
        )?;
        let id = stack.id();
        let slot = StackSlot {
            name: name.to_string(),
            stack: Arc::new(AsyncMutex::new(stack)),
        };

        {
            let mut stacks = self.stacks();
            let stored = self.store.list()?;
            if stacks.values().any(|s| s.name == name) || stored.iter().any(|r| r.name == name) {
                return Err(EngineError::StackExists(name.to_string()));
            }
            stacks.insert(id, slot.clone());
        }

        info!(stack = %name, %id, "creating stack");
        let mut stack = slot.stack.lock().await;
        let result = stack.create().await;
        Self::settle(name, Action::Create, result)?;
        Ok(id)
    }

    pub async fn update_stack(&self, id: StackId, template: Template) -> Result<()> {
        let mut stack = self.acquire(id).await?;
        info!(stack = %stack.name(), "updating stack");
        let result = stack.update(template).await;
        Self::settle(stack.name(), Action::Update, result)
    }

    /// Delete a stack. Once every resource is gone the stack is forgotten,
    /// so its name can be reused.
    pub async fn delete_stack(&self, id: StackId) -> Result<()> {
        let mut stack = self.acquire(id).await?;
        info!(stack = %stack.name(), "deleting stack");
        let result = stack.delete().await;

        if stack.state().is(Action::Delete, Status::Complete) {
            self.stacks().remove(&id);
            self.store.delete(id)?;
            info!(stack = %stack.name(), "stack deleted");
        }
        Self::settle(stack.name(), Action::Delete, result)
    }

    pub async fn suspend_stack(&self, id: StackId) -> Result<()> {
        let mut stack = self.acquire(id).await?;
        info!(stack = %stack.name(), "suspending stack");
        let result = stack.suspend().await;
        Self::settle(stack.name(), Action::Suspend, result)
    }

    pub async fn resume_stack(&self, id: StackId) -> Result<()> {
        let mut stack = self.acquire(id).await?;
        info!(stack = %stack.name(), "resuming stack");
        let result = stack.resume().await;
        Self::settle(stack.name(), Action::Resume, result)
    }

    /// Current summary of a stack, read from the store without waiting for
    /// a running action.
    pub fn describe_stack(&self, id: StackId) -> Result<StackSummary> {
        let record = self.store.load(id)?;
        let count = self.store.resources(id)?.len();
        Ok(StackSummary::from_record(record, count))
    }

    pub fn list_stacks(&self) -> Result<Vec<StackSummary>> {
        self.store
            .list()?
            .into_iter()
            .map(|record| {
                let count = self.store.resources(record.id)?.len();
                Ok(StackSummary::from_record(record, count))
            })
            .collect()
    }

    /// Look a stack id up by name.
    pub fn identify_stack(&self, name: &str) -> Result<StackId> {
        if let Some(record) = self.store.list()?.into_iter().find(|r| r.name == name) {
            return Ok(record.id);
        }
        self.stacks()
            .iter()
            .find(|(_, slot)| slot.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| EngineError::StackNotFound(name.to_string()))
    }

    pub fn stack_events(&self, id: StackId) -> Result<Vec<Event>> {
        self.store.load(id)?;
        self.store.events(id)
    }

    pub fn describe_resource(&self, id: StackId, name: &str) -> Result<ResourceSummary> {
        self.store
            .resources(id)?
            .into_iter()
            .find(|r| r.name == name)
            .map(ResourceSummary::from)
            .ok_or_else(|| EngineError::ResourceNotFound(name.to_string()))
    }

    pub fn list_resources(&self, id: StackId) -> Result<Vec<ResourceSummary>> {
        self.store.load(id)?;
        Ok(self
            .store
            .resources(id)?
            .into_iter()
            .map(ResourceSummary::from)
            .collect())
    }

    pub fn list_resource_types(&self) -> Vec<String> {
        self.registry.type_names()
    }
}
