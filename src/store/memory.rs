// src/store/memory.rs

//! In-memory store used by the CLI and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::store::{Event, ResourceRecord, StackId, StackRecord, StackStore};

type ResourceKey = (StackId, String);
type DataKey = (StackId, String, String);

/// Store that keeps everything in process memory.
///
/// Clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    stacks: Arc<Mutex<HashMap<StackId, StackRecord>>>,
    resources: Arc<Mutex<BTreeMap<ResourceKey, ResourceRecord>>>,
    resource_data: Arc<Mutex<HashMap<DataKey, String>>>,
    events: Arc<Mutex<Vec<Event>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded across every stack.
    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }
}

impl StackStore for MemoryStore {
    fn load(&self, id: StackId) -> Result<StackRecord> {
        lock(&self.stacks)
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::StackNotFound(id.to_string()))
    }

    fn store(&self, record: StackRecord) -> Result<()> {
        debug!(stack = %record.name, action = %record.action, status = %record.status, "storing stack");
        lock(&self.stacks).insert(record.id, record);
        Ok(())
    }

    fn delete(&self, id: StackId) -> Result<()> {
        if lock(&self.stacks).remove(&id).is_none() {
            return Err(EngineError::StackNotFound(id.to_string()));
        }
        lock(&self.resources).retain(|(stack_id, _), _| *stack_id != id);
        lock(&self.resource_data).retain(|(stack_id, _, _), _| *stack_id != id);
        lock(&self.events).retain(|event| event.stack_id != id);
        debug!(stack_id = %id, "deleted stack from store");
        Ok(())
    }

    fn list(&self) -> Result<Vec<StackRecord>> {
        let mut records: Vec<StackRecord> = lock(&self.stacks).values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    fn store_resource(&self, record: ResourceRecord) -> Result<()> {
        lock(&self.resources).insert((record.stack_id, record.name.clone()), record);
        Ok(())
    }

    fn delete_resource(&self, stack_id: StackId, name: &str) -> Result<()> {
        lock(&self.resources).remove(&(stack_id, name.to_string()));
        lock(&self.resource_data).retain(|(sid, res, _), _| !(*sid == stack_id && res == name));
        Ok(())
    }

    fn resources(&self, stack_id: StackId) -> Result<Vec<ResourceRecord>> {
        Ok(lock(&self.resources)
            .iter()
            .filter(|((sid, _), _)| *sid == stack_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn resource_data_get(
        &self,
        stack_id: StackId,
        resource: &str,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(lock(&self.resource_data)
            .get(&(stack_id, resource.to_string(), key.to_string()))
            .cloned())
    }

    fn resource_data_set(
        &self,
        stack_id: StackId,
        resource: &str,
        key: &str,
        value: String,
    ) -> Result<()> {
        lock(&self.resource_data).insert((stack_id, resource.to_string(), key.to_string()), value);
        Ok(())
    }

    fn record_event(&self, event: Event) -> Result<()> {
        lock(&self.events).push(event);
        Ok(())
    }

    fn events(&self, stack_id: StackId) -> Result<Vec<Event>> {
        Ok(lock(&self.events)
            .iter()
            .filter(|e| e.stack_id == stack_id)
            .cloned()
            .collect())
    }
}
