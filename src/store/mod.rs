// src/store/mod.rs

//! Persistence for stacks, resources and events.
//!
//! The scheduler core only talks to storage through [`StackStore`]. The
//! resource-data side channel (`resource_data_get`/`resource_data_set`) is a
//! durable key-value store scoped to one resource; it is not transactional
//! with resource state.

pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::model::{Properties, ResourceDefinition, Template};
use crate::errors::Result;
use crate::types::{Action, Status};

pub use memory::MemoryStore;

pub type StackId = Uuid;

/// Persisted view of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackRecord {
    pub id: StackId,
    pub name: String,
    pub template: Template,
    pub action: Action,
    pub status: Status,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persisted view of one resource of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub stack_id: StackId,
    pub name: String,
    pub definition: ResourceDefinition,
    pub action: Action,
    pub status: Status,
    pub status_reason: String,
    pub resource_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One resource state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub stack_id: StackId,
    pub resource_name: String,
    pub resource_type: String,
    pub physical_resource_id: Option<String>,
    pub action: Action,
    pub status: Status,
    pub reason: String,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

pub trait StackStore: Send + Sync + fmt::Debug {
    /// Fails with `StackNotFound` for an unknown id.
    fn load(&self, id: StackId) -> Result<StackRecord>;

    /// Insert or replace a stack record.
    fn store(&self, record: StackRecord) -> Result<()>;

    /// Remove a stack together with its resources, resource data and events.
    fn delete(&self, id: StackId) -> Result<()>;

    /// Every stored stack, oldest first.
    fn list(&self) -> Result<Vec<StackRecord>>;

    fn store_resource(&self, record: ResourceRecord) -> Result<()>;

    fn delete_resource(&self, stack_id: StackId, name: &str) -> Result<()>;

    fn resources(&self, stack_id: StackId) -> Result<Vec<ResourceRecord>>;

    fn resource_data_get(&self, stack_id: StackId, resource: &str, key: &str)
    -> Result<Option<String>>;

    fn resource_data_set(
        &self,
        stack_id: StackId,
        resource: &str,
        key: &str,
        value: String,
    ) -> Result<()>;

    fn record_event(&self, event: Event) -> Result<()>;

    /// Events of one stack, in the order they were recorded.
    fn events(&self, stack_id: StackId) -> Result<Vec<Event>>;
}
