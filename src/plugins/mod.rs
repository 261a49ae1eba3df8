// src/plugins/mod.rs

//! Built-in resource types.

pub mod generic;
pub mod instance_group;

pub use generic::GenericResource;
pub use instance_group::InstanceGroup;

use crate::resource::TypeRegistry;

/// Register every built-in type with `registry`.
pub fn register_builtins(registry: &mut TypeRegistry) {
    registry.register(generic::TYPE_NAME, || Box::new(GenericResource::new()));
    registry.register(instance_group::TYPE_NAME, || Box::new(InstanceGroup::new()));
}
