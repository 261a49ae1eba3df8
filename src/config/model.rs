// src/config/model.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Free-form property bag of a resource, as written in the template.
pub type Properties = toml::Table;

/// Key that marks a property value as a reference to another resource.
pub const REF_KEY: &str = "Ref";

/// Template as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// poll_interval_ms = 1000
/// timeout_secs = 3600
///
/// [[resource]]
/// name = "db"
/// type = "Stackdag::Generic"
///
/// [[resource]]
/// name = "app"
/// type = "Stackdag::Generic"
/// depends_on = ["db"]
/// [resource.properties]
/// endpoint = { Ref = "db" }
/// ```
///
/// Resources are an array of tables so declaration order survives parsing;
/// it is the tie-break for every traversal order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTemplate {
    /// Stack-wide behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Every `[[resource]]` entry, in declaration order.
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDefinition>,
}

/// A validated template.
///
/// Only obtainable through `TryFrom<RawTemplate>` (see `config::validate`),
/// so holding one means names are well-formed and unique, every reference
/// points at a declared resource, and the reference graph is acyclic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTemplate", into = "RawTemplate")]
pub struct Template {
    config: ConfigSection,
    resources: Vec<ResourceDefinition>,
}

impl Template {
    /// Crate-internal constructor used by the validation layer.
    pub(crate) fn new_unchecked(config: ConfigSection, resources: Vec<ResourceDefinition>) -> Self {
        Self { config, resources }
    }

    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[ResourceDefinition] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDefinition> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resource(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Every resource `name` refers to, through `depends_on` or a `Ref`
    /// property, without duplicates and in first-mention order.
    pub fn references_of(&self, name: &str) -> Vec<String> {
        self.resource(name)
            .map(ResourceDefinition::references)
            .unwrap_or_default()
    }
}

impl From<Template> for RawTemplate {
    fn from(template: Template) -> Self {
        RawTemplate {
            config: template.config,
            resources: template.resources,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Cadence at which stack operations resume their tasks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for a whole stack operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Skip the automatic delete of created resources when a create fails.
    #[serde(default)]
    pub disable_rollback: bool,

    /// Maximum number of resources acted on at once (`0` = unbounded).
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
            disable_rollback: false,
            max_concurrency: 0,
        }
    }
}

impl ConfigSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// One `[[resource]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDefinition {
    /// Logical name, unique within the stack.
    pub name: String,

    /// Registered type name, e.g. `"Stackdag::Generic"`.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Explicit ordering dependencies on other resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Deadline for each lifecycle action on this resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub properties: Properties,
}

impl ResourceDefinition {
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            depends_on: Vec::new(),
            timeout_secs: None,
            properties: Properties::new(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// `depends_on` entries followed by `Ref` targets found in the
    /// properties, deduplicated.
    pub fn references(&self) -> Vec<String> {
        let mut refs = self.depends_on.clone();
        for value in self.properties.values() {
            collect_refs(value, &mut refs);
        }
        let mut seen = std::collections::HashSet::new();
        refs.retain(|name| seen.insert(name.clone()));
        refs
    }
}

/// The target of `value` if it is a `{ Ref = "<name>" }` table.
pub fn ref_target(value: &toml::Value) -> Option<&str> {
    let table = value.as_table()?;
    if table.len() != 1 {
        return None;
    }
    table.get(REF_KEY)?.as_str()
}

fn collect_refs(value: &toml::Value, out: &mut Vec<String>) {
    if let Some(target) = ref_target(value) {
        out.push(target.to_string());
        return;
    }
    match value {
        toml::Value::Table(table) => table.values().for_each(|v| collect_refs(v, out)),
        toml::Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Replace every `{ Ref = "<name>" }` in `properties` with the string
/// `lookup` returns for `<name>`. References `lookup` cannot answer are left
/// as they are.
pub fn resolve_refs<F>(properties: &Properties, lookup: F) -> Properties
where
    F: Fn(&str) -> Option<String>,
{
    properties
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, &lookup)))
        .collect()
}

fn resolve_value<F>(value: &toml::Value, lookup: &F) -> toml::Value
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(target) = ref_target(value) {
        return match lookup(target) {
            Some(resolved) => toml::Value::String(resolved),
            None => value.clone(),
        };
    }
    match value {
        toml::Value::Table(table) => toml::Value::Table(
            table
                .iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, lookup)))
                .collect(),
        ),
        toml::Value::Array(items) => {
            toml::Value::Array(items.iter().map(|v| resolve_value(v, lookup)).collect())
        }
        other => other.clone(),
    }
}
