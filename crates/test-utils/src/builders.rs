#![allow(dead_code)]

use stackdag::config::{ConfigSection, RawTemplate, ResourceDefinition, Template};

/// Builder for `Template` to simplify test setup.
///
/// Poll interval defaults to 1 ms so stack operations finish quickly in
/// real time.
pub struct TemplateBuilder {
    raw: RawTemplate,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawTemplate {
                config: ConfigSection {
                    poll_interval_ms: 1,
                    ..ConfigSection::default()
                },
                resources: Vec::new(),
            },
        }
    }

    pub fn resource(mut self, resource: ResourceBuilder) -> Self {
        self.raw.resources.push(resource.build());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.raw.config.poll_interval_ms = ms;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.raw.config.timeout_secs = Some(secs);
        self
    }

    pub fn disable_rollback(mut self) -> Self {
        self.raw.config.disable_rollback = true;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.raw.config.max_concurrency = limit;
        self
    }

    pub fn raw(self) -> RawTemplate {
        self.raw
    }

    pub fn build(self) -> Template {
        Template::try_from(self.raw).expect("Failed to build valid template from builder")
    }
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ResourceDefinition`.
pub struct ResourceBuilder {
    definition: ResourceDefinition,
}

impl ResourceBuilder {
    pub fn new(name: &str, resource_type: &str) -> Self {
        Self {
            definition: ResourceDefinition::new(name, resource_type),
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.definition.depends_on.push(dep.to_string());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.definition.timeout_secs = Some(secs);
        self
    }

    pub fn property(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.definition.properties.insert(key.to_string(), value.into());
        self
    }

    /// `key = { Ref = "<target>" }`
    pub fn reference(mut self, key: &str, target: &str) -> Self {
        let mut table = toml::Table::new();
        table.insert("Ref".to_string(), toml::Value::String(target.to_string()));
        self.definition
            .properties
            .insert(key.to_string(), toml::Value::Table(table));
        self
    }

    pub fn build(self) -> ResourceDefinition {
        self.definition
    }
}
