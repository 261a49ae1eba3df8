// src/config/validate.rs

use std::collections::HashSet;

use regex::Regex;

use crate::config::model::{RawTemplate, Template};
use crate::dag::DependencyGraph;
use crate::errors::{EngineError, Result};

const RESOURCE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";
const STACK_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_.-]*$";

impl TryFrom<RawTemplate> for Template {
    type Error = EngineError;

    fn try_from(raw: RawTemplate) -> std::result::Result<Self, Self::Error> {
        validate_raw_template(&raw)?;
        Ok(Template::new_unchecked(raw.config, raw.resources))
    }
}

/// Run every static check on a raw template.
pub fn validate_raw_template(raw: &RawTemplate) -> Result<()> {
    validate_global_config(raw)?;
    validate_resource_names(raw)?;
    validate_references(raw)?;
    validate_graph(raw)?;
    Ok(())
}

/// Stack names start with a letter and contain only letters, digits, `_`,
/// `.` and `-`.
pub fn validate_stack_name(name: &str) -> Result<()> {
    if matches_pattern(STACK_NAME_PATTERN, name)? {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "invalid stack name '{name}': must match {STACK_NAME_PATTERN}"
        )))
    }
}

fn matches_pattern(pattern: &str, candidate: &str) -> Result<bool> {
    let re = Regex::new(pattern).map_err(|e| EngineError::Other(e.into()))?;
    Ok(re.is_match(candidate))
}

fn validate_global_config(raw: &RawTemplate) -> Result<()> {
    if raw.config.poll_interval_ms == 0 {
        return Err(EngineError::Validation(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.config.timeout_secs == Some(0) {
        return Err(EngineError::Validation(
            "[config].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_resource_names(raw: &RawTemplate) -> Result<()> {
    let mut seen = HashSet::new();
    for resource in &raw.resources {
        if !matches_pattern(RESOURCE_NAME_PATTERN, &resource.name)? {
            return Err(EngineError::Validation(format!(
                "invalid resource name '{}': must match {RESOURCE_NAME_PATTERN}",
                resource.name
            )));
        }
        if !seen.insert(resource.name.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate resource name '{}'",
                resource.name
            )));
        }
        if resource.resource_type.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "resource '{}' has an empty type",
                resource.name
            )));
        }
        if resource.timeout_secs == Some(0) {
            return Err(EngineError::Validation(format!(
                "resource '{}': timeout_secs must be >= 1 (got 0)",
                resource.name
            )));
        }
    }
    Ok(())
}

fn validate_references(raw: &RawTemplate) -> Result<()> {
    let declared: HashSet<&str> = raw.resources.iter().map(|r| r.name.as_str()).collect();

    for resource in &raw.resources {
        for target in resource.references() {
            if target == resource.name {
                return Err(EngineError::Validation(format!(
                    "resource '{}' cannot refer to itself",
                    resource.name
                )));
            }
            if !declared.contains(target.as_str()) {
                return Err(EngineError::Validation(format!(
                    "resource '{}' refers to unknown resource '{}'",
                    resource.name, target
                )));
            }
        }
    }
    Ok(())
}

fn validate_graph(raw: &RawTemplate) -> Result<()> {
    // Edge direction: referenced -> referencing.
    let mut graph = DependencyGraph::new();
    for resource in &raw.resources {
        graph.add_node(&resource.name);
    }
    for resource in &raw.resources {
        for target in resource.references() {
            graph.add_edge(&target, &resource.name);
        }
    }
    graph.validate()
}
