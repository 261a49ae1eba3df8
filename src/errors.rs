// src/errors.rs

//! Crate-wide error taxonomy.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::Action;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Static template/property problems, surfaced before any task runs.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource {action} failed: {resource}: {reason}")]
    ResourceActionFailed {
        resource: String,
        action: Action,
        reason: String,
    },

    #[error("Task '{task}' timed out after {elapsed:?}")]
    Timeout { task: String, elapsed: Duration },

    #[error("Circular dependency detected between resources: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Task '{0}' was cancelled")]
    Cancelled(String),

    #[error("Task '{0}' has already been started")]
    AlreadyStarted(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Stack already exists: {0}")]
    StackExists(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Stack '{0}' already has an action in progress")]
    ActionInProgress(String),

    #[error("{original}; rollback also failed: {rollback}")]
    RollbackFailed {
        original: Box<EngineError>,
        rollback: Box<EngineError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether this error (or every member of an aggregate) is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            EngineError::Cancelled(_) => true,
            EngineError::Aggregate(agg) => agg.failures().iter().all(|e| e.is_cancellation()),
            _ => false,
        }
    }
}

/// Several member failures collected by a group running in aggregate mode.
#[derive(Debug)]
pub struct AggregateError {
    failures: Vec<EngineError>,
}

impl AggregateError {
    pub fn new(failures: Vec<EngineError>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &[EngineError] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<EngineError> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
