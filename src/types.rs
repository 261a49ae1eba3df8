// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle action a resource or stack is (or was last) performing.
///
/// `Init` is the implicit state before the first action ever ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Init,
    Create,
    Update,
    Delete,
    Suspend,
    Resume,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Init => "INIT",
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Suspend => "SUSPEND",
            Action::Resume => "RESUME",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "init" => Ok(Action::Init),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "suspend" => Ok(Action::Suspend),
            "resume" => Ok(Action::Resume),
            other => Err(format!("invalid action: {other}")),
        }
    }
}

/// Status of the current action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    InProgress,
    Complete,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::InProgress => "IN_PROGRESS",
            Status::Complete => "COMPLETE",
            Status::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour when a lifecycle action is requested for a stack that is already
/// running one.
///
/// - `Queue`: wait for the running action to finish, then run (default).
/// - `Reject`: fail immediately with `EngineError::ActionInProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrentActionBehaviour {
    Queue,
    Reject,
}

impl Default for ConcurrentActionBehaviour {
    fn default() -> Self {
        ConcurrentActionBehaviour::Queue
    }
}

impl FromStr for ConcurrentActionBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queue" => Ok(ConcurrentActionBehaviour::Queue),
            "reject" => Ok(ConcurrentActionBehaviour::Reject),
            other => Err(format!(
                "invalid concurrent action behaviour: {other} (expected \"queue\" or \"reject\")"
            )),
        }
    }
}
