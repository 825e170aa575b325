//! Progress reporting for asynchronous operations.

use crate::cloud::DbInstanceDescription;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    Succeeded,
    Failed,
}

impl LastOperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Map a provider status string; unknown statuses are `Failed`
    pub fn from_status(status: &str) -> Self {
        match status {
            "available" => Self::Succeeded,
            "backing-up"
            | "creating"
            | "deleting"
            | "maintenance"
            | "modifying"
            | "rebooting"
            | "renaming"
            | "resetting-master-credentials"
            | "upgrading" => Self::InProgress,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub state: LastOperationState,
    pub description: String,
}

impl LastOperation {
    /// Response for plans that never run asynchronous operations
    pub fn none() -> Self {
        Self { state: LastOperationState::Failed, description: "No last operation".to_string() }
    }

    /// State of a described instance; pending modifications hold an
    /// otherwise available instance in progress
    pub fn from_description(identifier: &str, description: &DbInstanceDescription) -> Self {
        let state = LastOperationState::from_status(&description.status);

        if state == LastOperationState::Succeeded && description.pending_modifications {
            return Self {
                state: LastOperationState::InProgress,
                description: format!("DB Instance '{}' has pending modifications", identifier),
            };
        }

        Self {
            state,
            description: format!("DB Instance '{}' status is '{}'", identifier, description.status),
        }
    }
}
