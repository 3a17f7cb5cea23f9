// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Mutable runtime records: [`WorkflowState`] and [`StepState`].
//!
//! These are the single canonical model shared by the state store, the
//! state manager, and the executor — the source material defined this
//! shape twice (once per persistence layer, once per in-memory layer);
//! here there is exactly one, and `cloudflow-state` is the only crate
//! that knows how to put it on disk.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Workflow-level status, per spec §3's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("invalid workflow status: {other}")),
        }
    }
}

/// Step-level status, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("invalid step status: {other}")),
        }
    }
}

/// Per-step runtime record, embedded in [`WorkflowState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl StepState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            outputs: HashMap::new(),
            retry_count: 0,
            max_retries,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, outputs: HashMap<String, Value>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.outputs.extend(outputs);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    pub fn mark_skipped(&mut self) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }
}

/// Mutable runtime record for one workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub steps: HashMap<String, StepState>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub error_message: Option<String>,
}

impl WorkflowState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, inputs: HashMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkflowStatus::Created,
            steps: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            inputs,
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub(crate) fn set_status(&mut self, status: WorkflowStatus, error: Option<String>) {
        self.status = status;
        let now = Utc::now();
        if status == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if error.is_some() {
            self.error_message = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for s in [
            WorkflowStatus::Created,
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            assert_eq!(s.to_string().parse::<WorkflowStatus>().unwrap(), s);
        }
    }

    #[test]
    fn workflow_state_sets_timestamps_on_transition() {
        let mut state = WorkflowState::new("wf-1", "test", HashMap::new());
        assert!(state.started_at.is_none());

        state.set_status(WorkflowStatus::Running, None);
        assert!(state.started_at.is_some());
        assert!(state.completed_at.is_none());

        state.set_status(WorkflowStatus::Completed, None);
        assert!(state.completed_at.is_some());
        assert!(state.created_at <= state.started_at.unwrap());
        assert!(state.started_at.unwrap() <= state.completed_at.unwrap());
    }

    #[test]
    fn step_state_retry_budget() {
        let mut step = StepState::new("s1", "s1", 2);
        assert!(step.can_retry());
        step.increment_retry();
        step.increment_retry();
        assert!(!step.can_retry());
    }
}
