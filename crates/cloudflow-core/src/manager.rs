// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The state manager: a write-through cache over the [`StateStore`] that
//! enforces the workflow/step state machines and the
//! `created_at ≤ started_at ≤ completed_at` invariant.

use std::collections::HashMap;
use std::sync::Arc;

use cloudflow_domain::{StepState, StepStatus, WorkflowState, WorkflowStatus};
use cloudflow_state::{StateFilter, StateStore};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument};

use crate::error::{OrchestratorError, Result};

/// Legal workflow status transitions. Every terminal state rejects further
/// transitions.
fn workflow_transition_allowed(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    use WorkflowStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Created, Pending)
            | (Created, Cancelled)
            | (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Running)
            | (Paused, Cancelled)
    )
}

/// Per-workflow serialization: one async mutex per workflow id, so
/// concurrent updates to the same workflow are queued rather than racing.
/// Each workflow gets its own lock so unrelated workflows never contend.
#[derive(Default)]
struct LockTable {
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl LockTable {
    fn handle(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

/// Write-through cache over a [`StateStore`] (C4).
pub struct StateManager {
    store: Arc<dyn StateStore>,
    cache: DashMap<String, WorkflowState>,
    locks: LockTable,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            locks: LockTable::default(),
        }
    }

    /// Every write fans through to the store; if the store write fails,
    /// the in-memory cache is rolled back to the pre-write value and the
    /// error propagates.
    async fn persist(&self, state: WorkflowState) -> Result<WorkflowState> {
        let previous = self.cache.get(&state.id).map(|e| e.clone());
        self.cache.insert(state.id.clone(), state.clone());

        if let Err(err) = self.store.save(&state).await {
            match previous {
                Some(prev) => {
                    self.cache.insert(state.id.clone(), prev);
                }
                None => {
                    self.cache.remove(&state.id);
                }
            }
            return Err(err.into());
        }
        Ok(state)
    }

    #[instrument(skip(self, inputs), fields(workflow_id = %id.as_ref()))]
    pub async fn create_workflow(
        &self,
        id: impl AsRef<str>,
        name: impl Into<String>,
        inputs: HashMap<String, Value>,
    ) -> Result<WorkflowState> {
        let id = id.as_ref();
        let guard = self.locks.handle(id);
        let _permit = guard.lock().await;

        if self.cache.contains_key(id) {
            return Err(OrchestratorError::Validation(format!(
                "workflow '{id}' already exists"
            )));
        }
        let state = WorkflowState::new(id, name, inputs);
        debug!("creating workflow");
        self.persist(state).await
    }

    pub fn get(&self, id: &str) -> Option<WorkflowState> {
        self.cache.get(id).map(|e| e.clone())
    }

    pub async fn add_step(&self, workflow_id: &str, step_id: &str, name: impl Into<String>, max_retries: u32) -> Result<()> {
        let guard = self.locks.handle(workflow_id);
        let _permit = guard.lock().await;

        let mut state = self
            .cache
            .get(workflow_id)
            .map(|e| e.clone())
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;

        if state.steps.contains_key(step_id) {
            return Err(OrchestratorError::Validation(format!(
                "step '{step_id}' already exists on workflow '{workflow_id}'"
            )));
        }
        state.steps.insert(step_id.to_string(), StepState::new(step_id, name, max_retries));
        self.persist(state).await?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(workflow_id = %workflow_id))]
    pub async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<WorkflowState> {
        let guard = self.locks.handle(workflow_id);
        let _permit = guard.lock().await;

        let mut state = self
            .cache
            .get(workflow_id)
            .map(|e| e.clone())
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;

        if !workflow_transition_allowed(state.status, status) {
            return Err(OrchestratorError::Validation(format!(
                "illegal workflow transition {:?} -> {:?}",
                state.status, status
            )));
        }

        state.set_status(status, error);
        debug!(new_status = %status, "workflow status transition");
        self.persist(state).await
    }

    pub async fn update_step_status(
        &self,
        workflow_id: &str,
        step_id: &str,
        status: StepStatus,
        error: Option<String>,
        outputs: Option<HashMap<String, Value>>,
    ) -> Result<WorkflowState> {
        self.update_step_status_with_retries(workflow_id, step_id, status, error, outputs, None)
            .await
    }

    /// As [`Self::update_step_status`], additionally recording the number of
    /// attempts the executor made before reaching this status. Clamped to
    /// the step's own `max_retries`.
    pub async fn update_step_status_with_retries(
        &self,
        workflow_id: &str,
        step_id: &str,
        status: StepStatus,
        error: Option<String>,
        outputs: Option<HashMap<String, Value>>,
        retry_count: Option<u32>,
    ) -> Result<WorkflowState> {
        let guard = self.locks.handle(workflow_id);
        let _permit = guard.lock().await;

        let mut state = self
            .cache
            .get(workflow_id)
            .map(|e| e.clone())
            .ok_or_else(|| OrchestratorError::NotFound(workflow_id.to_string()))?;

        let step = state
            .steps
            .get_mut(step_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("{workflow_id}/{step_id}")))?;

        if step.status.is_terminal() {
            return Err(OrchestratorError::Validation(format!(
                "step '{step_id}' is already terminal ({:?})",
                step.status
            )));
        }

        match status {
            StepStatus::Running => step.mark_running(),
            StepStatus::Completed => step.mark_completed(outputs.unwrap_or_default()),
            StepStatus::Failed => {
                step.mark_failed(error.unwrap_or_else(|| "step failed".to_string()));
            }
            StepStatus::Skipped => step.mark_skipped(),
            StepStatus::Pending => {
                return Err(OrchestratorError::Validation(
                    "cannot transition a step back to PENDING".to_string(),
                ));
            }
        }
        if let Some(rc) = retry_count {
            step.retry_count = rc.min(step.max_retries);
        }

        self.persist(state).await
    }

    pub async fn list(&self, filter: &StateFilter) -> Result<Vec<WorkflowState>> {
        self.store.list(filter).await.map_err(Into::into)
    }

    pub async fn cleanup(&self, max_age_days: i64) -> Result<u64> {
        let removed = self.store.cleanup(max_age_days).await?;
        self.cache.retain(|_, state| !(state.status.is_terminal() && is_old(state, max_age_days)));
        Ok(removed)
    }
}

fn is_old(state: &WorkflowState, max_age_days: i64) -> bool {
    state
        .completed_at
        .map(|t| t <= chrono::Utc::now() - chrono::Duration::days(max_age_days))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudflow_state::InMemoryStateStore;

    fn manager() -> StateManager {
        StateManager::new(Arc::new(InMemoryStateStore::new()))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        let state = mgr.get("wf-1").unwrap();
        assert_eq!(state.status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        assert!(mgr.create_workflow("wf-1", "demo", HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn running_sets_started_at_once() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Pending, None).await.unwrap();
        let state = mgr.update_workflow_status("wf-1", WorkflowStatus::Running, None).await.unwrap();
        assert!(state.started_at.is_some());
    }

    #[tokio::test]
    async fn transition_from_terminal_is_rejected() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Pending, None).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Running, None).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Completed, None).await.unwrap();

        assert!(mgr.update_workflow_status("wf-1", WorkflowStatus::Running, None).await.is_err());
    }

    #[tokio::test]
    async fn step_outputs_merge_last_writer_wins() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        mgr.add_step("wf-1", "s1", "s1", 3).await.unwrap();
        mgr.update_step_status("wf-1", "s1", StepStatus::Running, None, None).await.unwrap();
        mgr.update_step_status(
            "wf-1",
            "s1",
            StepStatus::Completed,
            None,
            Some(HashMap::from([("a".to_string(), Value::from(1))])),
        )
        .await
        .unwrap();

        let state = mgr.get("wf-1").unwrap();
        assert_eq!(state.steps["s1"].outputs["a"], Value::from(1));
    }

    #[tokio::test]
    async fn cleanup_delegates_to_store_and_reconciles_cache() {
        let mgr = manager();
        mgr.create_workflow("wf-1", "demo", HashMap::new()).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Pending, None).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Running, None).await.unwrap();
        mgr.update_workflow_status("wf-1", WorkflowStatus::Cancelled, None).await.unwrap();

        // Not old enough yet.
        let removed = mgr.cleanup(30).await.unwrap();
        assert_eq!(removed, 0);
        assert!(mgr.get("wf-1").is_some());
    }
}
