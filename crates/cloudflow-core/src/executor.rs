// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The workflow executor: runs one workflow's DAG to completion by
//! `tokio::spawn`-ing each ready step, re-evaluating the ready set on a
//! `Notify` signal rather than polling, wrapping every step dispatch in a
//! `RetryExecutor`, and propagating cancellation through a
//! `tokio_util::sync::CancellationToken`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cloudflow_domain::{StepStatus, StepType, WorkflowDefinition, WorkflowState, WorkflowStatus};
use cloudflow_providers::Provider;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::ExecutionContext;
use crate::dag;
use crate::error::{OrchestratorError, Result};
use crate::manager::StateManager;
use crate::registry::StepExecutorRegistry;
use crate::retry::{RetryExecutor, RetryPolicy};

/// Default workflow-level wall-clock budget.
const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(3600);

/// Fallback re-poll interval for the ready-set wait. `notify_waiters` stores
/// no permit, so a step task that completes and calls it before the main
/// loop has registered its `notified()` future loses the wakeup; this bound
/// turns an edge-triggered wait into a level-triggered one.
const READY_SET_REPOLL: Duration = Duration::from_millis(50);

/// Runs a single [`WorkflowDefinition`] against a provider-backed
/// deployment, driving its `WorkflowState` through the state manager.
pub struct WorkflowExecutor {
    definition: Arc<WorkflowDefinition>,
    manager: Arc<StateManager>,
    registry: Arc<StepExecutorRegistry>,
    provider: Arc<dyn Provider>,
    deployment_id: String,
    context: ExecutionContext,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl WorkflowExecutor {
    /// Validates `definition`, materializes its `WorkflowState` (CREATED)
    /// and every `StepState` (PENDING) through the state manager.
    pub async fn new(
        definition: WorkflowDefinition,
        inputs: HashMap<String, Value>,
        manager: Arc<StateManager>,
        registry: Arc<StepExecutorRegistry>,
        provider: Arc<dyn Provider>,
        deployment_id: impl Into<String>,
    ) -> Result<Self> {
        definition.validate()?;

        manager
            .create_workflow(&definition.id, definition.name.clone(), inputs.clone())
            .await?;
        for step in definition.steps.values() {
            manager
                .add_step(&definition.id, &step.id, &step.id, step.max_retries)
                .await?;
        }

        Ok(Self {
            definition: Arc::new(definition),
            manager,
            registry,
            provider,
            deployment_id: deployment_id.into(),
            context: ExecutionContext::new(inputs),
            notify: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            timeout: DEFAULT_WORKFLOW_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A handle the caller can use to cancel this run. Cheap to clone;
    /// cancelling any clone cancels the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workflow_id(&self) -> &str {
        &self.definition.id
    }

    /// Drives the workflow to a terminal state and returns the final
    /// snapshot. Exceeding `timeout` force-cancels the run and marks it
    /// FAILED with reason "timeout".
    #[instrument(skip(self), fields(workflow_id = %self.definition.id))]
    pub async fn execute(&self) -> Result<WorkflowState> {
        match timeout(self.timeout, self.run()).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel.cancel();
                self.drain_in_flight().await;
                self.manager
                    .update_workflow_status(
                        &self.definition.id,
                        WorkflowStatus::Failed,
                        Some("timeout".to_string()),
                    )
                    .await
            }
        }
    }

    async fn run(&self) -> Result<WorkflowState> {
        self.manager
            .update_workflow_status(&self.definition.id, WorkflowStatus::Pending, None)
            .await?;
        self.manager
            .update_workflow_status(&self.definition.id, WorkflowStatus::Running, None)
            .await?;

        let in_flight = Arc::new(AtomicUsize::new(0));

        loop {
            if self.cancel.is_cancelled() {
                self.handle_cancellation(&in_flight).await?;
                break;
            }

            let snapshot = self
                .manager
                .get(&self.definition.id)
                .ok_or_else(|| OrchestratorError::NotFound(self.definition.id.clone()))?;
            let statuses = status_map(&snapshot);
            let ready = dag::evaluate(&self.definition, &statuses);

            if !ready.skipped.is_empty() {
                for step_id in &ready.skipped {
                    debug!(step_id, "skipping step: predecessor took the other branch");
                    self.manager
                        .update_step_status(&self.definition.id, step_id, StepStatus::Skipped, None, None)
                        .await?;
                }
                // Skips can cascade (a skipped step's own successors may now
                // also be skippable); re-evaluate before dispatching.
                continue;
            }

            if ready.ready.is_empty() {
                if in_flight.load(Ordering::SeqCst) == 0 {
                    if dag::is_stuck(&statuses, &ready) {
                        warn!("workflow stuck: ready-set empty with pending steps and nothing running");
                        let state = self
                            .manager
                            .update_workflow_status(
                                &self.definition.id,
                                WorkflowStatus::Failed,
                                Some("unreachable steps".to_string()),
                            )
                            .await?;
                        return Ok(state);
                    }
                    if dag::is_complete(&statuses) {
                        break;
                    }
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(READY_SET_REPOLL) => {}
                }
                continue;
            }

            for step_id in ready.ready {
                in_flight.fetch_add(1, Ordering::SeqCst);
                let step_id = step_id;
                let this = self.fork();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    this.run_step(&step_id).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    this.notify.notify_waiters();
                });
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(READY_SET_REPOLL) => {}
            }
        }

        self.finalize().await
    }

    /// A cheap `Arc`-sharing clone used to move a copy of this executor's
    /// shared handles into a spawned step task.
    fn fork(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            manager: self.manager.clone(),
            registry: self.registry.clone(),
            provider: self.provider.clone(),
            deployment_id: self.deployment_id.clone(),
            context: self.context.clone(),
            notify: self.notify.clone(),
            cancel: self.cancel.clone(),
            timeout: self.timeout,
        }
    }

    /// Runs one step to a terminal status, retrying per its `max_retries`
    /// budget, cooperatively cancellable mid-attempt.
    #[instrument(skip(self), fields(workflow_id = %self.definition.id, step_id))]
    async fn run_step(&self, step_id: &str) {
        let Some(step) = self.definition.get_step(step_id) else {
            return;
        };

        if let Err(err) = self
            .manager
            .update_step_status(&self.definition.id, step_id, StepStatus::Running, None, None)
            .await
        {
            warn!(step_id, %err, "failed to mark step running");
            return;
        }
        info!(step_id, step_type = ?step.step_type, "dispatching step");

        let Some(executor) = self.registry.get(step.step_type) else {
            let _ = self
                .manager
                .update_step_status(
                    &self.definition.id,
                    step_id,
                    StepStatus::Failed,
                    Some(format!("no executor registered for {:?}", step.step_type)),
                    None,
                )
                .await;
            return;
        };

        let inputs = match self.context.resolve_inputs(step) {
            Ok(inputs) => inputs,
            Err(err) => {
                let _ = self
                    .manager
                    .update_step_status(
                        &self.definition.id,
                        step_id,
                        StepStatus::Failed,
                        Some(err.to_string()),
                        None,
                    )
                    .await;
                return;
            }
        };

        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(
            step.max_retries,
            Duration::from_millis(200),
            2.0,
            Duration::from_secs(10),
        );
        let retry_executor = RetryExecutor::new(policy);

        let outcome = tokio::select! {
            result = retry_executor.execute(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                executor
                    .execute(step, inputs.clone(), &self.provider, &self.deployment_id)
                    .await
                    .map_err(|err| OrchestratorError::Execution {
                        step_id: step_id.to_string(),
                        message: err.to_string(),
                    })
            }) => Some(result),
            _ = self.cancel.cancelled() => None,
        };

        let retries_made = attempts.load(Ordering::SeqCst).saturating_sub(1);

        match outcome {
            None => {
                executor.cancel(step, &self.provider, &self.deployment_id).await;
                let _ = self
                    .manager
                    .update_step_status_with_retries(
                        &self.definition.id,
                        step_id,
                        StepStatus::Failed,
                        Some("cancelled".to_string()),
                        None,
                        Some(retries_made),
                    )
                    .await;
            }
            Some(Ok(outputs)) => {
                self.context.record_outputs(step_id, outputs.clone());
                let _ = self
                    .manager
                    .update_step_status_with_retries(
                        &self.definition.id,
                        step_id,
                        StepStatus::Completed,
                        None,
                        Some(outputs),
                        Some(retries_made),
                    )
                    .await;
            }
            Some(Err(err)) => {
                warn!(step_id, %err, retries = retries_made, "step failed");
                let _ = self
                    .manager
                    .update_step_status_with_retries(
                        &self.definition.id,
                        step_id,
                        StepStatus::Failed,
                        Some(err.to_string()),
                        None,
                        Some(retries_made),
                    )
                    .await;
            }
        }
    }

    /// Skips every PENDING step and waits for in-flight RUNNING steps to
    /// observe cancellation.
    async fn handle_cancellation(&self, in_flight: &Arc<AtomicUsize>) -> Result<()> {
        info!("cancellation requested");
        let snapshot = self
            .manager
            .get(&self.definition.id)
            .ok_or_else(|| OrchestratorError::NotFound(self.definition.id.clone()))?;
        for (step_id, step_state) in &snapshot.steps {
            if step_state.status == StepStatus::Pending {
                self.manager
                    .update_step_status(&self.definition.id, step_id, StepStatus::Skipped, None, None)
                    .await?;
            }
        }

        while in_flight.load(Ordering::SeqCst) > 0 {
            self.notify.notified().await;
        }
        Ok(())
    }

    async fn drain_in_flight(&self) {
        // Best-effort: spawned step tasks observe `self.cancel` on their own
        // and decrement their own in-flight counters; nothing further to do
        // from the timeout path beyond giving them a moment to unwind.
        tokio::task::yield_now().await;
    }

    async fn finalize(&self) -> Result<WorkflowState> {
        if self.cancel.is_cancelled() {
            return self
                .manager
                .update_workflow_status(&self.definition.id, WorkflowStatus::Cancelled, None)
                .await;
        }

        let snapshot = self
            .manager
            .get(&self.definition.id)
            .ok_or_else(|| OrchestratorError::NotFound(self.definition.id.clone()))?;
        let statuses = status_map(&snapshot);

        if dag::any_unhandled_failure(&self.definition, &statuses) {
            let reason = snapshot
                .steps
                .values()
                .find(|s| s.status == StepStatus::Failed)
                .and_then(|s| s.error_message.clone())
                .unwrap_or_else(|| "a step failed".to_string());
            self.manager
                .update_workflow_status(&self.definition.id, WorkflowStatus::Failed, Some(reason))
                .await
        } else {
            self.manager
                .update_workflow_status(&self.definition.id, WorkflowStatus::Completed, None)
                .await
        }
    }
}

fn status_map(state: &WorkflowState) -> HashMap<String, StepStatus> {
    state.steps.iter().map(|(id, s)| (id.clone(), s.status)).collect()
}

/// Returns true if `step_type` requires a provider-facing target; used by
/// callers that want to sanity-check a blueprint before creating a
/// deployment. Kept here rather than in `cloudflow_domain` since it is
/// executor-specific guidance, not a structural invariant.
pub fn requires_target(step_type: StepType) -> bool {
    matches!(step_type, StepType::NodeOperation | StepType::RelationshipOperation)
}
