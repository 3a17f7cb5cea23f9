// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios for the workflow engine: one `WorkflowExecutor` run
//! per scenario, driven through the public crate API against a connected
//! `MockProvider` and an `InMemoryStateStore`, seeded directly from the six
//! scenarios this engine's test suite is built around (single step, linear
//! chain, diamond, failure with/without a handler, cancellation), plus the
//! cancellation-timing property and a `WorkflowScheduler` concurrency bound
//! and timeout-to-`Failed` check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudflow_core::{
    SchedulerConfig, StateManager, StepExecutor, StepExecutorRegistry, WorkflowExecutor, WorkflowScheduler,
};
use cloudflow_domain::{StepDefinition, StepStatus, StepType, WorkflowDefinition, WorkflowStatus};
use cloudflow_providers::{MockProvider, Provider};
use cloudflow_state::InMemoryStateStore;
use serde_json::{json, Value};

async fn deployed_provider() -> (Arc<dyn Provider>, String) {
    let provider = MockProvider::new("scenario");
    provider.connect().await.unwrap();
    let template = json!({ "nodes": [{ "name": "n1", "type": "compute" }] });
    let deployment_id = provider
        .create_deployment("scenario-deployment", &template, &HashMap::new())
        .await
        .unwrap();
    (Arc::new(provider), deployment_id)
}

fn fresh_manager() -> Arc<StateManager> {
    Arc::new(StateManager::new(Arc::new(InMemoryStateStore::new())))
}

#[tokio::test]
async fn scenario_single_inline_step() {
    let def = WorkflowDefinition::new("wf-single", "single").with_step(StepDefinition::new("s1", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    let s1 = &state.steps["s1"];
    assert_eq!(s1.status, StepStatus::Completed);
    assert!(s1.started_at.is_some());
    assert!(s1.completed_at.is_some());
    assert!(s1.error_message.is_none());
}

#[tokio::test]
async fn scenario_linear_chain_runs_steps_in_happens_before_order() {
    let def = WorkflowDefinition::new("wf-chain", "chain")
        .with_step(StepDefinition::new("s1", StepType::Inline).on_success(["s2"]))
        .with_step(StepDefinition::new("s2", StepType::Inline).on_success(["s3"]))
        .with_step(StepDefinition::new("s3", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert!(state.steps["s1"].completed_at.unwrap() <= state.steps["s2"].started_at.unwrap());
    assert!(state.steps["s2"].completed_at.unwrap() <= state.steps["s3"].started_at.unwrap());
}

#[tokio::test]
async fn scenario_diamond_joins_after_both_branches() {
    let def = WorkflowDefinition::new("wf-diamond", "diamond")
        .with_step(StepDefinition::new("s1", StepType::Inline).on_success(["s2", "s3"]))
        .with_step(StepDefinition::new("s2", StepType::Inline).on_success(["s4"]))
        .with_step(StepDefinition::new("s3", StepType::Inline).on_success(["s4"]))
        .with_step(StepDefinition::new("s4", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    for id in ["s1", "s2", "s3", "s4"] {
        assert_eq!(state.steps[id].status, StepStatus::Completed);
    }
    assert!(state.steps["s2"].completed_at.unwrap() <= state.steps["s4"].started_at.unwrap());
    assert!(state.steps["s3"].completed_at.unwrap() <= state.steps["s4"].started_at.unwrap());
}

#[tokio::test]
async fn scenario_failure_with_handler_recovers_to_completed() {
    let def = WorkflowDefinition::new("wf-handled", "handled")
        .with_step(
            StepDefinition::new("s1", StepType::NodeOperation)
                .with_target("does-not-exist")
                .on_failure(["s2"]),
        )
        .with_step(StepDefinition::new("s2", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.steps["s1"].status, StepStatus::Failed);
    assert_eq!(state.steps["s2"].status, StepStatus::Completed);
}

#[tokio::test]
async fn scenario_failure_without_handler_fails_the_workflow() {
    let def = WorkflowDefinition::new("wf-unhandled", "unhandled")
        .with_step(StepDefinition::new("s1", StepType::NodeOperation).with_target("does-not-exist"));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.steps["s1"].status, StepStatus::Failed);
    assert!(state.error_message.is_some());
}

#[tokio::test]
async fn scenario_cancellation_reaches_terminal_state_quickly() {
    let def = WorkflowDefinition::new("wf-cancel", "cancel")
        .with_step(StepDefinition::new("s1", StepType::Inline).on_success(["s2"]))
        .with_step(StepDefinition::new("s2", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = Arc::new(
        WorkflowExecutor::new(
            def,
            HashMap::new(),
            fresh_manager(),
            Arc::new(StepExecutorRegistry::default_registry()),
            provider,
            deployment_id,
        )
        .await
        .unwrap(),
    );

    let token = executor.cancellation_token();
    let run = tokio::spawn({
        let executor = executor.clone();
        async move { executor.execute().await }
    });
    token.cancel();

    let state = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("workflow did not reach a terminal state within the cancellation deadline")
        .unwrap()
        .unwrap();

    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(state.steps.values().all(|s| s.status != StepStatus::Running));
}

#[tokio::test]
async fn empty_workflow_is_rejected_before_it_ever_runs() {
    let def = WorkflowDefinition::new("wf-empty", "empty");
    let (provider, deployment_id) = deployed_provider().await;

    let result = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn all_terminal_steps_imply_terminal_workflow_p1() {
    let def = WorkflowDefinition::new("wf-p1", "p1")
        .with_step(StepDefinition::new("s1", StepType::Inline).on_success(["s2"]))
        .with_step(StepDefinition::new("s2", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;

    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        fresh_manager(),
        Arc::new(StepExecutorRegistry::default_registry()),
        provider,
        deployment_id,
    )
    .await
    .unwrap();

    let state = executor.execute().await.unwrap();
    assert!(state.status.is_terminal());
    assert!(state.steps.values().all(|s| s.status.is_terminal()));
}

/// A step that sleeps for a fixed duration before echoing its inputs back,
/// used to hold a workflow run open long enough for scheduler-level tests
/// to observe it mid-flight.
struct SlowExecutor {
    delay: Duration,
}

#[async_trait]
impl StepExecutor for SlowExecutor {
    async fn execute(
        &self,
        _step: &StepDefinition,
        inputs: HashMap<String, Value>,
        _provider: &Arc<dyn Provider>,
        _deployment_id: &str,
    ) -> cloudflow_core::Result<HashMap<String, Value>> {
        tokio::time::sleep(self.delay).await;
        Ok(inputs)
    }

    async fn cancel(&self, _step: &StepDefinition, _provider: &Arc<dyn Provider>, _deployment_id: &str) {}
}

fn slow_registry(delay: Duration) -> Arc<StepExecutorRegistry> {
    let mut registry = StepExecutorRegistry::default_registry();
    registry.register(StepType::Inline, Arc::new(SlowExecutor { delay }));
    Arc::new(registry)
}

#[tokio::test]
async fn scheduler_never_exceeds_max_concurrent_workflows() {
    let config = SchedulerConfig {
        max_concurrent_workflows: 2,
        max_workflow_timeout: Duration::from_secs(30),
        cleanup_interval: Duration::from_secs(86_400),
        history_retention_days: 30,
    };
    let peak = Arc::new(AtomicUsize::new(0));
    let scheduler = Arc::new(
        WorkflowScheduler::new(config, |_days| Box::pin(async { Ok(0) })).unwrap(),
    );

    let manager = fresh_manager();
    let registry = slow_registry(Duration::from_millis(150));
    for i in 0..6 {
        let def = WorkflowDefinition::new(format!("wf-conc-{i}"), "concurrent")
            .with_step(StepDefinition::new("s1", StepType::Inline));
        let (provider, deployment_id) = deployed_provider().await;
        let executor = WorkflowExecutor::new(
            def,
            HashMap::new(),
            manager.clone(),
            registry.clone(),
            provider,
            deployment_id,
        )
        .await
        .unwrap();
        scheduler.enqueue(executor).unwrap();
    }

    scheduler.start();

    for _ in 0..50 {
        let running = scheduler.running_count();
        assert!(
            running <= 2,
            "scheduler admitted {running} concurrent workflows against a max of 2"
        );
        if running > peak.load(Ordering::SeqCst) {
            peak.store(running, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    scheduler.stop();

    // The workload (6 runs, 150ms each, headroom for 2) is enough that the
    // in-flight set should have actually filled up at least once; otherwise
    // this assertion is only checking an idle scheduler.
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scheduler_marks_runs_failed_with_timeout_reason_past_deadline() {
    let config = SchedulerConfig {
        max_concurrent_workflows: 4,
        max_workflow_timeout: Duration::from_millis(100),
        cleanup_interval: Duration::from_secs(86_400),
        history_retention_days: 30,
    };
    let scheduler = Arc::new(
        WorkflowScheduler::new(config, |_days| Box::pin(async { Ok(0) })).unwrap(),
    );

    let manager = fresh_manager();
    let def = WorkflowDefinition::new("wf-timeout", "too-slow").with_step(StepDefinition::new("s1", StepType::Inline));
    let (provider, deployment_id) = deployed_provider().await;
    let executor = WorkflowExecutor::new(
        def,
        HashMap::new(),
        manager.clone(),
        slow_registry(Duration::from_secs(5)),
        provider,
        deployment_id,
    )
    .await
    .unwrap();
    scheduler.enqueue(executor).unwrap();
    scheduler.start();

    let state = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Some(state) = manager.get("wf-timeout") {
                if state.status.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("workflow did not reach a terminal state before the test's own deadline");
    scheduler.stop();

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.error_message, Some("timeout".to_string()));
}
