// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The step executor registry: dispatches a step to the operation
//! implementation for its `StepType` via a lookup table from step-type
//! discriminator to an executor value, built by the caller and injected
//! rather than hardcoded into the executor or read from global state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cloudflow_domain::{StepDefinition, StepType};
use cloudflow_providers::Provider;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// One step-type's execution strategy.
///
/// `execute` may suspend on provider I/O; `cancel` is best-effort and must
/// never raise.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &StepDefinition,
        inputs: HashMap<String, Value>,
        provider: &Arc<dyn Provider>,
        deployment_id: &str,
    ) -> Result<HashMap<String, Value>>;

    async fn cancel(&self, step: &StepDefinition, provider: &Arc<dyn Provider>, deployment_id: &str);
}

/// Delegates to `Provider::execute_operation` with the step's own
/// `target`/`operation` fields. `NODE_OPERATION` and `RELATIONSHIP_OPERATION`
/// differ only in which domain object `target` names, which is opaque to the
/// engine, so one implementation covers both.
pub struct OperationExecutor;

#[async_trait]
impl StepExecutor for OperationExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        inputs: HashMap<String, Value>,
        provider: &Arc<dyn Provider>,
        deployment_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let operation = step.operation.as_deref().ok_or_else(|| {
            OrchestratorError::Operation(format!("step '{}' has no operation name", step.id))
        })?;
        provider
            .execute_operation(deployment_id, operation, &inputs)
            .await
            .map_err(Into::into)
    }

    async fn cancel(&self, _step: &StepDefinition, _provider: &Arc<dyn Provider>, _deployment_id: &str) {
        // Best-effort; the provider has no in-flight-operation cancel hook,
        // so there is nothing more to do here than let the in-progress
        // `execute_operation` call run to completion.
    }
}

/// A no-op step that echoes its resolved inputs back as outputs.
pub struct InlineExecutor;

#[async_trait]
impl StepExecutor for InlineExecutor {
    async fn execute(
        &self,
        _step: &StepDefinition,
        inputs: HashMap<String, Value>,
        _provider: &Arc<dyn Provider>,
        _deployment_id: &str,
    ) -> Result<HashMap<String, Value>> {
        Ok(inputs)
    }

    async fn cancel(&self, _step: &StepDefinition, _provider: &Arc<dyn Provider>, _deployment_id: &str) {}
}

/// Invokes a sub-workflow by name. How a sub-workflow actually resolves (a
/// nested `WorkflowDefinition` run against the same executor, a remote
/// call, or nothing at all) is left to the caller: the invoker is injected
/// as a trait object rather than hardcoded (see DESIGN.md).
#[async_trait]
pub trait SubWorkflowInvoker: Send + Sync {
    async fn invoke(&self, workflow_name: &str, inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>>;
}

/// Default invoker: `CALL_OPERATION` steps always fail. A caller that
/// wants sub-workflow support supplies its own `SubWorkflowInvoker`.
pub struct UnsupportedSubWorkflowInvoker;

#[async_trait]
impl SubWorkflowInvoker for UnsupportedSubWorkflowInvoker {
    async fn invoke(&self, workflow_name: &str, _inputs: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        Err(OrchestratorError::Operation(format!(
            "no sub-workflow invoker configured; cannot call '{workflow_name}'"
        )))
    }
}

pub struct CallOperationExecutor {
    invoker: Arc<dyn SubWorkflowInvoker>,
}

impl CallOperationExecutor {
    pub fn new(invoker: Arc<dyn SubWorkflowInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl StepExecutor for CallOperationExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        inputs: HashMap<String, Value>,
        _provider: &Arc<dyn Provider>,
        _deployment_id: &str,
    ) -> Result<HashMap<String, Value>> {
        let target = step.target.as_deref().ok_or_else(|| {
            OrchestratorError::Operation(format!("step '{}' has no sub-workflow target", step.id))
        })?;
        self.invoker.invoke(target, inputs).await
    }

    async fn cancel(&self, _step: &StepDefinition, _provider: &Arc<dyn Provider>, _deployment_id: &str) {}
}

/// Lookup table from `StepType` to its `StepExecutor`.
pub struct StepExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    /// The four built-in executors, with `CALL_OPERATION` wired to an
    /// invoker that rejects every call until
    /// the caller supplies one via [`Self::with_sub_workflow_invoker`].
    pub fn default_registry() -> Self {
        let mut executors: HashMap<StepType, Arc<dyn StepExecutor>> = HashMap::new();
        executors.insert(StepType::NodeOperation, Arc::new(OperationExecutor));
        executors.insert(StepType::RelationshipOperation, Arc::new(OperationExecutor));
        executors.insert(StepType::Inline, Arc::new(InlineExecutor));
        executors.insert(
            StepType::CallOperation,
            Arc::new(CallOperationExecutor::new(Arc::new(UnsupportedSubWorkflowInvoker))),
        );
        Self { executors }
    }

    pub fn with_sub_workflow_invoker(mut self, invoker: Arc<dyn SubWorkflowInvoker>) -> Self {
        self.executors
            .insert(StepType::CallOperation, Arc::new(CallOperationExecutor::new(invoker)));
        self
    }

    pub fn register(&mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_type, executor);
    }

    pub fn get(&self, step_type: StepType) -> Option<&Arc<dyn StepExecutor>> {
        self.executors.get(&step_type)
    }
}

impl Default for StepExecutorRegistry {
    fn default() -> Self {
        Self::default_registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudflow_providers::MockProvider;
    use serde_json::json;

    async fn connected_mock() -> Arc<dyn Provider> {
        let provider = MockProvider::new("test");
        provider.connect().await.unwrap();
        Arc::new(provider)
    }

    #[tokio::test]
    async fn inline_echoes_inputs() {
        let registry = StepExecutorRegistry::default_registry();
        let executor = registry.get(StepType::Inline).unwrap();
        let step = StepDefinition::new("s1", StepType::Inline);
        let provider = connected_mock().await;

        let inputs = HashMap::from([("x".to_string(), json!(1))]);
        let outputs = executor.execute(&step, inputs.clone(), &provider, "dep-1").await.unwrap();
        assert_eq!(outputs, inputs);
    }

    #[tokio::test]
    async fn call_operation_fails_without_invoker() {
        let registry = StepExecutorRegistry::default_registry();
        let executor = registry.get(StepType::CallOperation).unwrap();
        let step = StepDefinition::new("s1", StepType::CallOperation).with_target("sub-workflow");
        let provider = connected_mock().await;

        let err = executor
            .execute(&step, HashMap::new(), &provider, "dep-1")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Operation(_)));
    }

    #[tokio::test]
    async fn node_operation_requires_operation_name() {
        let registry = StepExecutorRegistry::default_registry();
        let executor = registry.get(StepType::NodeOperation).unwrap();
        let step = StepDefinition::new("s1", StepType::NodeOperation).with_target("node-a");
        let provider = connected_mock().await;

        let err = executor
            .execute(&step, HashMap::new(), &provider, "dep-1")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Operation(_)));
    }
}
