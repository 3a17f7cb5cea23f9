// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! CloudFlow workflow engine core: state manager, step executor registry,
//! DAG executor, and scheduler.
//!
//! This crate owns the orchestration logic that sits between the domain
//! model (`cloudflow-domain`), the provider abstraction
//! (`cloudflow-providers`), and durable persistence (`cloudflow-state`):
//! given a validated `WorkflowDefinition` and a connected `Provider`, it
//! drives one or many workflow runs to completion, tracking per-step state
//! through the state manager at every transition.
//!
//! # Example
//!
//! ```
//! use cloudflow_core::{StepExecutorRegistry, StateManager, WorkflowExecutor};
//! use cloudflow_domain::{StepDefinition, StepType, WorkflowDefinition};
//! use cloudflow_providers::{MockProvider, Provider};
//! use cloudflow_state::InMemoryStateStore;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let definition = WorkflowDefinition::new("wf-1", "hello")
//!     .with_step(StepDefinition::new("s1", StepType::Inline));
//!
//! let provider = MockProvider::new("demo");
//! provider.connect().await?;
//! let deployment_id = provider
//!     .create_deployment("dep", &json!({"nodes": [{"name": "n1", "type": "compute"}]}), &HashMap::new())
//!     .await?;
//!
//! let manager = Arc::new(StateManager::new(Arc::new(InMemoryStateStore::new())));
//! let registry = Arc::new(StepExecutorRegistry::default_registry());
//!
//! let executor = WorkflowExecutor::new(
//!     definition,
//!     HashMap::new(),
//!     manager,
//!     registry,
//!     Arc::new(provider),
//!     deployment_id,
//! )
//! .await?;
//!
//! let state = executor.execute().await?;
//! assert!(!state.is_active());
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod dag;
pub mod error;
pub mod executor;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod scheduler;

pub use context::ExecutionContext;
pub use error::{OrchestratorError, Result};
pub use executor::WorkflowExecutor;
pub use manager::StateManager;
pub use registry::{
    CallOperationExecutor, InlineExecutor, OperationExecutor, StepExecutor, StepExecutorRegistry,
    SubWorkflowInvoker, UnsupportedSubWorkflowInvoker,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use scheduler::{SchedulerConfig, WorkflowScheduler};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
