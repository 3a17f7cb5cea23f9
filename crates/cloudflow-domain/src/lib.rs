// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Canonical data model for the CloudFlow workflow engine.
//!
//! This crate owns the one in-memory representation of a workflow, shared
//! by the provider, state-store, and executor crates, so that persistence
//! adapters translate to and from a single source of truth instead of each
//! layer defining its own copy.

pub mod error;
pub mod provider;
pub mod state;
pub mod workflow;

pub use error::DomainError;
pub use provider::{DeploymentStatus, ResourceStatus};
pub use state::{StepState, StepStatus, WorkflowState, WorkflowStatus};
pub use workflow::{InputDeclaration, StepDefinition, StepInput, StepType, WorkflowDefinition};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
