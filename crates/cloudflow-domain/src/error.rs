// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while validating a [`crate::workflow::WorkflowDefinition`].

use thiserror::Error;

/// Structural problems caught before a workflow is ever scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("workflow has no steps")]
    EmptySteps,

    #[error("step '{0}' references unknown successor '{1}'")]
    UnknownDependency(String, String),

    #[error("workflow graph contains a cycle reachable from step '{0}'")]
    CyclicDependency(String),
}
