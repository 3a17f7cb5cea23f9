// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Provider-level error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("deployment {0} not found")]
    NotFound(String),

    #[error("deployment error: {0}")]
    Deployment(String),

    #[error("operation error: {0}")]
    Operation(String),

    #[error("cloud provider error: {0}")]
    Cloud(String),
}

impl ProviderError {
    /// Connection and generic cloud errors are transient; NotFound,
    /// Deployment (template rejected), and Operation (unknown op name)
    /// are not worth retrying without caller intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Cloud(_))
    }
}
