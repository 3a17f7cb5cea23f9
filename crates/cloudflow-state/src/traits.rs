// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The state store trait: a crash-safe key-value mapping from workflow-id
//! to full `WorkflowState` (steps embedded). There is no checkpoint/resume
//! API here, only plain save/load/list/delete.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudflow_domain::WorkflowState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for StateStoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StateStoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => {
                StateStoreError::Connection("connection pool timed out".to_string())
            }
            other => StateStoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StateStoreError {
    fn from(err: serde_json::Error) -> Self {
        StateStoreError::Serialization(err.to_string())
    }
}

pub type StateStoreResult<T> = Result<T, StateStoreError>;

/// AND-filter over first-class fields, applied by [`StateStore::list`].
/// Unknown keys aren't representable here, so there's nothing to ignore.
#[derive(Debug, Clone, Default)]
pub struct StateFilter {
    pub status: Option<cloudflow_domain::WorkflowStatus>,
    pub name: Option<String>,
}

/// Durable mapping from workflow-id to `WorkflowState` (C3).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert; must be atomic w.r.t. concurrent readers.
    async fn save(&self, state: &WorkflowState) -> StateStoreResult<()>;

    async fn load(&self, id: &str) -> StateStoreResult<WorkflowState>;

    async fn list(&self, filter: &StateFilter) -> StateStoreResult<Vec<WorkflowState>>;

    async fn delete(&self, id: &str) -> StateStoreResult<()>;

    /// Atomically removes every workflow with terminal status and
    /// `completed_at <= now - max_age_days`, returning the count removed.
    async fn cleanup(&self, max_age_days: i64) -> StateStoreResult<u64>;

    async fn health_check(&self) -> StateStoreResult<()>;
}

pub(crate) fn cutoff(max_age_days: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(max_age_days)
}
