// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! SQLite implementation of the [`StateStore`] trait: one transaction per
//! `save`, positional `?` parameter binding, and the schema inlined so the
//! crate has no external migration files to ship.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudflow_domain::{StepState, StepStatus, WorkflowState, WorkflowStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::traits::{cutoff, StateFilter, StateStore, StateStoreError, StateStoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    inputs_json TEXT NOT NULL,
    outputs_json TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    error TEXT
);

CREATE TABLE IF NOT EXISTS steps (
    workflow_id TEXT NOT NULL,
    step_id TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    outputs_json TEXT NOT NULL,
    error TEXT,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    PRIMARY KEY (workflow_id, step_id)
);
"#;

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if absent) a SQLite database at `path` and run the
    /// schema migration.
    pub async fn new(path: impl AsRef<str>) -> StateStoreResult<Self> {
        let options = SqliteConnectOptions::from_str(path.as_ref())
            .map_err(|e| StateStoreError::Configuration(format!("invalid database path: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StateStoreError::Connection(format!("failed to open database: {e}")))?;

        info!("initializing sqlite state store schema");
        sqlx::query(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory SQLite database, convenient for tests.
    pub async fn in_memory() -> StateStoreResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn hydrate_steps(&self, workflow_id: &str) -> StateStoreResult<HashMap<String, StepState>> {
        let rows = sqlx::query(
            "SELECT step_id, name, status, started_at, completed_at, outputs_json, error, retry_count, max_retries \
             FROM steps WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = HashMap::with_capacity(rows.len());
        for row in rows {
            let step_id: String = row.get("step_id");
            let status_str: String = row.get("status");
            let outputs_str: String = row.get("outputs_json");
            let step = StepState {
                id: step_id.clone(),
                name: row.get("name"),
                status: StepStatus::from_str(&status_str)
                    .map_err(StateStoreError::InvalidState)?,
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                outputs: serde_json::from_str(&outputs_str)?,
                error_message: row.get("error"),
                retry_count: row.get::<i64, _>("retry_count") as u32,
                max_retries: row.get::<i64, _>("max_retries") as u32,
            };
            steps.insert(step_id, step);
        }
        Ok(steps)
    }

    fn hydrate_workflow(row: &sqlx::sqlite::SqliteRow) -> StateStoreResult<WorkflowState> {
        let status_str: String = row.get("status");
        Ok(WorkflowState {
            id: row.get("id"),
            name: row.get("name"),
            status: WorkflowStatus::from_str(&status_str).map_err(StateStoreError::InvalidState)?,
            steps: HashMap::new(),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            inputs: serde_json::from_str(&row.get::<String, _>("inputs_json"))?,
            outputs: serde_json::from_str(&row.get::<String, _>("outputs_json"))?,
            metadata: serde_json::from_str(&row.get::<String, _>("metadata_json"))?,
            error_message: row.get("error"),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn save(&self, state: &WorkflowState) -> StateStoreResult<()> {
        debug!(workflow_id = %state.id, "saving workflow state");
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflows (id, name, status, created_at, started_at, completed_at, inputs_json, outputs_json, metadata_json, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               name = excluded.name, status = excluded.status, started_at = excluded.started_at, \
               completed_at = excluded.completed_at, inputs_json = excluded.inputs_json, \
               outputs_json = excluded.outputs_json, metadata_json = excluded.metadata_json, error = excluded.error",
        )
        .bind(&state.id)
        .bind(&state.name)
        .bind(state.status.to_string())
        .bind(state.created_at)
        .bind(state.started_at)
        .bind(state.completed_at)
        .bind(serde_json::to_string(&state.inputs)?)
        .bind(serde_json::to_string(&state.outputs)?)
        .bind(serde_json::to_string(&state.metadata)?)
        .bind(&state.error_message)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM steps WHERE workflow_id = ?")
            .bind(&state.id)
            .execute(&mut *tx)
            .await?;

        for step in state.steps.values() {
            sqlx::query(
                "INSERT INTO steps (workflow_id, step_id, name, status, started_at, completed_at, outputs_json, error, retry_count, max_retries) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&state.id)
            .bind(&step.id)
            .bind(&step.name)
            .bind(step.status.to_string())
            .bind(step.started_at)
            .bind(step.completed_at)
            .bind(serde_json::to_string(&step.outputs)?)
            .bind(&step.error_message)
            .bind(step.retry_count as i64)
            .bind(step.max_retries as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> StateStoreResult<WorkflowState> {
        let row = sqlx::query(
            "SELECT id, name, status, created_at, started_at, completed_at, inputs_json, outputs_json, metadata_json, error \
             FROM workflows WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StateStoreError::NotFound(id.to_string()))?;

        let mut state = Self::hydrate_workflow(&row)?;
        state.steps = self.hydrate_steps(id).await?;
        Ok(state)
    }

    async fn list(&self, filter: &StateFilter) -> StateStoreResult<Vec<WorkflowState>> {
        let rows = sqlx::query(
            "SELECT id, name, status, created_at, started_at, completed_at, inputs_json, outputs_json, metadata_json, error \
             FROM workflows",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::new();
        for row in rows {
            let mut state = Self::hydrate_workflow(&row)?;
            if let Some(status) = filter.status {
                if state.status != status {
                    continue;
                }
            }
            if let Some(name) = &filter.name {
                if &state.name != name {
                    continue;
                }
            }
            state.steps = self.hydrate_steps(&state.id).await?;
            result.push(state);
        }
        Ok(result)
    }

    async fn delete(&self, id: &str) -> StateStoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM steps WHERE workflow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn cleanup(&self, max_age_days: i64) -> StateStoreResult<u64> {
        let cutoff_at: DateTime<Utc> = cutoff(max_age_days);
        let terminal = [
            WorkflowStatus::Completed.to_string(),
            WorkflowStatus::Failed.to_string(),
            WorkflowStatus::Cancelled.to_string(),
        ];

        let rows = sqlx::query(
            "SELECT id FROM workflows WHERE status IN (?, ?, ?) AND completed_at IS NOT NULL AND completed_at <= ?",
        )
        .bind(&terminal[0])
        .bind(&terminal[1])
        .bind(&terminal[2])
        .bind(cutoff_at)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for row in rows {
            let id: String = row.get("id");
            sqlx::query("DELETE FROM steps WHERE workflow_id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM workflows WHERE id = ?")
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            removed += 1;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn health_check(&self) -> StateStoreResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateStoreError::Connection(format!("health check failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new(id, "test-workflow", HashMap::new())
    }

    #[tokio::test]
    async fn save_then_load_round_trips_all_fields() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let mut original = state("wf-1");
        original
            .steps
            .insert("s1".to_string(), StepState::new("s1", "s1", 3));

        store.save(&original).await.unwrap();
        let loaded = store.load("wf-1").await.unwrap();

        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.name, original.name);
        assert_eq!(loaded.status, original.status);
        assert_eq!(loaded.steps.len(), 1);
        assert!(loaded.steps.contains_key("s1"));
    }

    #[tokio::test]
    async fn load_missing_workflow_is_not_found() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        assert!(matches!(store.load("ghost").await, Err(StateStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_over_a_quiescent_store() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let mut s = state("wf-old");
        s.status = WorkflowStatus::Completed;
        s.completed_at = Some(cutoff(40));
        store.save(&s).await.unwrap();

        assert_eq!(store.cleanup(30).await.unwrap(), 1);
        assert_eq!(store.cleanup(30).await.unwrap(), 0);
        assert!(store.load("wf-old").await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_steps_too() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        let mut s = state("wf-1");
        s.steps.insert("s1".to_string(), StepState::new("s1", "s1", 3));
        store.save(&s).await.unwrap();

        store.delete("wf-1").await.unwrap();
        assert!(store.load("wf-1").await.is_err());
    }
}
