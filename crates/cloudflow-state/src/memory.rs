// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! A `DashMap`-backed `StateStore`. Each `save` is a single map insert,
//! which `DashMap` already performs atomically with respect to concurrent
//! readers.

use async_trait::async_trait;
use cloudflow_domain::WorkflowState;
use dashmap::DashMap;

use crate::traits::{cutoff, StateFilter, StateStore, StateStoreError, StateStoreResult};

#[derive(Default)]
pub struct InMemoryStateStore {
    states: DashMap<String, WorkflowState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &WorkflowState) -> StateStoreResult<()> {
        self.states.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> StateStoreResult<WorkflowState> {
        self.states
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StateStoreError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &StateFilter) -> StateStoreResult<Vec<WorkflowState>> {
        let matches = self
            .states
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|state| filter.status.map(|s| s == state.status).unwrap_or(true))
            .filter(|state| {
                filter
                    .name
                    .as_ref()
                    .map(|name| &state.name == name)
                    .unwrap_or(true)
            })
            .collect();
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> StateStoreResult<()> {
        self.states.remove(id);
        Ok(())
    }

    async fn cleanup(&self, max_age_days: i64) -> StateStoreResult<u64> {
        let cutoff_at = cutoff(max_age_days);
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|entry| {
                entry.status.is_terminal()
                    && entry.completed_at.map(|t| t <= cutoff_at).unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale {
            self.states.remove(id);
        }
        Ok(stale.len() as u64)
    }

    async fn health_check(&self) -> StateStoreResult<()> {
        Ok(())
    }
}
