// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The provider trait: a uniform contract for deployment, operation, and
//! observation calls against a cloud backend, expressed as an
//! object-safe `async_trait`.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use cloudflow_domain::DeploymentStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// Filters accepted by [`Provider::list_deployments`].
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub state: Option<String>,
    pub name_contains: Option<String>,
}

/// One annotated log line returned by [`Provider::get_logs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub resource_id: Option<String>,
    pub message: String,
}

/// One metric sample returned by [`Provider::get_metrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub value: f64,
}

/// Static descriptor of a resource or operation type a provider supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub description: String,
}

/// Static descriptor returned by [`Provider::get_provider_info`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub tag: String,
    pub version: String,
    pub description: String,
}

/// A cloud backend capable of materializing and operating on deployments.
///
/// `validate_template` is pure and never fails; `disconnect` and
/// `validate_connection` never fail either — their contract is to report,
/// not to raise.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short registered tag, e.g. `"mock"`, `"k8s"`.
    fn tag(&self) -> &str;

    async fn connect(&self) -> Result<(), ProviderError>;

    async fn disconnect(&self);

    async fn validate_connection(&self) -> bool;

    async fn create_deployment(
        &self,
        name: &str,
        template: &Value,
        inputs: &HashMap<String, Value>,
    ) -> Result<String, ProviderError>;

    /// Idempotent: deleting an already-absent deployment succeeds silently
    /// rather than surfacing a `NotFound` error to the caller.
    async fn delete_deployment(&self, deployment_id: &str) -> Result<(), ProviderError>;

    async fn get_deployment_status(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentStatus, ProviderError>;

    async fn list_deployments(
        &self,
        filters: &DeploymentFilter,
    ) -> Result<Vec<DeploymentStatus>, ProviderError>;

    async fn update_deployment(
        &self,
        deployment_id: &str,
        template: &Value,
        inputs: &HashMap<String, Value>,
    ) -> Result<(), ProviderError>;

    async fn execute_operation(
        &self,
        deployment_id: &str,
        operation: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ProviderError>;

    async fn get_logs(
        &self,
        deployment_id: &str,
        resource_id: Option<&str>,
        since: Option<SystemTime>,
    ) -> Result<Vec<LogLine>, ProviderError>;

    async fn get_metrics(
        &self,
        deployment_id: &str,
        resource_id: Option<&str>,
        names: &[String],
        since: Option<SystemTime>,
    ) -> Result<HashMap<String, Vec<MetricSample>>, ProviderError>;

    /// Pure structural check; empty result means the template is valid.
    /// Called by the engine before every create/update; a non-empty
    /// result becomes a `DeploymentError` without attempting the call.
    fn validate_template(&self, template: &Value) -> Vec<String>;

    async fn get_resource_types(&self) -> Result<Vec<TypeDescriptor>, ProviderError>;

    async fn get_operation_types(&self) -> Result<Vec<TypeDescriptor>, ProviderError>;

    async fn get_provider_info(&self) -> Result<ProviderInfo, ProviderError>;
}
