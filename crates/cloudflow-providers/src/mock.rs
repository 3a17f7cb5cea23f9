// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The mock provider: an in-memory reference implementation, authoritative
//! for testing engine semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use cloudflow_domain::{DeploymentStatus, ResourceStatus};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::traits::{
    DeploymentFilter, LogLine, MetricSample, Provider, ProviderInfo, TypeDescriptor,
};

/// How long the background task waits before flipping a deployment from
/// "creating" to "running". Kept short (unlike the 5s sleep in the source
/// material) so it doesn't slow down the test suite; this is a simulated
/// backend, not a real one.
const SIMULATED_DEPLOY_DELAY: Duration = Duration::from_millis(20);
const SIMULATED_OPERATION_DELAY: Duration = Duration::from_millis(10);

struct StoredDeployment {
    status: DeploymentStatus,
    template: Value,
}

/// In-memory cloud provider used for tests and local demos.
pub struct MockProvider {
    name: String,
    connected: AtomicBool,
    deployments: Arc<DashMap<String, StoredDeployment>>,
    logs: DashMap<String, Vec<LogLine>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            deployments: Arc::new(DashMap::new()),
            logs: DashMap::new(),
        }
    }

    fn check_connection(&self) -> Result<(), ProviderError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Connection(format!(
                "provider '{}' is not connected",
                self.name
            )))
        }
    }

    fn append_log(&self, deployment_id: &str, resource_id: Option<String>, message: impl Into<String>) {
        self.logs.entry(deployment_id.to_string()).or_default().push(LogLine {
            timestamp: Utc::now(),
            resource_id,
            message: message.into(),
        });
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn tag(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.connected.store(true, Ordering::SeqCst);
        debug!(provider = %self.name, "connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!(provider = %self.name, "disconnected");
    }

    async fn validate_connection(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, template, inputs), fields(provider = %self.name))]
    async fn create_deployment(
        &self,
        name: &str,
        template: &Value,
        inputs: &HashMap<String, Value>,
    ) -> Result<String, ProviderError> {
        self.check_connection()?;

        let errors = self.validate_template(template);
        if !errors.is_empty() {
            return Err(ProviderError::Deployment(errors.join("; ")));
        }

        let deployment_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let nodes = template
            .get("nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let resources = nodes
            .iter()
            .map(|node| ResourceStatus {
                id: Uuid::new_v4().to_string(),
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed")
                    .to_string(),
                state: "creating".to_string(),
                created_at: now,
                updated_at: now,
            })
            .collect();

        let status = DeploymentStatus {
            id: deployment_id.clone(),
            name: name.to_string(),
            state: "creating".to_string(),
            created_at: now,
            updated_at: now,
            resources,
        };

        self.deployments.insert(
            deployment_id.clone(),
            StoredDeployment {
                status,
                template: template.clone(),
            },
        );
        self.append_log(&deployment_id, None, format!("create_deployment requested, inputs={inputs:?}"));

        // Simulate asynchronous provisioning, mirroring the background
        // task the source material spawns after returning the id.
        let deployments = Arc::clone(&self.deployments);
        let id_for_task = deployment_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SIMULATED_DEPLOY_DELAY).await;
            if let Some(mut entry) = deployments.get_mut(&id_for_task) {
                entry.status.state = "running".to_string();
                entry.status.updated_at = Utc::now();
                for resource in &mut entry.status.resources {
                    resource.state = "running".to_string();
                    resource.updated_at = Utc::now();
                }
            }
        });

        Ok(deployment_id)
    }

    async fn delete_deployment(&self, deployment_id: &str) -> Result<(), ProviderError> {
        self.check_connection()?;
        // Idempotent: a second delete of an already-gone deployment still
        // succeeds (spec §9 overrides the source's inconsistent behavior).
        self.deployments.remove(deployment_id);
        self.logs.remove(deployment_id);
        Ok(())
    }

    async fn get_deployment_status(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentStatus, ProviderError> {
        self.check_connection()?;
        self.deployments
            .get(deployment_id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| ProviderError::NotFound(deployment_id.to_string()))
    }

    async fn list_deployments(
        &self,
        filters: &DeploymentFilter,
    ) -> Result<Vec<DeploymentStatus>, ProviderError> {
        self.check_connection()?;
        let matches = self
            .deployments
            .iter()
            .map(|entry| entry.status.clone())
            .filter(|status| {
                filters
                    .state
                    .as_ref()
                    .map(|s| &status.state == s)
                    .unwrap_or(true)
            })
            .filter(|status| {
                filters
                    .name_contains
                    .as_ref()
                    .map(|needle| status.name.contains(needle.as_str()))
                    .unwrap_or(true)
            })
            .collect();
        Ok(matches)
    }

    async fn update_deployment(
        &self,
        deployment_id: &str,
        template: &Value,
        inputs: &HashMap<String, Value>,
    ) -> Result<(), ProviderError> {
        self.check_connection()?;
        let errors = self.validate_template(template);
        if !errors.is_empty() {
            return Err(ProviderError::Deployment(errors.join("; ")));
        }
        let mut entry = self
            .deployments
            .get_mut(deployment_id)
            .ok_or_else(|| ProviderError::NotFound(deployment_id.to_string()))?;
        entry.template = template.clone();
        entry.status.updated_at = Utc::now();
        drop(entry);
        self.append_log(deployment_id, None, format!("update_deployment, inputs={inputs:?}"));
        Ok(())
    }

    #[instrument(skip(self, inputs), fields(provider = %self.name))]
    async fn execute_operation(
        &self,
        deployment_id: &str,
        operation: &str,
        inputs: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ProviderError> {
        self.check_connection()?;
        {
            let entry = self
                .deployments
                .get(deployment_id)
                .ok_or_else(|| ProviderError::NotFound(deployment_id.to_string()))?;
            if entry.status.state != "running" {
                return Err(ProviderError::Operation(format!(
                    "deployment {deployment_id} is not running (state={})",
                    entry.status.state
                )));
            }
        }

        tokio::time::sleep(SIMULATED_OPERATION_DELAY).await;
        self.append_log(
            deployment_id,
            None,
            format!("executed operation '{operation}' with inputs={inputs:?}"),
        );

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::String("success".to_string()));
        result.insert("operation".to_string(), Value::String(operation.to_string()));
        Ok(result)
    }

    async fn get_logs(
        &self,
        deployment_id: &str,
        resource_id: Option<&str>,
        since: Option<SystemTime>,
    ) -> Result<Vec<LogLine>, ProviderError> {
        self.check_connection()?;
        if !self.deployments.contains_key(deployment_id) {
            return Err(ProviderError::NotFound(deployment_id.to_string()));
        }
        let since_dt = since.map(chrono::DateTime::<Utc>::from);
        let lines = self
            .logs
            .get(deployment_id)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|line| {
                        resource_id
                            .map(|rid| line.resource_id.as_deref() == Some(rid))
                            .unwrap_or(true)
                    })
                    .filter(|line| since_dt.map(|cutoff| line.timestamp >= cutoff).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(lines)
    }

    async fn get_metrics(
        &self,
        deployment_id: &str,
        _resource_id: Option<&str>,
        names: &[String],
        _since: Option<SystemTime>,
    ) -> Result<HashMap<String, Vec<MetricSample>>, ProviderError> {
        self.check_connection()?;
        if !self.deployments.contains_key(deployment_id) {
            return Err(ProviderError::NotFound(deployment_id.to_string()));
        }
        let now = Utc::now();
        let canned = |value: f64| {
            vec![
                MetricSample { timestamp: now, value },
                MetricSample { timestamp: now, value: value * 1.05 },
            ]
        };
        let catalog: HashMap<&str, f64> =
            HashMap::from([("cpu_usage", 12.5), ("memory_usage", 256.0), ("disk_usage", 10.2)]);

        let wanted: Vec<&str> = if names.is_empty() {
            catalog.keys().copied().collect()
        } else {
            names.iter().map(String::as_str).collect()
        };

        let mut out = HashMap::new();
        for metric in wanted {
            if let Some(value) = catalog.get(metric) {
                out.insert(metric.to_string(), canned(*value));
            }
        }
        Ok(out)
    }

    fn validate_template(&self, template: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        match template.get("nodes") {
            None => errors.push("template is missing a 'nodes' field".to_string()),
            Some(Value::Array(nodes)) => {
                for (idx, node) in nodes.iter().enumerate() {
                    if node.get("name").and_then(Value::as_str).is_none() {
                        errors.push(format!("node[{idx}] is missing a string 'name'"));
                    }
                    if node.get("type").and_then(Value::as_str).is_none() {
                        errors.push(format!("node[{idx}] is missing a string 'type'"));
                    }
                }
            }
            Some(_) => errors.push("'nodes' must be an array".to_string()),
        }
        errors
    }

    async fn get_resource_types(&self) -> Result<Vec<TypeDescriptor>, ProviderError> {
        self.check_connection()?;
        Ok(vec![
            TypeDescriptor { name: "compute".to_string(), description: "a compute instance".to_string() },
            TypeDescriptor { name: "network".to_string(), description: "a network interface".to_string() },
            TypeDescriptor { name: "storage".to_string(), description: "a storage volume".to_string() },
        ])
    }

    async fn get_operation_types(&self) -> Result<Vec<TypeDescriptor>, ProviderError> {
        self.check_connection()?;
        Ok(vec![
            TypeDescriptor { name: "start".to_string(), description: "start a resource".to_string() },
            TypeDescriptor { name: "stop".to_string(), description: "stop a resource".to_string() },
            TypeDescriptor { name: "restart".to_string(), description: "restart a resource".to_string() },
        ])
    }

    async fn get_provider_info(&self) -> Result<ProviderInfo, ProviderError> {
        self.check_connection()?;
        Ok(ProviderInfo {
            tag: "mock".to_string(),
            version: "1.0.0".to_string(),
            description: "in-memory reference provider".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Value {
        json!({"nodes": [{"name": "web", "type": "compute"}, {"name": "db", "type": "compute"}]})
    }

    async fn connected_provider() -> MockProvider {
        let provider = MockProvider::new("test");
        provider.connect().await.unwrap();
        provider
    }

    #[tokio::test]
    async fn create_then_status_transitions_to_running() {
        let provider = connected_provider().await;
        let id = provider
            .create_deployment("app", &template(), &HashMap::new())
            .await
            .unwrap();

        let status = provider.get_deployment_status(&id).await.unwrap();
        assert_eq!(status.state, "creating");

        tokio::time::sleep(SIMULATED_DEPLOY_DELAY * 3).await;
        let status = provider.get_deployment_status(&id).await.unwrap();
        assert_eq!(status.state, "running");
        assert!(status.resources.iter().all(|r| r.state == "running"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let provider = connected_provider().await;
        let id = provider
            .create_deployment("app", &template(), &HashMap::new())
            .await
            .unwrap();

        provider.delete_deployment(&id).await.unwrap();
        provider.delete_deployment(&id).await.unwrap();
    }

    #[tokio::test]
    async fn operations_require_running_state() {
        let provider = connected_provider().await;
        let id = provider
            .create_deployment("app", &template(), &HashMap::new())
            .await
            .unwrap();

        let err = provider
            .execute_operation(&id, "start", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Operation(_)));

        tokio::time::sleep(SIMULATED_DEPLOY_DELAY * 3).await;
        let result = provider
            .execute_operation(&id, "start", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.get("status").unwrap(), "success");
    }

    #[tokio::test]
    async fn calls_require_connection() {
        let provider = MockProvider::new("test");
        let err = provider
            .create_deployment("app", &template(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Connection(_)));
    }

    #[test]
    fn validate_template_rejects_missing_nodes() {
        let provider = MockProvider::new("test");
        let errors = provider.validate_template(&json!({}));
        assert_eq!(errors.len(), 1);
    }
}
