// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Provider configuration: type tag, instance name, and connection tuning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("provider type must not be empty")]
    EmptyType,
    #[error("provider name must not be empty")]
    EmptyName,
    #[error("timeout must be greater than zero")]
    NonPositiveTimeout,
    #[error("retry_count must be >= 0")]
    NegativeRetryCount,
    #[error("retry_interval must be greater than zero")]
    NonPositiveRetryInterval,
}

/// One provider instance's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registered provider tag (required).
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Unique instance name (required).
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

fn default_enabled() -> bool {
    true
}
fn default_timeout() -> u64 {
    300
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_interval() -> u64 {
    5
}

impl ProviderConfig {
    pub fn new(provider_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            name: name.into(),
            enabled: default_enabled(),
            default: false,
            timeout_secs: default_timeout(),
            retry_count: default_retry_count(),
            retry_interval_secs: default_retry_interval(),
            properties: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_type.is_empty() {
            return Err(ConfigError::EmptyType);
        }
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::NonPositiveTimeout);
        }
        if self.retry_interval_secs == 0 {
            return Err(ConfigError::NonPositiveRetryInterval);
        }
        Ok(())
    }
}
