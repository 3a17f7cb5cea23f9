// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Cloud provider abstraction for the CloudFlow workflow engine: the
//! provider trait (C1), its mock reference implementation (C2), provider
//! configuration, and a dependency-injected provider registry.

pub mod config;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use config::{ConfigError, ProviderConfig};
pub use error::ProviderError;
pub use mock::MockProvider;
pub use registry::ProviderRegistry;
pub use traits::{
    DeploymentFilter, LogLine, MetricSample, Provider, ProviderInfo, TypeDescriptor,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
