// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! A dependency-injected provider registry: an ordinary value rather than
//! class-level or global state. Callers build one at application startup
//! and pass it explicitly into whatever needs to resolve a provider by
//! name — nothing here is `static`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::traits::Provider;

type Factory = Arc<dyn Fn(&ProviderConfig) -> Arc<dyn Provider> + Send + Sync>;

/// Registered provider instance: the live object plus the config it was
/// built from (so `enabled`/`default` can be inspected without a second
/// lookup table).
struct Registered {
    provider: Arc<dyn Provider>,
    config: ProviderConfig,
}

/// Maps provider tags to constructors, and instance names to live providers.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Factory>,
    instances: HashMap<String, Registered>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider type under a short tag.
    pub fn register_type<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    /// Instantiate and register a provider instance from a config. Fails
    /// if the tag is unknown or the instance name is already taken.
    pub fn instantiate(&mut self, config: ProviderConfig) -> Result<(), ProviderError> {
        if self.instances.contains_key(&config.name) {
            return Err(ProviderError::Cloud(format!(
                "duplicate provider instance name: {}",
                config.name
            )));
        }
        let factory = self.factories.get(&config.provider_type).ok_or_else(|| {
            ProviderError::Cloud(format!("unknown provider type: {}", config.provider_type))
        })?;

        let provider = factory(&config);
        let is_default = config.default;
        let name = config.name.clone();

        self.instances.insert(name.clone(), Registered { provider, config });

        if is_default {
            self.default_name = Some(name);
        }
        Ok(())
    }

    /// Look up a live instance by name. Fails if the name is unknown or
    /// the instance is disabled.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let entry = self
            .instances
            .get(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        if !entry.config.enabled {
            return Err(ProviderError::Cloud(format!("provider '{name}' is disabled")));
        }
        Ok(entry.provider.clone())
    }

    /// The at-most-one default instance, if any is both configured and enabled.
    pub fn get_default(&self) -> Option<Arc<dyn Provider>> {
        self.default_name.as_deref().and_then(|n| self.get(n).ok())
    }

    pub fn config_for(&self, name: &str) -> Option<&ProviderConfig> {
        self.instances.get(name).map(|e| &e.config)
    }

    pub fn instance_names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn register_mock_type(registry: &mut ProviderRegistry) {
        registry.register_type("mock", |cfg| {
            Arc::new(MockProvider::new(cfg.name.clone())) as Arc<dyn Provider>
        });
    }

    #[test]
    fn instantiate_and_get_round_trips() {
        let mut registry = ProviderRegistry::new();
        register_mock_type(&mut registry);

        registry
            .instantiate(ProviderConfig::new("mock", "primary"))
            .unwrap();

        let provider = registry.get("primary").unwrap();
        assert_eq!(provider.tag(), "mock");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut registry = ProviderRegistry::new();
        let err = registry
            .instantiate(ProviderConfig::new("ghost", "primary"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cloud(_)));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = ProviderRegistry::new();
        register_mock_type(&mut registry);
        registry
            .instantiate(ProviderConfig::new("mock", "primary"))
            .unwrap();
        let err = registry
            .instantiate(ProviderConfig::new("mock", "primary"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cloud(_)));
    }

    #[test]
    fn disabled_instance_cannot_be_fetched() {
        let mut registry = ProviderRegistry::new();
        register_mock_type(&mut registry);
        let mut cfg = ProviderConfig::new("mock", "primary");
        cfg.enabled = false;
        registry.instantiate(cfg).unwrap();
        assert!(registry.get("primary").is_err());
    }

    #[test]
    fn setting_a_new_default_demotes_the_old_one() {
        let mut registry = ProviderRegistry::new();
        register_mock_type(&mut registry);

        let mut first = ProviderConfig::new("mock", "a");
        first.default = true;
        registry.instantiate(first).unwrap();
        assert_eq!(registry.get_default().unwrap().tag(), "mock");

        let mut second = ProviderConfig::new("mock", "b");
        second.default = true;
        registry.instantiate(second).unwrap();

        // the latest instantiate with default=true wins
        let default_provider = registry.get_default().unwrap();
        assert_eq!(default_provider.tag(), "mock");
        assert_eq!(registry.config_for("b").unwrap().name, "b");
    }
}
