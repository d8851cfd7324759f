//! In-memory capability registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConfigurationError;

use super::Capability;

/// Name-indexed set of capabilities.
///
/// Built once, then shared behind an `Arc` by every run; nothing mutates it
/// after construction.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<(), ConfigurationError> {
        let name = capability.spec().name.clone();
        if self.capabilities.contains_key(&name) {
            return Err(ConfigurationError::DuplicateCapability { name });
        }
        self.capabilities.insert(name, capability);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Like [`get`](Self::get), failing with `UnknownCapability`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, ConfigurationError> {
        self.get(name)
            .ok_or_else(|| ConfigurationError::UnknownCapability {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityInput, CapabilitySpec, EffectClass, InputSchema};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Named(CapabilitySpec);

    #[async_trait]
    impl Capability for Named {
        fn spec(&self) -> &CapabilitySpec {
            &self.0
        }

        async fn call(&self, _input: &CapabilityInput) -> Result<Value, String> {
            Ok(json!({}))
        }
    }

    fn named(name: &str) -> Arc<dyn Capability> {
        Arc::new(Named(CapabilitySpec {
            name: name.to_string(),
            description: String::new(),
            input_schema: InputSchema::default(),
            effect: EffectClass::SideEffectFree,
        }))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut reg = CapabilityRegistry::new();
        reg.register(named("b")).unwrap();
        reg.register(named("a")).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.names(), vec!["a", "b"]);
        assert!(reg.resolve("a").is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = CapabilityRegistry::new();
        reg.register(named("pay")).unwrap();
        let err = reg.register(named("pay")).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateCapability {
                name: "pay".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_unknown() {
        let reg = CapabilityRegistry::new();
        assert!(reg.is_empty());
        assert!(matches!(
            reg.resolve("ghost"),
            Err(ConfigurationError::UnknownCapability { .. })
        ));
    }
}
