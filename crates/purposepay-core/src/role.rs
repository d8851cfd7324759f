//! Roles: an objective bound to exactly one capability.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilityRegistry};
use crate::error::ConfigurationError;

/// Immutable role descriptor.
///
/// The capability binding is fixed at construction; there is no way to add or
/// swap capabilities afterwards. Roles carry no mutable state and are shared
/// across stages and runs behind an `Arc`.
#[derive(Clone)]
pub struct Role {
    id: String,
    name: String,
    objective: String,
    capability: Arc<dyn Capability>,
}

impl Role {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        objective: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            objective: objective.into(),
            capability,
        }
    }

    /// Bind a role to a capability looked up by name in `registry`.
    pub fn bind(
        id: impl Into<String>,
        name: impl Into<String>,
        objective: impl Into<String>,
        registry: &CapabilityRegistry,
        capability: &str,
    ) -> Result<Self, ConfigurationError> {
        let capability = registry.resolve(capability)?;
        Ok(Self::new(id, name, objective, capability))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn capability(&self) -> &Arc<dyn Capability> {
        &self.capability
    }

    pub fn capability_name(&self) -> &str {
        &self.capability.spec().name
    }

    pub fn descriptor(&self) -> RoleDescriptor {
        RoleDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            objective: self.objective.clone(),
            capability: self.capability_name().to_string(),
        }
    }
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Role")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capability", &self.capability_name())
            .finish()
    }
}

/// Serializable snapshot of a role, used in run records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub id: String,
    pub name: String,
    pub objective: String,
    pub capability: String,
}
