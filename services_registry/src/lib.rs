//! # Service Registry
//!
//! This crate implements name-based service discovery for the kernel core.
//!
//! ## Philosophy
//!
//! Services advertise an endpoint under a short ASCII name; clients resolve
//! the name once and then talk to the endpoint directly.
//!
//! - **Fixed capacity**: the table never grows; a new name on a full table
//!   fails without touching existing entries
//! - **Last write wins**: registering an existing name rebinds it in place,
//!   even when the table is full
//! - **Lookups are free**: no quota is charged and nothing is mutated

use core_types::{EndpointId, ProcessId, ServiceName};
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of registry slots
pub const DEFAULT_REGISTRY_CAPACITY: usize = 4;

/// Error types for registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot holds a different name
    #[error("Service registry full ({capacity} names)")]
    Full { capacity: usize },

    /// Service name not found
    #[error("Service not found: {0}")]
    NotFound(ServiceName),
}

impl From<RegistryError> for KernelError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Full { .. } => KernelError::CapacityExhausted(err.to_string()),
            RegistryError::NotFound(name) => KernelError::NotFound(name.to_string()),
        }
    }
}

/// A registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: ServiceName,
    pub endpoint: EndpointId,
    pub registered_by: ProcessId,
}

/// What a successful registration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The name took a free slot
    Inserted,
    /// The name was already bound; `previous` is the endpoint it replaced
    Replaced { previous: EndpointId },
}

/// Service registry
///
/// A fixed array of slots searched linearly. Callers hold it behind their
/// own lock; every method is a single mutation of that array.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    slots: Vec<Option<ServiceEntry>>,
}

impl ServiceRegistry {
    /// Creates a registry with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }

    /// Creates a registry with `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Binds `name` to `endpoint`
    pub fn register(
        &mut self,
        name: ServiceName,
        endpoint: EndpointId,
        registered_by: ProcessId,
    ) -> Result<RegisterOutcome, RegistryError> {
        let entry = ServiceEntry {
            name,
            endpoint,
            registered_by,
        };

        if let Some(existing) = self.slots.iter_mut().flatten().find(|e| e.name == name) {
            let previous = existing.endpoint;
            *existing = entry;
            log::debug!("service '{}' rebound {} -> {}", name, previous, endpoint);
            return Ok(RegisterOutcome::Replaced { previous });
        }

        let capacity = self.slots.len();
        let free = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(RegistryError::Full { capacity })?;
        *free = Some(entry);
        log::debug!("service '{}' bound to {}", name, endpoint);
        Ok(RegisterOutcome::Inserted)
    }

    /// Looks up a service
    pub fn lookup(&self, name: &ServiceName) -> Result<EndpointId, RegistryError> {
        self.entry(name)
            .map(|entry| entry.endpoint)
            .ok_or(RegistryError::NotFound(*name))
    }

    /// Returns the full entry for a name
    pub fn entry(&self, name: &ServiceName) -> Option<&ServiceEntry> {
        self.slots.iter().flatten().find(|entry| entry.name == *name)
    }

    /// Lists all entries
    pub fn entries(&self) -> Vec<ServiceEntry> {
        self.slots.iter().flatten().copied().collect()
    }

    /// Removes every name bound to a destroyed endpoint
    ///
    /// Returns the names that were removed.
    pub fn unbind_endpoint(&mut self, endpoint: EndpointId) -> Vec<ServiceName> {
        let mut removed = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.is_some_and(|entry| entry.endpoint == endpoint) {
                if let Some(entry) = slot.take() {
                    removed.push(entry.name);
                }
            }
        }
        removed
    }

    /// Returns the number of registered services
    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::ErrorClass;

    const PID: ProcessId = ProcessId::new(1);

    fn name(s: &str) -> ServiceName {
        ServiceName::new(s).unwrap()
    }

    #[test]
    fn test_registry_creation() {
        let registry = ServiceRegistry::new();
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.capacity(), 4);
    }

    #[test]
    fn test_service_registration() {
        let mut registry = ServiceRegistry::new();
        let outcome = registry
            .register(name("console"), EndpointId::new(1), PID)
            .unwrap();

        assert_eq!(outcome, RegisterOutcome::Inserted);
        assert_eq!(registry.lookup(&name("console")), Ok(EndpointId::new(1)));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(name("vfs"), EndpointId::new(1), PID)
            .unwrap();
        let outcome = registry
            .register(name("vfs"), EndpointId::new(2), ProcessId::new(2))
            .unwrap();

        assert_eq!(
            outcome,
            RegisterOutcome::Replaced {
                previous: EndpointId::new(1)
            }
        );
        assert_eq!(registry.lookup(&name("vfs")), Ok(EndpointId::new(2)));
        assert_eq!(registry.count(), 1);
        assert_eq!(
            registry.entry(&name("vfs")).map(|e| e.registered_by),
            Some(ProcessId::new(2))
        );
    }

    #[test]
    fn test_full_registry_rejects_new_name_only() {
        let mut registry = ServiceRegistry::new();
        for (i, svc) in ["a", "b", "c", "d"].iter().enumerate() {
            registry
                .register(name(svc), EndpointId::new(i as u32 + 1), PID)
                .unwrap();
        }

        let before = registry.entries();
        let result = registry.register(name("e"), EndpointId::new(9), PID);
        assert_eq!(result, Err(RegistryError::Full { capacity: 4 }));
        assert_eq!(registry.entries(), before);

        // Overwrite still works on a full table
        assert!(registry
            .register(name("c"), EndpointId::new(9), PID)
            .is_ok());
        assert_eq!(registry.lookup(&name("c")), Ok(EndpointId::new(9)));
    }

    #[test]
    fn test_service_not_found() {
        let registry = ServiceRegistry::new();
        let result = registry.lookup(&name("missing"));
        assert_eq!(result, Err(RegistryError::NotFound(name("missing"))));
    }

    #[test]
    fn test_unbind_endpoint() {
        let mut registry = ServiceRegistry::new();
        registry.register(name("a"), EndpointId::new(1), PID).unwrap();
        registry.register(name("b"), EndpointId::new(2), PID).unwrap();
        registry.register(name("c"), EndpointId::new(1), PID).unwrap();

        let removed = registry.unbind_endpoint(EndpointId::new(1));
        assert_eq!(removed, vec![name("a"), name("c")]);
        assert_eq!(registry.count(), 1);
        assert!(registry.lookup(&name("a")).is_err());

        // Freed slots are reusable
        registry.register(name("d"), EndpointId::new(3), PID).unwrap();
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn test_error_conversion() {
        let full: KernelError = RegistryError::Full { capacity: 4 }.into();
        assert_eq!(full.class(), ErrorClass::Capacity);
        let missing: KernelError = RegistryError::NotFound(name("x")).into();
        assert_eq!(missing.class(), ErrorClass::NotFound);
    }
}
