//! Kernel configuration
//!
//! Table sizes and quota ceilings are fixed for the lifetime of a kernel.
//! They are read once, from defaults or JSON, and never change afterwards.

use crate::address_space::DEFAULT_PHYSICAL_PAGES;
use crate::audit::DEFAULT_AUDIT_CAPACITY;
use ipc::DEFAULT_ENDPOINT_CAPACITY;
use resources::QuotaCeilings;
use serde::{Deserialize, Serialize};
use services_registry::DEFAULT_REGISTRY_CAPACITY;
use shared_memory::DEFAULT_SHM_CAPACITY;
use thiserror::Error;

/// Configuration for a [`SimulatedKernel`](crate::SimulatedKernel)
///
/// Missing JSON fields take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Per-process ceilings
    pub quotas: QuotaCeilings,
    /// Endpoint table slots
    pub endpoint_capacity: usize,
    /// Service registry slots
    pub registry_capacity: usize,
    /// Shared-memory region slots
    pub shm_capacity: usize,
    /// Physical frame pool size, in pages
    pub physical_pages: u64,
    /// Events each audit log retains; zero disables auditing
    pub audit_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            quotas: QuotaCeilings::default(),
            endpoint_capacity: DEFAULT_ENDPOINT_CAPACITY,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            shm_capacity: DEFAULT_SHM_CAPACITY,
            physical_pages: DEFAULT_PHYSICAL_PAGES,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl KernelConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects configurations that could never boot a process
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quotas.threads == 0 {
            return Err(ConfigError::Invalid(
                "thread ceiling must allow the initial thread".into(),
            ));
        }
        if self.endpoint_capacity == 0 || self.registry_capacity == 0 || self.shm_capacity == 0 {
            return Err(ConfigError::Invalid("table capacities must be non-zero".into()));
        }
        Ok(())
    }

    pub fn with_quotas(mut self, quotas: QuotaCeilings) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_endpoint_capacity(mut self, capacity: usize) -> Self {
        self.endpoint_capacity = capacity;
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn with_shm_capacity(mut self, capacity: usize) -> Self {
        self.shm_capacity = capacity;
        self
    }

    pub fn with_physical_pages(mut self, pages: u64) -> Self {
        self.physical_pages = pages;
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity;
        self
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
