//! Server state management

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use xray_fed::backend::{default_device, DefaultBackend};
use xray_fed::inference::{ModelRegistry, RegistryConfig, SlotStatus};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Checkpoint directory and the slots to serve
    pub registry: RegistryConfig,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Models loaded at startup; the lock serializes inference requests
    registry: Mutex<ModelRegistry<DefaultBackend>>,
    /// Slot listing captured at startup
    status: Vec<SlotStatus>,
    models_loaded: usize,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    /// Load the configured checkpoint slots
    pub fn load(config: ServerConfig) -> Self {
        let registry = ModelRegistry::load(&config.registry, &default_device());
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: ServerConfig, registry: ModelRegistry<DefaultBackend>) -> Self {
        Self {
            config,
            status: registry.status(),
            models_loaded: registry.len(),
            registry: Mutex::new(registry),
            started_at: Instant::now(),
        }
    }

    /// Exclusive access to the models for one inference pass
    pub fn registry(&self) -> Result<MutexGuard<'_, ModelRegistry<DefaultBackend>>, String> {
        self.registry
            .lock()
            .map_err(|_| "model registry lock poisoned".to_string())
    }

    pub fn status(&self) -> &[SlotStatus] {
        &self.status
    }

    pub fn models_loaded(&self) -> usize {
        self.models_loaded
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
