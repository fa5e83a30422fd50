//! Model registry
//!
//! Loads the centralized checkpoint and the per-hospital client checkpoints
//! once, skipping (with a log message) any that are missing or unreadable.
//! The loaded set is read-only afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::model::{load_classifier, resolve_checkpoint, MedicalClassifier, MedicalClassifierConfig};
use crate::utils::error::{Result, XrayError};
use crate::NUM_CLIENTS;

/// Default directory holding the checkpoint files
pub const DEFAULT_MODELS_DIR: &str = "saved_models";

/// Named position a checkpoint can occupy
///
/// Written as `central` or `client_<n>` in configuration files and on the
/// command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelSlot {
    /// The centrally-trained model
    Central,
    /// A hospital model, numbered from 1
    Client(u8),
}

impl ModelSlot {
    /// Every slot in display order: central first, then clients 1..=5
    pub fn all() -> Vec<ModelSlot> {
        std::iter::once(ModelSlot::Central)
            .chain((1..=NUM_CLIENTS).map(ModelSlot::Client))
            .collect()
    }

    /// File name of the checkpoint without extension
    pub fn checkpoint_stem(&self) -> String {
        match self {
            ModelSlot::Central => "central_model".to_string(),
            ModelSlot::Client(n) => format!("client_{}_model", n),
        }
    }

    /// Name shown next to this slot's prediction
    pub fn display_name(&self) -> String {
        match self {
            ModelSlot::Central => "Centralized Model".to_string(),
            ModelSlot::Client(n) => format!("Hospital {} Model", n),
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSlot::Central => write!(f, "central"),
            ModelSlot::Client(n) => write!(f, "client_{}", n),
        }
    }
}

impl FromStr for ModelSlot {
    type Err = XrayError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "central" {
            return Ok(ModelSlot::Central);
        }

        s.strip_prefix("client_")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=NUM_CLIENTS).contains(n))
            .map(ModelSlot::Client)
            .ok_or_else(|| {
                XrayError::Config(format!(
                    "unknown model slot '{}' (expected central or client_1..client_{})",
                    s, NUM_CLIENTS
                ))
            })
    }
}

impl TryFrom<String> for ModelSlot {
    type Error = XrayError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ModelSlot> for String {
    fn from(slot: ModelSlot) -> Self {
        slot.to_string()
    }
}

/// Which checkpoints to load and from where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding `central_model.*` and `client_<n>_model.*`
    pub models_dir: PathBuf,
    /// Slots to load, in display order
    pub slots: Vec<ModelSlot>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            slots: ModelSlot::all(),
        }
    }
}

impl RegistryConfig {
    /// Load every slot from the given directory
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            ..Default::default()
        }
    }

    /// Restrict loading to the given slots
    pub fn with_slots(mut self, slots: Vec<ModelSlot>) -> Self {
        self.slots = slots;
        self
    }
}

/// Why a slot has no model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// No checkpoint file exists for the slot
    Missing,
    /// A checkpoint exists but failed to deserialize
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Missing => write!(f, "checkpoint not found"),
            SkipReason::Unreadable(msg) => write!(f, "checkpoint unreadable: {}", msg),
        }
    }
}

/// A slot that was not loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedModel {
    pub slot: ModelSlot,
    pub name: String,
    pub reason: SkipReason,
}

/// Load state of one slot, for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot: ModelSlot,
    pub name: String,
    pub path: Option<PathBuf>,
    pub loaded: bool,
    pub reason: Option<SkipReason>,
}

/// A successfully loaded checkpoint
#[derive(Debug)]
pub struct LoadedModel<B: Backend> {
    pub slot: ModelSlot,
    pub name: String,
    pub path: PathBuf,
    pub model: MedicalClassifier<B>,
}

/// The session's set of loaded models, in display order
#[derive(Debug)]
pub struct ModelRegistry<B: Backend> {
    models_dir: PathBuf,
    slots: Vec<ModelSlot>,
    models: Vec<LoadedModel<B>>,
    skipped: Vec<SkippedModel>,
}

impl<B: Backend> ModelRegistry<B> {
    /// Load every configured slot
    ///
    /// Never fails: absent or unreadable checkpoints are logged and recorded
    /// in [`skipped`](Self::skipped).
    pub fn load(config: &RegistryConfig, device: &B::Device) -> Self {
        let architecture = MedicalClassifierConfig::new();
        let mut registry = Self {
            models_dir: config.models_dir.clone(),
            slots: config.slots.clone(),
            models: Vec::new(),
            skipped: Vec::new(),
        };

        for &slot in &config.slots {
            let name = slot.display_name();

            let Some(path) = resolve_checkpoint(&config.models_dir, &slot.checkpoint_stem()) else {
                match slot {
                    ModelSlot::Central => {
                        error!("Central model not found in {}", config.models_dir.display())
                    }
                    ModelSlot::Client(n) => warn!("Client {} model not found.", n),
                }
                registry.skipped.push(SkippedModel {
                    slot,
                    name,
                    reason: SkipReason::Missing,
                });
                continue;
            };

            match load_classifier::<B>(&path, &architecture, device) {
                Ok(model) => {
                    info!("Loaded {} from {}", name, path.display());
                    registry.models.push(LoadedModel {
                        slot,
                        name,
                        path,
                        model,
                    });
                }
                Err(e) => {
                    error!("{}", e);
                    registry.skipped.push(SkippedModel {
                        slot,
                        name,
                        reason: SkipReason::Unreadable(e.to_string()),
                    });
                }
            }
        }

        info!(
            "{} of {} models loaded from {}",
            registry.models.len(),
            config.slots.len(),
            config.models_dir.display()
        );

        registry
    }

    /// Build a registry from already constructed models
    pub fn from_models(models_dir: impl Into<PathBuf>, models: Vec<LoadedModel<B>>) -> Self {
        Self {
            models_dir: models_dir.into(),
            slots: models.iter().map(|m| m.slot).collect(),
            models,
            skipped: Vec::new(),
        }
    }

    /// Directory the checkpoints were read from
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Number of loaded models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model was loaded
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Loaded models in display order
    pub fn iter(&self) -> impl Iterator<Item = &LoadedModel<B>> {
        self.models.iter()
    }

    /// Look up a loaded model by slot
    pub fn get(&self, slot: ModelSlot) -> Option<&LoadedModel<B>> {
        self.models.iter().find(|m| m.slot == slot)
    }

    /// Slots that were configured but not loaded
    pub fn skipped(&self) -> &[SkippedModel] {
        &self.skipped
    }

    /// Configured slots in display order
    pub fn slots(&self) -> &[ModelSlot] {
        &self.slots
    }

    /// Per-slot load state, in display order
    pub fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .map(|&slot| {
                if let Some(loaded) = self.get(slot) {
                    SlotStatus {
                        slot,
                        name: loaded.name.clone(),
                        path: Some(loaded.path.clone()),
                        loaded: true,
                        reason: None,
                    }
                } else {
                    let reason = self
                        .skipped
                        .iter()
                        .find(|s| s.slot == slot)
                        .map(|s| s.reason.clone());
                    SlotStatus {
                        slot,
                        name: slot.display_name(),
                        path: resolve_checkpoint(&self.models_dir, &slot.checkpoint_stem()),
                        loaded: false,
                        reason,
                    }
                }
            })
            .collect()
    }
}
