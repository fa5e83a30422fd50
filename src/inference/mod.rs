//! Inference module: model registry, prediction, and rendering
//!
//! This module provides:
//! - A registry that loads the central and client checkpoints once per session
//! - Single forward-pass prediction with softmax, argmax and confidence
//! - A per-image report covering every loaded model
//! - A terminal grid renderer for the report

pub mod predictor;
pub mod registry;
pub mod render;

// Re-export main types for convenience
pub use predictor::{DiagnosisReport, PredictionResult, Predictor};
pub use registry::{
    LoadedModel, ModelRegistry, ModelSlot, RegistryConfig, SkipReason, SkippedModel, SlotStatus,
    DEFAULT_MODELS_DIR,
};
pub use render::{render_grid, render_report, GRID_COLUMNS};
