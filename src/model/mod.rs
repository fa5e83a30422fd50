//! Model module for the chest X-ray classifier
//!
//! This module provides:
//! - The ResNet-18 architecture with a two-class head
//! - Checkpoint loading (PyTorch `.pth` and Burn `.mpk`) and saving

pub mod checkpoint;
pub mod resnet;

// Re-export main types for convenience
pub use checkpoint::{load_classifier, resolve_checkpoint, save_classifier, CheckpointFormat};
pub use resnet::{MedicalClassifier, MedicalClassifierConfig};
