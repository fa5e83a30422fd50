//! # Federated X-Ray Diagnosis
//!
//! Compares the prediction of a centrally-trained chest X-ray classifier with
//! the predictions of independently-trained hospital ("client") classifiers
//! on a single image, using the Burn framework.
//!
//! ## Modules
//!
//! - `model`: ResNet-18 architecture with a two-class head, checkpoint I/O
//! - `preprocess`: image decoding, resizing and ImageNet normalization
//! - `inference`: model registry, prediction and result rendering
//! - `config`: application configuration (models directory, slots)
//! - `utils`: logging, error types and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xray_fed::backend::{default_device, DefaultBackend};
//! use xray_fed::inference::{ModelRegistry, Predictor, RegistryConfig};
//!
//! let device = default_device();
//! let registry = ModelRegistry::<DefaultBackend>::load(&RegistryConfig::default(), &device);
//! let predictor = Predictor::new(device);
//! let input = predictor.preprocess_file("xray.jpeg".as_ref())?;
//! let report = predictor.diagnose(&registry, input)?;
//! ```

pub mod backend;
pub mod config;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use inference::{
    DiagnosisReport, ModelRegistry, ModelSlot, PredictionResult, Predictor, RegistryConfig,
};
pub use model::{MedicalClassifier, MedicalClassifierConfig};
pub use utils::error::{Result, XrayError};

/// Diagnostic classes in model output order
pub const CLASS_NAMES: [&str; 2] = ["NORMAL", "PNEUMONIA"];

/// Number of output classes
pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Spatial size (width and height) of the model input
pub const IMAGE_SIZE: usize = 224;

/// Number of independently-trained client (hospital) models
pub const NUM_CLIENTS: u8 = 5;

/// Get the class name for a given output index
pub fn class_name(label: usize) -> Option<&'static str> {
    CLASS_NAMES.get(label).copied()
}

/// Check if an output index is the healthy (`NORMAL`) class
pub fn is_normal_class(label: usize) -> bool {
    class_name(label) == Some("NORMAL")
}
