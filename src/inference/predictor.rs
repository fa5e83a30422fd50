//! Inference Predictor Module
//!
//! Runs one forward pass per loaded model on a preprocessed X-ray and turns
//! the softmax output into a label and a confidence score.

use std::path::Path;
use std::time::{Duration, Instant};

use burn::tensor::{backend::Backend, Tensor};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::registry::{ModelRegistry, SkippedModel};
use crate::model::MedicalClassifier;
use crate::preprocess;
use crate::utils::error::{Result, ResultExt, XrayError};
use crate::{class_name, is_normal_class};

/// Result of a single model's prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Display name of the model that produced this result
    pub model_name: String,

    /// Predicted class index
    pub predicted_class: usize,

    /// Predicted class name
    pub label: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,

    /// Forward pass time in milliseconds
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Create a prediction from softmax output
    ///
    /// The predicted class is the argmax; ties go to the lowest index.
    pub fn new(model_name: &str, probabilities: Vec<f32>, inference_time: Duration) -> Self {
        let (predicted_class, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((i, p)),
            })
            .unwrap_or((0, 0.0));

        let label = class_name(predicted_class).unwrap_or("Unknown").to_string();

        Self {
            model_name: model_name.to_string(),
            predicted_class,
            label,
            confidence,
            probabilities,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    /// Whether the model predicts the healthy class
    pub fn is_normal(&self) -> bool {
        is_normal_class(self.predicted_class)
    }

    /// Confidence as a percentage in [0, 100]
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }

    /// Pretty print the prediction result
    pub fn display(&self) -> String {
        format!(
            "{}: {} ({:.1}% confidence, {:.2} ms)",
            self.model_name,
            self.label,
            self.confidence_percent(),
            self.inference_time_ms
        )
    }
}

/// All model results for one image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisReport {
    /// Name of the analyzed image, when known
    pub image: Option<String>,

    /// When the report was produced
    pub generated_at: DateTime<Utc>,

    /// Backend the models ran on
    pub backend: String,

    /// One result per loaded model, in display order
    pub results: Vec<PredictionResult>,

    /// Configured models that were not available
    pub skipped: Vec<SkippedModel>,
}

impl DiagnosisReport {
    /// Create a report stamped with the current time
    pub fn new(results: Vec<PredictionResult>, skipped: Vec<SkippedModel>) -> Self {
        Self {
            image: None,
            generated_at: Utc::now(),
            backend: crate::backend::backend_name().to_string(),
            results,
            skipped,
        }
    }

    /// Attach the analyzed image's name
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sum of all forward pass times
    pub fn total_inference_ms(&self) -> f64 {
        self.results.iter().map(|r| r.inference_time_ms).sum()
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("cannot serialize report")
    }
}

/// Predictor for running inference with loaded classifiers
pub struct Predictor<B: Backend> {
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Create a predictor that builds input tensors on `device`
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Preprocess a decoded image into a `[1, 3, 224, 224]` tensor
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Tensor<B, 4>> {
        let values = preprocess::preprocess_image(image)?;
        preprocess::to_tensor(values, &self.device)
    }

    /// Load and preprocess an image file
    pub fn preprocess_file(&self, path: &Path) -> Result<Tensor<B, 4>> {
        let image = preprocess::load_image(path)?;
        self.preprocess(&image)
    }

    /// Decode and preprocess uploaded image bytes
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<Tensor<B, 4>> {
        let image = preprocess::decode_image(bytes)?;
        self.preprocess(&image)
    }

    /// Run one model once
    pub fn predict(
        &self,
        model: &MedicalClassifier<B>,
        model_name: &str,
        input: Tensor<B, 4>,
    ) -> Result<PredictionResult> {
        let start = Instant::now();
        let probs = model.forward_softmax(input);
        let probabilities: Vec<f32> = probs
            .into_data()
            .to_vec()
            .map_err(|e| XrayError::Inference(format!("{:?}", e)))?;
        let inference_time = start.elapsed();

        if probabilities.len() != model.num_classes() {
            return Err(XrayError::Inference(format!(
                "expected {} probabilities from {}, got {}",
                model.num_classes(),
                model_name,
                probabilities.len()
            )));
        }

        let result = PredictionResult::new(model_name, probabilities, inference_time);
        debug!("{}", result.display());

        Ok(result)
    }

    /// Run every loaded model on the same input, in display order
    ///
    /// Each model's result is independent; nothing is aggregated.
    pub fn diagnose(&self, registry: &ModelRegistry<B>, input: Tensor<B, 4>) -> Result<DiagnosisReport> {
        if registry.is_empty() {
            return Err(XrayError::NoModels(registry.models_dir().to_path_buf()));
        }

        let results = registry
            .iter()
            .map(|loaded| self.predict(&loaded.model, &loaded.name, input.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(DiagnosisReport::new(results, registry.skipped().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::registry::{LoadedModel, ModelSlot};
    use crate::model::MedicalClassifierConfig;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn test_registry(slots: &[ModelSlot]) -> ModelRegistry<TestBackend> {
        let device = Default::default();
        let models = slots
            .iter()
            .map(|&slot| LoadedModel {
                slot,
                name: slot.display_name(),
                path: slot.checkpoint_stem().into(),
                model: MedicalClassifierConfig::new().init(&device),
            })
            .collect();
        ModelRegistry::from_models("memory", models)
    }

    fn xray_like() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(300, 260, |x, y| {
            let v = ((x * 7 + y * 3) % 256) as u8;
            Rgb([v, v, v])
        }))
    }

    #[test]
    fn test_prediction_result_new() {
        let result =
            PredictionResult::new("Centralized Model", vec![0.2, 0.8], Duration::from_millis(50));

        assert_eq!(result.predicted_class, 1);
        assert_eq!(result.label, "PNEUMONIA");
        assert_eq!(result.confidence, 0.8);
        assert!(!result.is_normal());
        assert!((result.confidence_percent() - 80.0).abs() < 1e-4);
        assert!((result.inference_time_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_tie_goes_to_first_class() {
        let result = PredictionResult::new("Hospital 1 Model", vec![0.5, 0.5], Duration::ZERO);
        assert_eq!(result.predicted_class, 0);
        assert_eq!(result.label, "NORMAL");
        assert!(result.is_normal());
    }

    #[test]
    fn test_prediction_empty_probabilities() {
        let result = PredictionResult::new("Hospital 2 Model", Vec::new(), Duration::ZERO);
        assert_eq!(result.predicted_class, 0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_display_contains_label_and_confidence() {
        let result = PredictionResult::new("Hospital 3 Model", vec![0.9, 0.1], Duration::ZERO);
        let text = result.display();
        assert!(text.contains("Hospital 3 Model"));
        assert!(text.contains("NORMAL"));
        assert!(text.contains("90.0%"));
    }

    #[test]
    fn test_predict_probabilities_sum_to_one() {
        let registry = test_registry(&[ModelSlot::Central]);
        let predictor = Predictor::<TestBackend>::new(Default::default());
        let input = predictor.preprocess(&xray_like()).unwrap();

        let loaded = registry.get(ModelSlot::Central).unwrap();
        let result = predictor.predict(&loaded.model, &loaded.name, input).unwrap();

        assert_eq!(result.probabilities.len(), 2);
        assert!((result.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(result.confidence >= 0.5);
        assert_eq!(result.confidence, result.probabilities[result.predicted_class]);
    }

    #[test]
    fn test_repeated_inference_is_identical() {
        let registry = test_registry(&[ModelSlot::Client(1)]);
        let predictor = Predictor::<TestBackend>::new(Default::default());
        let loaded = registry.get(ModelSlot::Client(1)).unwrap();

        let first = predictor
            .predict(&loaded.model, &loaded.name, predictor.preprocess(&xray_like()).unwrap())
            .unwrap();
        let second = predictor
            .predict(&loaded.model, &loaded.name, predictor.preprocess(&xray_like()).unwrap())
            .unwrap();

        assert_eq!(first.probabilities, second.probabilities);
        assert_eq!(first.predicted_class, second.predicted_class);
    }

    #[test]
    fn test_diagnose_runs_each_model_once_in_order() {
        let registry = test_registry(&[ModelSlot::Central, ModelSlot::Client(3), ModelSlot::Client(5)]);
        let predictor = Predictor::<TestBackend>::new(Default::default());
        let input = predictor.preprocess(&xray_like()).unwrap();

        let report = predictor.diagnose(&registry, input).unwrap().with_image("scan.png");

        let names: Vec<&str> = report.results.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(names, ["Centralized Model", "Hospital 3 Model", "Hospital 5 Model"]);
        assert_eq!(report.image.as_deref(), Some("scan.png"));
        assert!(report.skipped.is_empty());
        assert!(report.total_inference_ms() >= 0.0);

        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"model_name\": \"Hospital 5 Model\""));
    }

    #[test]
    fn test_diagnose_without_models_fails() {
        let registry = test_registry(&[]);
        let predictor = Predictor::<TestBackend>::new(Default::default());
        let input = predictor.preprocess(&xray_like()).unwrap();

        let result = predictor.diagnose(&registry, input);
        assert!(matches!(result, Err(XrayError::NoModels(_))));
    }

    #[test]
    fn test_preprocess_bytes_rejects_garbage() {
        let predictor = Predictor::<TestBackend>::new(Default::default());
        let result = predictor.preprocess_bytes(b"GIF89a but not quite");
        assert!(matches!(result, Err(XrayError::ImageDecode(_))));
    }
}
