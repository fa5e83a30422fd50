//! Prediction endpoint

use axum::{body::Bytes, extract::State, Json};
use tracing::info;
use xray_fed::backend::{default_device, DefaultBackend};
use xray_fed::{DiagnosisReport, Predictor, XrayError};

use super::ApiError;
use crate::state::SharedState;

/// POST /predict - Run every loaded model on the uploaded image
///
/// The request body is the raw JPEG or PNG file.
pub async fn predict(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<DiagnosisReport>, ApiError> {
    if body.is_empty() {
        return Err(XrayError::InvalidInput("request body is empty".to_string()).into());
    }

    let report = tokio::task::spawn_blocking(move || -> Result<DiagnosisReport, ApiError> {
        let predictor = Predictor::<DefaultBackend>::new(default_device());
        let input = predictor.preprocess_bytes(&body)?;

        let registry = state.registry().map_err(ApiError::Internal)?;
        Ok(predictor.diagnose(&registry, input)?)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("inference task failed: {}", e)))??;

    info!(
        "Diagnosed upload with {} models in {:.1} ms",
        report.results.len(),
        report.total_inference_ms()
    );

    Ok(Json(report))
}
