//! API route handlers

pub mod health;
pub mod models;
pub mod predict;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use xray_fed::XrayError;

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Error returned by handlers
#[derive(Debug)]
pub enum ApiError {
    Xray(XrayError),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Xray(
                XrayError::ImageDecode(_)
                | XrayError::UnsupportedFormat(_)
                | XrayError::InvalidInput(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Xray(XrayError::NoModels(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Xray(e) => e.to_string(),
            ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl From<XrayError> for ApiError {
    fn from(e: XrayError) -> Self {
        ApiError::Xray(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self.message());
        }
        (status, Json(ErrorBody { error: self.message() })).into_response()
    }
}
