//! Model listing endpoint

use axum::{extract::State, Json};
use xray_fed::inference::SlotStatus;

use crate::state::SharedState;

/// GET /models - Load state of every slot, captured at startup
pub async fn list_models(State(state): State<SharedState>) -> Json<Vec<SlotStatus>> {
    Json(state.status().to_vec())
}
