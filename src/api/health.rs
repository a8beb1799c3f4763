use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(state: &AppState) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "pagesmith is running",
        "config": {
            "default_model": config.upstream.default_model,
            "models_count": config.upstream.models.len(),
            "mode_header": config.upstream.mode_header,
            "log_level": config.features.log_level,
        },
        "chat_sessions": state.session_count(),
    }))
}
