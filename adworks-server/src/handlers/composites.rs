use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::error;

use crate::genai::FallbackMode;
use crate::handlers::error_json;
use crate::pipeline::{BatchMode, BatchSpec, PipelineError, SourcePair};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub pairs: Vec<PairRequest>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// When a render exhausts its retries, substitute the original shot
    /// image (tagged per result) instead of failing the item.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub shot_id: String,
    pub background_id: String,
}

fn default_mode() -> String {
    "selected".to_string()
}

fn default_true() -> bool {
    true
}

/// POST /api/categories/{id}/composites/generate
///
/// Returns 200 with the full batch report, partial failures included, for
/// every batch that passed validation. Only structurally invalid requests
/// (empty set, ceiling exceeded, bad mode) get a 4xx.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Path(category_id): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> impl IntoResponse {
    let mode = match request.mode.as_str() {
        "all_combinations" => BatchMode::AllCombinations,
        "selected" => BatchMode::Selected(
            request
                .pairs
                .into_iter()
                .map(|p| SourcePair {
                    shot_id: p.shot_id,
                    background_id: p.background_id,
                })
                .collect(),
        ),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_json(&format!(
                    "mode must be \"all_combinations\" or \"selected\", got {:?}",
                    other,
                ))),
            )
                .into_response();
        }
    };

    let spec = BatchSpec {
        mode,
        instructions: request.instructions,
        fallback: if request.allow_fallback {
            FallbackMode::UseFirstSource
        } else {
            FallbackMode::Propagate
        },
    };

    match state.pipeline.run(&category_id, spec).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(PipelineError::Validation(message)) => {
            (StatusCode::BAD_REQUEST, Json(error_json(&message))).into_response()
        }
        Err(PipelineError::CategoryNotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(error_json("Category not found"))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Batch run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&e.to_string())),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request: GenerateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.mode, "selected");
        assert!(request.pairs.is_empty());
        assert!(request.allow_fallback);
        assert!(request.instructions.is_none());
    }

    #[test]
    fn test_request_with_pairs() {
        let json = r#"{
            "mode": "selected",
            "pairs": [{"shot_id": "s1", "background_id": "b1"}],
            "instructions": "moody lighting",
            "allow_fallback": false
        }"#;
        let request: GenerateRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.pairs.len(), 1);
        assert_eq!(request.pairs[0].shot_id, "s1");
        assert!(!request.allow_fallback);
        assert_eq!(request.instructions.as_deref(), Some("moody lighting"));
    }
}
