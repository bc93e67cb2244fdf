use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

use adworks_common::path::VirtualPath;
use adworks_common::storage::{DeleteTarget, StorageError, UploadOptions};

use crate::catalog::CatalogError;
use crate::handlers::error_json;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

/// POST /api/categories/{id}/assets?name=hero.jpg — raw-body upload into the
/// category's asset folder.
pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    Path(category_id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let category = match state.catalog.category(&category_id).await {
        Ok(c) => c,
        Err(CatalogError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, Json(error_json("Category not found")))
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&e.to_string())),
            )
                .into_response();
        }
    };

    let path = match VirtualPath::parse(&format!("{}/assets/{}", category.slug, query.name)) {
        Ok(path) => path,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(error_json(&e.to_string()))).into_response();
        }
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&query.name)
                .first_or_octet_stream()
                .to_string()
        });

    let opts = UploadOptions {
        content_type: Some(content_type),
        cache_control: None,
    };
    match state.storage.upload(body, &path, &opts).await {
        Ok(blob) => (StatusCode::CREATED, Json(blob)).into_response(),
        Err(StorageError::Quota) => (
            StatusCode::INSUFFICIENT_STORAGE,
            Json(error_json("Storage quota exceeded")),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, path = %path, "Asset upload failed");
            (StatusCode::BAD_GATEWAY, Json(error_json(&e.to_string()))).into_response()
        }
    }
}

/// GET /api/categories/{id}/assets/{*path} — serve asset bytes.
pub async fn download_asset(
    State(state): State<Arc<AppState>>,
    Path((category_id, asset_path)): Path<(String, String)>,
) -> Response {
    let category = match state.catalog.category(&category_id).await {
        Ok(c) => c,
        Err(CatalogError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, Json(error_json("Category not found")))
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_json(&e.to_string())),
            )
                .into_response();
        }
    };

    let path = match VirtualPath::parse(&format!("{}/assets/{}", category.slug, asset_path)) {
        Ok(path) => path,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(error_json(&e.to_string()))).into_response();
        }
    };

    match state.storage.download(&path).await {
        Ok(data) => {
            let mime_type = mime_guess::from_path(path.file_name())
                .first_or_octet_stream()
                .to_string();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, mime_type)
                .header(header::CONTENT_LENGTH, data.len().to_string())
                .body(Body::from(data))
                .unwrap()
        }
        Err(StorageError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(error_json("Asset not found"))).into_response()
        }
        Err(e) => {
            warn!(error = %e, path = %path, "Asset download failed");
            (StatusCode::BAD_GATEWAY, Json(error_json(&e.to_string()))).into_response()
        }
    }
}

/// Exactly one of `file_id` / `path` selects the delete target; the two are
/// never inferred from each other.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// DELETE /api/assets — idempotent: deleting a missing asset is a success.
pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let target = match (request.file_id, request.path) {
        (Some(file_id), None) => DeleteTarget::FileId(file_id),
        (None, Some(raw)) => match VirtualPath::parse(&raw) {
            Ok(path) => DeleteTarget::Path(path),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, Json(error_json(&e.to_string())))
                    .into_response();
            }
        },
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(error_json("exactly one of file_id or path must be provided")),
            )
                .into_response();
        }
    };

    match state.storage.delete(&target).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!(error = %e, target = %target, "Asset delete failed");
            (StatusCode::BAD_GATEWAY, Json(error_json(&e.to_string()))).into_response()
        }
    }
}
