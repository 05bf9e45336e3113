//! Asset upload endpoints
//!
//! - `POST /api/upload`: multipart `file` plus optional `folder`
//! - `GET /api/files/signed-url`: time-limited URL for a stored key

use std::time::Duration;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::AppState;
use crate::config::UploadConfig;
use crate::error::AppError;
use crate::storage::{MAX_SIGNED_URL_VALIDITY, MIN_SIGNED_URL_VALIDITY, ObjectKey};

/// Room for multipart boundaries and the `folder` field
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const DEFAULT_SIGNED_URL_SECONDS: u64 = 3600;
const OCTET_STREAM: &str = "application/octet-stream";

/// Upload response
///
/// `reference` is what the catalog should persist; it equals `url` or
/// `fileKey` depending on `storage.reference_mode`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_key: String,
    pub url: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub key: String,
    /// Seconds; defaults to one hour
    pub valid_for: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub url: String,
    pub valid_for: u64,
}

/// Create the upload router
///
/// The body limit sits slightly above `max_bytes` so oversize files are
/// reported by the handler with a JSON body.
pub fn upload_router(max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(upload_asset)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(
                    max_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
                )),
        )
        .route("/files/signed-url", get(signed_url))
}

/// POST /api/upload
async fn upload_asset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let limits = &state.config.upload;

    let mut file: Option<(String, Option<String>, Bytes)> = None;
    let mut folder: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits.max_bytes))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let declared_type = field.content_type().map(str::to_string);

                let mut data = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| multipart_error(e, limits.max_bytes))?
                {
                    if data.len() + chunk.len() > limits.max_bytes {
                        return Err(AppError::PayloadTooLarge {
                            limit: limits.max_bytes,
                        });
                    }
                    data.extend_from_slice(&chunk);
                }

                file = Some((file_name, declared_type, Bytes::from(data)));
            }
            "folder" => {
                folder = Some(field.text().await.map_err(|e| {
                    AppError::Validation(format!("Failed to read folder: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let (file_name, declared_type, data) =
        file.ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    if data.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }

    let content_type = resolve_content_type(declared_type.as_deref(), &file_name, limits)?;
    let folder = resolve_folder(folder.as_deref(), limits)?;

    tracing::info!(
        file_name = %file_name,
        content_type = %content_type,
        folder = %folder,
        bytes = data.len(),
        "Upload requested"
    );

    let stored = state
        .storage
        .store(data, &file_name, &content_type, &folder)
        .await?;

    Ok(Json(UploadResponse {
        file_key: stored.key().to_string(),
        url: stored.url(),
        reference: stored.persisted_value(state.storage.reference_mode()),
    }))
}

/// GET /api/files/signed-url
async fn signed_url(
    State(state): State<AppState>,
    Query(query): Query<SignedUrlQuery>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let key = ObjectKey::existing(&query.key).ok_or_else(|| {
        AppError::Validation("key must name a stored file".to_string())
    })?;

    let valid_for = Duration::from_secs(query.valid_for.unwrap_or(DEFAULT_SIGNED_URL_SECONDS))
        .clamp(MIN_SIGNED_URL_VALIDITY, MAX_SIGNED_URL_VALIDITY);
    let url = state.storage.signed_url(&key, valid_for).await?;

    Ok(Json(SignedUrlResponse {
        url,
        valid_for: valid_for.as_secs(),
    }))
}

fn multipart_error(error: MultipartError, max_bytes: usize) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit: max_bytes }
    } else {
        AppError::Validation(format!("Failed to parse multipart: {}", error))
    }
}

/// Effective MIME type of an upload.
///
/// Browsers usually send 3D models as `application/octet-stream`; those are
/// accepted when the extension identifies a GLB or USDZ file.
fn resolve_content_type(
    declared: Option<&str>,
    file_name: &str,
    limits: &UploadConfig,
) -> Result<String, AppError> {
    let declared = declared.map(str::trim).filter(|value| !value.is_empty());

    let content_type = match declared {
        Some(value) if !value.eq_ignore_ascii_case(OCTET_STREAM) => value.to_string(),
        _ => model_type_for(file_name)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::UnsupportedMediaType(declared.unwrap_or(OCTET_STREAM).to_string())
            })?,
    };

    if !limits.is_allowed_content_type(&content_type) {
        return Err(AppError::UnsupportedMediaType(content_type));
    }
    Ok(content_type)
}

fn model_type_for(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "glb" => Some("model/gltf-binary"),
        "usdz" => Some("model/vnd.usdz+zip"),
        _ => None,
    }
}

fn resolve_folder(requested: Option<&str>, limits: &UploadConfig) -> Result<String, AppError> {
    let folder = requested
        .map(|value| value.trim().trim_matches('/'))
        .filter(|value| !value.is_empty())
        .unwrap_or(limits.default_folder.as_str());

    if !limits.is_allowed_folder(folder) {
        return Err(AppError::Validation(format!("Unknown folder: {}", folder)));
    }
    Ok(folder.to_string())
}
