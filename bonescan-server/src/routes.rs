//! HTTP handlers for the inference endpoint and region crop images.

use std::{io::Write, path::PathBuf, sync::Arc};

use axum::{
    Json,
    extract::{Multipart, Path as UrlPath, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use log::{error, info, warn};
use serde::Serialize;
use tempfile::NamedTempFile;

use bonescan_core::{AnalyzeError, Region, ScanAnalyzer, resolve_region_image};
use bonescan_utils::timing_guard;

/// Read-only per-process state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<ScanAnalyzer>,
    pub region_root: PathBuf,
    /// Where uploads are spooled for the duration of a request.
    pub upload_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody { detail: detail.into() })).into_response()
}

/// HTTP status for a failed analysis: input problems are the client's,
/// everything else is ours.
fn status_for(err: &AnalyzeError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub async fn healthz() -> impl IntoResponse {
    "ok"
}

/// Predict bone metastasis from an uploaded whole-body scan.
///
/// The upload itself is only persisted for the duration of the request;
/// the `NamedTempFile` guard removes it on every exit path. Inference
/// reads the pre-segmented region crops matching the uploaded filename.
pub async fn predict(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let _guard = timing_guard("bonescan_server::predict", log::Level::Debug);

    let (filename, bytes) = loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return error_response(StatusCode::BAD_REQUEST, "no file field in upload");
            }
            Err(err) => {
                return error_response(StatusCode::BAD_REQUEST, format!("invalid upload: {err}"));
            }
        };
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => break (filename, bytes),
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("failed to read upload: {err}"),
                );
            }
        }
    };
    info!("received prediction request for '{filename}'");

    // Holds the upload on disk until this handler returns; dropped (and
    // the file removed) on success and failure alike.
    let temp_file = match persist_upload(&state.upload_dir, &bytes) {
        Ok(file) => file,
        Err(err) => {
            error!("failed to persist upload: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to store uploaded file",
            );
        }
    };

    let analyzer = Arc::clone(&state.analyzer);
    let request_name = filename.clone();
    let result =
        tokio::task::spawn_blocking(move || analyzer.analyze(&request_name)).await;
    drop(temp_file);

    match result {
        Ok(Ok(analysis)) => Json(analysis.prediction).into_response(),
        Ok(Err(err)) => {
            let status = status_for(&err);
            if status.is_client_error() {
                warn!("rejected '{filename}': {err}");
            } else {
                error!("analysis of '{filename}' failed: {err}");
            }
            error_response(status, err.to_string())
        }
        Err(join_err) => {
            error!("analysis task for '{filename}' panicked: {join_err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "prediction failed")
        }
    }
}

fn persist_upload(dir: &std::path::Path, bytes: &[u8]) -> anyhow::Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    Ok(file)
}

/// Serve one region crop for the presentation page.
///
/// The crop is resolved by base name so the page does not need to know
/// which extension the crop was stored with.
pub async fn region_image(
    State(state): State<AppState>,
    UrlPath((region, file)): UrlPath<(String, String)>,
) -> Response {
    let Ok(region) = region.parse::<Region>() else {
        return error_response(StatusCode::NOT_FOUND, format!("unknown region '{region}'"));
    };
    let Some(base_name) = sanitized_base_name(&file) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid file name");
    };

    let region_dir = state.region_root.join(region.label());
    let Some(path) = resolve_region_image(&base_name, &region_dir, &bonescan_core::EXTENSION_PRIORITY)
    else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no crop for region {region} and base name '{base_name}'"),
        );
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let content_type = content_type_for(&path);
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(err) => {
            error!("failed to read region crop {}: {err}", path.display());
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read crop")
        }
    }
}

/// Strip the extension and reject anything that could escape the region
/// directory.
fn sanitized_base_name(file: &str) -> Option<String> {
    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return None;
    }
    let stem = std::path::Path::new(file).file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("tif") => "image/tiff",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
