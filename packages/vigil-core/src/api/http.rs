//! Control REST surface: source lifecycle, uploads, server info, and viewer administration.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::error::{CoreError, CoreResult};
use crate::manager::SourceRequest;
use crate::protocol_constants::{ALLOWED_UPLOAD_EXTENSIONS, SERVICE_ID};

/// Creates the Axum router with all routes.
///
/// CORS is wide open: both the phone uploader and the viewer page are expected to be served
/// from origins other than this server (a packaged mobile app, a dev frontend on another port).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/source/select", post(select_source))
        .route("/api/source/upload", post(upload_source))
        .route("/api/source/status", get(source_status))
        .route("/api/server/info", get(server_info))
        .route("/api/viewers/connected", get(viewers_connected))
        .route("/api/viewers/allow", post(viewers_allow))
        .route("/api/viewers/revoke", post(viewers_revoke))
        .route("/ws", get(crate::api::ws::ws_handler))
        .route("/ws/phone", get(crate::api::ws_phone::ws_phone_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Liveness / readiness
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "state": state.manager.state(),
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    let port = state.network.get_port();
    let local_ip = state.network.get_local_ip();
    let port_ready = port > 0;
    let ip_ready = !local_ip.is_empty();
    let ready = port_ready && ip_ready;

    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "ready": ready,
        "checks": {
            "port": { "ready": port_ready, "value": port },
            "localIp": { "ready": ip_ready, "value": local_ip },
        }
    });

    if ready {
        Json(body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SelectSourceRequest {
    Video { video_path: String },
    Camera,
}

#[derive(Debug, Serialize)]
struct SelectSourceResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<crate::manager::SourceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn select_source(
    State(state): State<AppState>,
    Json(req): Json<SelectSourceRequest>,
) -> Json<SelectSourceResponse> {
    let request = match req {
        SelectSourceRequest::Video { video_path } => SourceRequest::Video { path: video_path },
        SelectSourceRequest::Camera => SourceRequest::Camera,
    };

    match state.manager.switch(request).await {
        Ok(()) => Json(SelectSourceResponse {
            success: true,
            state: Some(state.manager.state()),
            source: state.manager.source_kind().await,
            error: None,
        }),
        Err(e) => Json(SelectSourceResponse {
            success: false,
            state: None,
            source: None,
            error: Some(e),
        }),
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn upload_source(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, CoreError> {
    let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoreError::InvalidRequest(e.to_string()))?
    else {
        return Err(CoreError::InvalidRequest("missing file field".into()));
    };

    let file_name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| CoreError::InvalidRequest("missing file name".into()))?;

    let extension = file_name
        .rsplit('.')
        .next()
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(CoreError::InvalidFileType(extension));
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|e| CoreError::InvalidRequest(e.to_string()))?;

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    let dest = state.config.upload_dir.join(sanitize_filename(&file_name));
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    Ok(Json(UploadResponse {
        success: true,
        file_path: Some(dest.to_string_lossy().into_owned()),
        error: None,
    }))
}

/// Strips directory components from an uploaded file name so it can't escape `upload_dir`.
fn sanitize_filename(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

#[derive(Debug, Serialize)]
struct SourceStatusResponse {
    state: crate::manager::SourceState,
    source: Option<&'static str>,
    last_frame_ts: u64,
}

async fn source_status(State(state): State<AppState>) -> Json<SourceStatusResponse> {
    Json(SourceStatusResponse {
        state: state.manager.state(),
        source: state.manager.source_kind().await,
        last_frame_ts: state.manager.last_frame_millis(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Server info
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ServerInfoResponse {
    ip: String,
    port: u16,
    camera_url: String,
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        ip: state.network.get_local_ip(),
        port: state.network.get_port(),
        camera_url: state.network.camera_url(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Viewer administration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ViewersConnectedResponse {
    viewers: Vec<crate::viewers::ViewerInfo>,
    count: usize,
    allowed_count: usize,
}

async fn viewers_connected(State(state): State<AppState>) -> Json<ViewersConnectedResponse> {
    let viewers = state.viewer_registry.list();
    let allowed_count = viewers.iter().filter(|v| v.allowed).count();
    Json(ViewersConnectedResponse {
        count: viewers.len(),
        allowed_count,
        viewers,
    })
}

#[derive(Debug, Deserialize)]
struct ViewerIdRequest {
    viewer_id: String,
}

#[derive(Debug, Serialize)]
struct ViewerActionResponse {
    success: bool,
    viewer_id: String,
    message: String,
}

async fn viewers_allow(
    State(state): State<AppState>,
    Json(req): Json<ViewerIdRequest>,
) -> CoreResult<Json<ViewerActionResponse>> {
    if !state.viewer_registry.allow(&req.viewer_id) {
        return Err(CoreError::ViewerNotFound(req.viewer_id));
    }
    Ok(Json(ViewerActionResponse {
        success: true,
        viewer_id: req.viewer_id,
        message: "viewer allowed".into(),
    }))
}

async fn viewers_revoke(
    State(state): State<AppState>,
    Json(req): Json<ViewerIdRequest>,
) -> CoreResult<Json<ViewerActionResponse>> {
    if !state.viewer_registry.revoke(&req.viewer_id) {
        return Err(CoreError::ViewerNotFound(req.viewer_id));
    }
    Ok(Json(ViewerActionResponse {
        success: true,
        viewer_id: req.viewer_id,
        message: "viewer revoked".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_strips_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("C:\\Users\\a\\clip.mp4"), "clip.mp4");
    }
}
