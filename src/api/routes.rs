use crate::command::StreamRequest;
use crate::error::StreamError;
use crate::media::{self, MediaFile};
use crate::session::{ExitReason, SessionState, StopAck};
use crate::AppState;
use axum::body::Body;
use axum::extract::{Extension, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: u64,
    pub command: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct LogsParams {
    /// ?lines=10
    pub lines: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct LogsResponse {
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&SessionState> for StatusResponse {
    fn from(state: &SessionState) -> Self {
        let mut response = StatusResponse {
            state: state.name().to_string(),
            reason: None,
            exit_code: None,
            detail: None,
        };

        if let SessionState::Terminated(reason) = state {
            let name = match reason {
                ExitReason::Ended { code } => {
                    response.exit_code = *code;
                    "ended"
                }
                ExitReason::StoppedByUser => "stopped_by_user",
                ExitReason::SpawnFailed(_) => "spawn_failed",
                ExitReason::Failed(_) => "failed",
            };
            response.reason = Some(name.to_string());
            response.detail = Some(reason.marker());
        }

        response
    }
}

#[derive(Deserialize)]
pub struct UploadParams {
    /// ?filename=your_video.mp4
    pub filename: String,
}

#[derive(Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub message: String,
}

pub async fn start_stream(
    Extension(state): Extension<AppState>,
    Json(request): Json<StreamRequest>,
) -> Result<(StatusCode, Json<StartResponse>), StreamError> {
    let handle = state.control.start(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            session_id: handle.session_id,
            command: handle.command,
            message: "Streaming started".into(),
        }),
    ))
}

pub async fn stop_stream(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let (stopped, message) = match state.control.stop() {
        StopAck::Signalled => (true, "Stop signal sent"),
        StopAck::NotRunning => (false, "No streaming session is running"),
    };

    Json(StopResponse {
        stopped,
        message: message.into(),
    })
}

pub async fn logs(
    Extension(state): Extension<AppState>,
    Query(params): Query<LogsParams>,
) -> impl IntoResponse {
    let max_lines = params.lines.unwrap_or_else(|| state.control.log_capacity());
    Json(LogsResponse {
        lines: state.control.logs(max_lines),
    })
}

pub async fn status(Extension(state): Extension<AppState>) -> impl IntoResponse {
    Json(StatusResponse::from(&state.control.state()))
}

pub async fn upload_video(
    Extension(state): Extension<AppState>,
    Query(params): Query<UploadParams>,
    body: Body,
) -> Response {
    let filename = params.filename;
    if let Err(message) = media::validate_filename(&filename) {
        warn!(%filename, message, "Rejected upload");
        return err_response(StatusCode::BAD_REQUEST, message);
    }

    info!(%filename, "Uploading file");
    let body = std::pin::pin!(body.into_data_stream());
    match media::save_upload(state.uploads_dir(), &filename, body).await {
        Ok((path, size_bytes)) => {
            info!(%filename, size_bytes, "Upload finished");
            (
                StatusCode::CREATED,
                Json(UploadResponse {
                    path: path.to_string_lossy().into_owned(),
                    size_bytes,
                    size_mb: size_bytes as f64 / (1024.0 * 1024.0),
                    message: format!("Video '{filename}' uploaded"),
                }),
            )
                .into_response()
        }
        Err(error) => {
            error!(%filename, ?error, "Failed to store upload");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload")
        }
    }
}

pub async fn list_videos(Extension(state): Extension<AppState>) -> Json<Vec<MediaFile>> {
    Json(media::list_media(&[state.media_dir(), state.uploads_dir()]).await)
}

pub(crate) fn err_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_response() {
        let idle = StatusResponse::from(&SessionState::Idle);
        assert_eq!(idle.state, "idle");
        assert_eq!(idle.reason, None);

        let ended = StatusResponse::from(&SessionState::Terminated(ExitReason::Ended {
            code: Some(1),
        }));
        assert_eq!(ended.state, "terminated");
        assert_eq!(ended.reason.as_deref(), Some("ended"));
        assert_eq!(ended.exit_code, Some(1));
        assert_eq!(ended.detail.as_deref(), Some("Streaming ended (exit code 1)."));

        let stopped = StatusResponse::from(&SessionState::Terminated(ExitReason::StoppedByUser));
        assert_eq!(stopped.reason.as_deref(), Some("stopped_by_user"));
        assert_eq!(stopped.exit_code, None);
    }

    #[test]
    fn test_status_json_skips_empty_fields() {
        let running = StatusResponse::from(&SessionState::Running);
        let json = serde_json::to_value(running).unwrap();
        assert_eq!(json, json!({ "state": "running" }));
    }
}
