use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Rejections of a start request before anything is spawned.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("Source file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Source is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Source file is not readable: {path} ({reason})")]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("Stream key must not be empty")]
    EmptyStreamKey,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to start encoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A streaming session is already active")]
    AlreadyActive,
}

impl StreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::Validation(_) => StatusCode::BAD_REQUEST,
            StreamError::AlreadyActive => StatusCode::CONFLICT,
            StreamError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StreamError::from(ValidationError::EmptyStreamKey).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(StreamError::AlreadyActive.status_code(), StatusCode::CONFLICT);

        let spawn = StreamError::Spawn {
            program: "ffmpeg".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(spawn.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(spawn.to_string().starts_with("Failed to start encoder `ffmpeg`"));
    }
}
