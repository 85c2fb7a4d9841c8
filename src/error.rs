use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use facerank_vision::{AlignError, PipelineError};
use serde_json::json;
use thiserror::Error;

use crate::prediction::CatalogMismatch;

pub type Result<T> = core::result::Result<T, ApiError>;

/// Every way a request can fail, each with its own status and log line
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file part")]
    MissingFile,
    #[error("No selected file")]
    EmptyFilename,
    #[error("No face detected")]
    NoFaceDetected,
    #[error("{0}")]
    Multipart(#[from] MultipartError),
    #[error("{0}")]
    Decode(#[from] image::ImageError),
    #[error("{0:#}")]
    Detection(anyhow::Error),
    #[error("{0}")]
    Alignment(AlignError),
    #[error("{0:#}")]
    Classification(anyhow::Error),
    #[error("{0}")]
    Catalog(#[from] CatalogMismatch),
    #[error("{0}")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NoFace => Self::NoFaceDetected,
            PipelineError::Detection(e) => Self::Detection(e),
            PipelineError::Alignment(e) => Self::Alignment(e),
            PipelineError::Classification(e) => Self::Classification(e),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("inference task failed: {}", err))
    }
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingFile => "missing_file",
            Self::EmptyFilename => "empty_filename",
            Self::NoFaceDetected => "no_face",
            Self::Multipart(_) => "multipart",
            Self::Decode(_) => "decode",
            Self::Detection(_) => "detection",
            Self::Alignment(_) => "alignment",
            Self::Classification(_) | Self::Catalog(_) => "classification",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::EmptyFilename | Self::NoFaceDetected => StatusCode::BAD_REQUEST,
            // 400 for malformed bodies, 413 past the upload limit
            Self::Multipart(err) => err.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("predict failed [{}]: {}", self.kind(), self);
        } else {
            log::warn!("predict rejected [{}]: {}", self.kind(), self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
