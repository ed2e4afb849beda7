use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::UploadState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    NotFound,
    HttpStatus,
    InvalidResponse,
    UploadRejected,
    UploadTransport,
    InvalidState,
    Validation,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::HttpStatus => "HTTP_ERROR",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::UploadRejected => "UPLOAD_REJECTED",
            Self::UploadTransport => "UPLOAD_TRANSPORT_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Validation => "VALIDATION_ERROR",
        }
    }
}

/// Metadata for the inspection could not be obtained. Page-level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("inspection not found")]
    NotFound,

    #[error("network error: {message}")]
    Network { message: String },

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::NotFound => ErrorKind::NotFound,
            FetchError::Network { .. } => ErrorKind::Network,
            FetchError::Http { .. } => ErrorKind::HttpStatus,
            FetchError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            FetchError::NotFound => "Inspection not found".to_string(),
            FetchError::Network { .. } => "Failed to load inspection".to_string(),
            FetchError::Http { status } => format!("Failed to load inspection (HTTP {status})"),
            FetchError::InvalidResponse { .. } => {
                "Failed to load inspection (unexpected response)".to_string()
            }
        }
    }
}

/// One image slot failed to materialize. Never affects the other slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("HTTP {status}")]
    Http { status: u16 },
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::Network { .. } => ErrorKind::Network,
            DownloadError::Http { .. } => ErrorKind::HttpStatus,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            DownloadError::Network { .. } => "Failed to load image".to_string(),
            DownloadError::Http { status } => format!("HTTP {status}"),
        }
    }
}

/// Terminal failure of one upload session. There is no automatic retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload transport failed: {message}")]
    Transport { message: String },

    #[error("upload rejected with HTTP {status}")]
    Rejected { status: u16 },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Transport { .. } => ErrorKind::UploadTransport,
            UploadError::Rejected { .. } => ErrorKind::UploadRejected,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            UploadError::Transport { .. } => "Network error during upload".to_string(),
            UploadError::Rejected { status } => format!("Upload failed (HTTP {status})"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid upload state transition: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: UploadState,
    pub to: UploadState,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Misuse of the capture workflow. Not produced by network conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Missing transformer or inspection id")]
    MissingRouteIds,

    #[error("selected file is empty")]
    EmptyFile,

    #[error("selected file too large: {size} bytes, max {max}")]
    FileTooLarge { size: usize, max: usize },

    #[error("workflow already torn down")]
    TornDown,

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::MissingRouteIds
            | WorkflowError::EmptyFile
            | WorkflowError::FileTooLarge { .. } => ErrorKind::Validation,
            WorkflowError::TornDown | WorkflowError::Transition(_) => ErrorKind::InvalidState,
        }
    }
}
