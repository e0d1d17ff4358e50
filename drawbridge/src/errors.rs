use rocket::http::Status;
use rocket::serde::json::Json;
use serde::Serialize;
use thiserror::Error;

/// What a rocket route hands back on failure: a status plus a JSON `{error}` body.
pub type DrawbridgeServeError = (Status, Json<ErrorBody>);

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum DrawbridgeError {
    #[error("config error {0}")]
    ConfigError(#[from] figment::Error),

    #[error("rocket exploded {0}")]
    RocketError(String),

    #[error("io error for session {session}: {source}")]
    IoError {
        session: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding error {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("no log entries to undo for session {0}")]
    NothingToUndo(String),

    #[error("no versioned snapshot at {timestamp} for session {session}")]
    VersionNotFound { session: String, timestamp: u128 },

    #[error("file storage is not configured")]
    FileStoreDisabled,

    #[error("upstream file storage failure {0}")]
    FileStoreUpstream(String),
}

impl From<rocket::Error> for DrawbridgeError {
    fn from(value: rocket::Error) -> Self {
        Self::RocketError(value.to_string())
    }
}

impl From<DrawbridgeError> for DrawbridgeServeError {
    fn from(value: DrawbridgeError) -> Self {
        let status = match &value {
            DrawbridgeError::ConfigError(_)
            | DrawbridgeError::RocketError(_)
            | DrawbridgeError::IoError { .. } => Status::InternalServerError,
            DrawbridgeError::EncodingError(_) => Status::BadRequest,
            DrawbridgeError::SessionNotFound(_) => Status::NotFound,
            DrawbridgeError::NothingToUndo(_) => Status::Conflict,
            DrawbridgeError::VersionNotFound { .. } => Status::NotFound,
            DrawbridgeError::FileStoreDisabled => Status::ServiceUnavailable,
            DrawbridgeError::FileStoreUpstream(_) => Status::BadGateway,
        };
        (
            status,
            Json(ErrorBody {
                error: value.to_string(),
            }),
        )
    }
}
