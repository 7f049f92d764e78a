// src/error.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

/// Duplicate key error code reported by the MongoDB server.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Domain error shared by the stores, the services and the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidInput(reason.into())
    }

    /// RPC-style code string for the request façade.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_argument",
            Error::AlreadyExists(_) | Error::Conflict(_) => "already_exists",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        if let ErrorKind::Write(WriteFailure::WriteError(write_err)) = err.kind.as_ref() {
            if write_err.code == DUPLICATE_KEY_CODE {
                return Error::AlreadyExists(write_err.message.clone());
            }
        }
        Error::Internal(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for Error {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        Error::Internal(format!("bson encode: {}", err))
    }
}

impl From<mongodb::bson::de::Error> for Error {
    fn from(err: mongodb::bson::de::Error) -> Self {
        Error::Internal(format!("bson decode: {}", err))
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyExists(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal details stay in the logs.
        let message = match self {
            Error::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "code": self.code(),
            "message": message,
        }))
    }
}
