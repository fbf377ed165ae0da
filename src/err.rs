#![allow(non_snake_case)]

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::session::SessionError;
use crate::store::StoreError;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

/// Successful response body: `{"success": true, ...value}`.
#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

/// A successful payload together with the status it is sent with.
#[derive(Debug, Clone)]
pub struct Reply<V> {
    pub status: StatusCode,
    pub body: Success<V>,
}

pub fn Fine<V>(status: StatusCode, v: V) -> Reply<V>
where
    V: Serialize,
{
    Reply {
        status,
        body: Success::of(v),
    }
}

impl<V> IntoResponse for Reply<V>
where
    V: Serialize,
{
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    InvalidPayload {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<FieldError>,
    },
    InvalidCredentials { message: String },
    AlreadyExists {
        message: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fields: Vec<FieldError>,
    },
    NotFound { message: String },
    Unauthorized { message: String },
    Forbidden { message: String },
    InternalError { kind: &'static str, message: String },
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    #[serde(flatten)]
    error: &'a Error,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidPayload { .. } | Error::InvalidCredentials { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::AlreadyExists { .. } => StatusCode::CONFLICT,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
            fields: Vec::new(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Error {
        Error::Unauthorized {
            message: msg.into(),
        }
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Error {
        Error::Forbidden {
            message: msg.into(),
        }
    }

    pub fn already_exists<S: Into<String>>(msg: S) -> Error {
        Error::AlreadyExists {
            message: msg.into(),
            fields: Vec::new(),
        }
    }

    pub fn internal<S: Into<String>>(kind: &'static str, msg: S) -> Error {
        Error::InternalError {
            kind,
            message: msg.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        // internal details stay in the server log
        let body = match &self {
            Error::InternalError { kind, message } => {
                log::error!("{}: {}", kind, message);
                Error::InternalError {
                    kind,
                    message: "Something went wrong".to_string(),
                }
            }
            other => other.clone(),
        };
        (
            status,
            Json(Failure {
                success: false,
                error: &body,
            }),
        )
            .into_response()
    }
}

/// Collects field-level problems so every violation is reported at once.
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldError>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P: Into<String>, M: Into<String>>(&mut self, path: P, message: M) {
        self.0.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn into_invalid(self, message: &str) -> Result<(), Error> {
        if self.0.is_empty() {
            return Ok(());
        }
        Err(Error::InvalidPayload {
            message: message.to_string(),
            fields: self.0,
        })
    }

    pub fn into_conflict(self, message: &str) -> Result<(), Error> {
        if self.0.is_empty() {
            return Ok(());
        }
        Err(Error::AlreadyExists {
            message: message.to_string(),
            fields: self.0,
        })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => Self::NotFound { message },
            StoreError::Conflict(message) => Self::AlreadyExists {
                message,
                fields: Vec::new(),
            },
            StoreError::Unexpected(err) => Self::InternalError {
                kind: "DatabaseError",
                message: format!("{:#}", err),
            },
        }
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Self::InternalError {
            kind: "SessionError",
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InternalError {
            kind: "TokenError",
            message: err.to_string(),
        }
    }
}

impl From<pbkdf2::password_hash::Error> for Error {
    fn from(err: pbkdf2::password_hash::Error) -> Self {
        Self::InternalError {
            kind: "PasswordHashError",
            message: err.to_string(),
        }
    }
}

impl From<uuid::Error> for Error {
    fn from(id: uuid::Error) -> Self {
        Self::InvalidPayload {
            message: format!("Invalid identifier: {}", id),
            fields: Vec::new(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError {
            kind: "Unknown",
            message: err.to_string(),
        }
    }
}
