use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Malformed registry or configuration. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server name must not be empty")]
    EmptyServerName,
    #[error("duplicate server name: {0}")]
    DuplicateServer(String),
    #[error("server {server}: tool name must not be empty")]
    EmptyToolName { server: String },
    #[error("server {server}: duplicate tool name {tool}")]
    DuplicateTool { server: String, tool: String },
    #[error("server {server}: {reason}")]
    InvalidServer { server: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Per-call failure talking to one capability server. Always recovered into a
/// tool call record, never raised to the dispatcher's caller.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientError {
    #[error("server unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("remote error {code}: {message}")]
    RemoteError {
        code: i64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Unreachable { .. } => "Unreachable",
            ClientError::Timeout { .. } => "Timeout",
            ClientError::RemoteError { .. } => "RemoteError",
            ClientError::MalformedEnvelope { .. } => "MalformedEnvelope",
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        let ProtocolError::MalformedEnvelope(reason) = err;
        ClientError::MalformedEnvelope { reason }
    }
}

/// Faults in the dispatcher's own logic.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("internal fault: {0}")]
    Internal(String),
}

/// Failure raised by a hosted tool implementation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("path escapes repository root")]
    PathOutsideRoot,
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("internal error")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BadRequest",
            AppError::NotFound => "NotFound",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal fault");
        }
        // Internal detail stays in the log; the body only carries the generic message.
        let body = ErrorBody { code: self.code(), message: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
