use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ExecutionStatus;

/// Upstream bodies are never echoed back beyond this many characters
pub const MAX_DETAIL_CHARS: usize = 300;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{stage} failed with status {status}")]
    Submission {
        stage: &'static str,
        status: u16,
        detail: String,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String, raw: String },

    #[error("Query {status}")]
    ExecutionFailed {
        status: ExecutionStatus,
        detail: Option<String>,
    },

    #[error("Timed out, last status: {last_status}")]
    TimedOut {
        last_status: ExecutionStatus,
        elapsed_ms: u64,
    },

    #[error("Results fetch failed with status {status}")]
    Fetch { status: u16, detail: String },

    #[error("Could not extract data from response")]
    UnparseableResult {
        content_types: Vec<String>,
        fragment: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Query cancelled before completion")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Submission { .. } => "SUBMISSION_ERROR",
            AppError::Protocol { .. } => "PROTOCOL_ERROR",
            AppError::ExecutionFailed { .. } => "EXECUTION_FAILED",
            AppError::TimedOut { .. } => "TIMED_OUT",
            AppError::Fetch { .. } => "FETCH_ERROR",
            AppError::UnparseableResult { .. } => "UNPARSEABLE_RESULT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            AppError::Cancelled => "CANCELLED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            detail: None,
            content_types: None,
        }
    }

    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        self.detail = Some(truncate_detail(detail.as_ref()));
        self
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let response = ErrorResponse::new(err.code(), err.to_string());
        match err {
            AppError::Submission { detail, .. } | AppError::Fetch { detail, .. } => {
                response.with_detail(detail)
            }
            AppError::Protocol { raw, .. } => response.with_detail(raw),
            AppError::ExecutionFailed {
                detail: Some(detail),
                ..
            } => response.with_detail(detail),
            AppError::UnparseableResult { content_types, .. } => ErrorResponse {
                content_types: Some(content_types.clone()),
                ..response
            },
            _ => response,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        } else {
            tracing::warn!(code = self.code(), "Request rejected: {}", self);
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Convert anyhow::Error to AppError, keeping the context chain
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Cut `text` down to at most `MAX_DETAIL_CHARS` characters on a char boundary
pub fn truncate_detail(text: &str) -> String {
    match text.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("Missing sql field".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            AppError::TimedOut {
                last_status: ExecutionStatus::Running,
                elapsed_ms: 50_000
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Configuration("EXPLORER_API_KEY not set".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Fetch {
                status: 502,
                detail: String::new()
            }
            .into_response()
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_truncate_detail_respects_char_boundaries() {
        let long = "é".repeat(MAX_DETAIL_CHARS + 50);
        let truncated = truncate_detail(&long);
        assert_eq!(truncated.chars().count(), MAX_DETAIL_CHARS);
        assert_eq!(truncate_detail("short"), "short");
    }

    #[test]
    fn test_error_response_carries_truncated_detail() {
        let err = AppError::Submission {
            stage: "create",
            status: 400,
            detail: "x".repeat(1000),
        };
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "SUBMISSION_ERROR");
        assert_eq!(response.error, "create failed with status 400");
        assert_eq!(response.detail.unwrap().len(), MAX_DETAIL_CHARS);
        assert!(response.content_types.is_none());
    }

    #[test]
    fn test_unparseable_lists_content_types() {
        let err = AppError::UnparseableResult {
            content_types: vec!["text".to_string(), "mcp_tool_use".to_string()],
            fragment: "Sorry".to_string(),
        };
        let response = ErrorResponse::from(&err);
        assert_eq!(response.error, "Could not extract data from response");
        assert_eq!(
            response.content_types,
            Some(vec!["text".to_string(), "mcp_tool_use".to_string()])
        );
        assert!(response.detail.is_none());
    }

    #[test]
    fn test_anyhow_context_becomes_internal_error() {
        use anyhow::Context;

        let result: Result<u32, AppError> = "x"
            .parse::<u32>()
            .context("Failed to read row limit")
            .map_err(AppError::from);

        match result {
            Err(AppError::Internal(msg)) => {
                assert!(msg.starts_with("Failed to read row limit: "));
                assert!(msg.contains("invalid digit"));
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }
}
