use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::api::middleware::AppError;
use super::result_set::{ResultSet, Row};

pub const DEFAULT_ROW_LIMIT: u32 = 500;

/// Saved query ids end up in a request path
static SAVED_QUERY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// One query to run on the explorer, either ad hoc SQL or a saved query resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub text: String,
    pub row_limit: u32,
    pub saved_query_id: Option<String>,
}

impl QueryRequest {
    pub fn ad_hoc(text: impl Into<String>, row_limit: u32) -> Self {
        Self {
            text: text.into(),
            row_limit,
            saved_query_id: None,
        }
    }

    pub fn saved(saved_query_id: impl Into<String>, row_limit: u32) -> Self {
        Self {
            text: String::new(),
            row_limit,
            saved_query_id: Some(saved_query_id.into()),
        }
    }
}

/// Body of `POST /api/query`
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQueryRequest {
    pub sql: Option<String>,
    pub query_id: Option<String>,
    pub limit: Option<u32>,
}

impl ExecuteQueryRequest {
    /// Exactly one of `sql` / `query_id` must be present and non-blank
    pub fn into_query_request(self, default_limit: u32) -> Result<QueryRequest, AppError> {
        let limit = match self.limit {
            Some(0) => return Err(AppError::Validation("limit must be positive".to_string())),
            Some(limit) => limit,
            None => default_limit,
        };

        let sql = self.sql.filter(|s| !s.trim().is_empty());
        let query_id = self.query_id.filter(|id| !id.trim().is_empty());

        match (sql, query_id) {
            (Some(sql), None) => Ok(QueryRequest::ad_hoc(sql.trim(), limit)),
            (None, Some(id)) => {
                let id = id.trim();
                if !SAVED_QUERY_ID.is_match(id) {
                    return Err(AppError::Validation(format!(
                        "Invalid query_id '{}': only letters, digits, '-' and '_' are allowed",
                        id
                    )));
                }
                Ok(QueryRequest::saved(id, limit))
            }
            (Some(_), Some(_)) => Err(AppError::Validation(
                "Provide either sql or query_id, not both".to_string(),
            )),
            (None, None) => Err(AppError::Validation("Missing sql or query_id field".to_string())),
        }
    }
}

/// Body of `POST /api/agent-query`
#[derive(Debug, Default, Deserialize)]
pub struct AgentQueryRequest {
    pub sql: Option<String>,
}

/// Successful response of both query endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteQueryResponse {
    pub data: Vec<Row>,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ExecuteQueryResponse {
    pub fn new(result: ResultSet, run_id: Option<String>) -> Self {
        Self {
            row_count: result.rows.len(),
            data: result.rows,
            columns: result.columns,
            run_id,
        }
    }
}

/// Lifecycle states reported by the explorer for one run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Running,
    Success,
    Failed,
    Error,
    Canceled,
    TimedOut,
}

impl ExecutionStatus {
    /// Interpret a remote status string; unknown values mean the run is still going
    pub fn from_remote(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "success" | "completed" => ExecutionStatus::Success,
            "failed" => ExecutionStatus::Failed,
            "error" => ExecutionStatus::Error,
            "canceled" | "cancelled" => ExecutionStatus::Canceled,
            "created" => ExecutionStatus::Created,
            _ => ExecutionStatus::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Created => "created",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Canceled => "canceled",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Created | ExecutionStatus::Running)
    }

    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != ExecutionStatus::Success
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one in-flight execution on the explorer
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub run_id: String,
    /// Query resource the run belongs to (created or saved)
    pub query_id: Option<String>,
    pub created_at: DateTime<Utc>,
    submitted: Instant,
}

impl ExecutionHandle {
    pub fn new(run_id: impl Into<String>, query_id: Option<String>) -> Self {
        Self {
            run_id: run_id.into(),
            query_id,
            created_at: Utc::now(),
            submitted: Instant::now(),
        }
    }

    /// Monotonic time since the run was submitted
    pub fn elapsed(&self) -> Duration {
        self.submitted.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_interpretation() {
        assert_eq!(ExecutionStatus::from_remote("success"), ExecutionStatus::Success);
        assert_eq!(ExecutionStatus::from_remote("COMPLETED"), ExecutionStatus::Success);
        assert_eq!(ExecutionStatus::from_remote("failed"), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_remote("error"), ExecutionStatus::Error);
        assert_eq!(ExecutionStatus::from_remote("canceled"), ExecutionStatus::Canceled);
        assert_eq!(ExecutionStatus::from_remote("cancelled"), ExecutionStatus::Canceled);
        assert_eq!(ExecutionStatus::from_remote("created"), ExecutionStatus::Created);
        assert_eq!(ExecutionStatus::from_remote("queued"), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_remote(""), ExecutionStatus::Running);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Created.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(!ExecutionStatus::Success.is_failure());
        for status in [
            ExecutionStatus::Failed,
            ExecutionStatus::Error,
            ExecutionStatus::Canceled,
            ExecutionStatus::TimedOut,
        ] {
            assert!(status.is_terminal());
            assert!(status.is_failure());
        }
    }

    #[test]
    fn test_request_requires_exactly_one_source() {
        let both = ExecuteQueryRequest {
            sql: Some("SELECT 1".to_string()),
            query_id: Some("abc".to_string()),
            limit: None,
        };
        assert!(matches!(both.into_query_request(500), Err(AppError::Validation(_))));

        let neither = ExecuteQueryRequest {
            sql: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(neither.into_query_request(500), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_request_defaults() {
        let request = ExecuteQueryRequest {
            sql: Some(" SELECT 1 ".to_string()),
            ..Default::default()
        }
        .into_query_request(500)
        .unwrap();
        assert_eq!(request, QueryRequest::ad_hoc("SELECT 1", 500));

        let saved = ExecuteQueryRequest {
            query_id: Some("q-42".to_string()),
            limit: Some(10),
            ..Default::default()
        }
        .into_query_request(500)
        .unwrap();
        assert_eq!(saved.saved_query_id.as_deref(), Some("q-42"));
        assert_eq!(saved.row_limit, 10);
    }

    #[test]
    fn test_query_id_must_be_a_plain_identifier() {
        for id in ["../x#", "x?inject=1&", "a/b", "..", "q 1"] {
            let request = ExecuteQueryRequest {
                query_id: Some(id.to_string()),
                ..Default::default()
            };
            assert!(
                matches!(request.into_query_request(500), Err(AppError::Validation(_))),
                "{} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let request = ExecuteQueryRequest {
            sql: Some("SELECT 1".to_string()),
            limit: Some(0),
            ..Default::default()
        };
        assert!(request.into_query_request(500).is_err());
    }
}
