use reqwest::Method;
use serde_json::{json, Value};

use crate::api::middleware::AppError;
use crate::models::{ExecutionHandle, QueryRequest};
use crate::services::transport::{path_segment, ServiceClient, TransportResponse};

const JSON_HEADERS: &[(&str, &str)] = &[("Content-Type", "application/json")];

/// Turns a query request into a running execution on the explorer.
///
/// Ad hoc SQL creates a query resource first and then triggers an async run
/// on it; saved queries skip creation. Nothing here is retried.
pub struct QuerySubmitter {
    client: ServiceClient,
}

impl QuerySubmitter {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub async fn submit(&self, request: &QueryRequest) -> Result<ExecutionHandle, AppError> {
        let query_id = match &request.saved_query_id {
            Some(saved_id) => {
                tracing::info!("Running saved query {}", saved_id);
                saved_id.clone()
            }
            None => self.create_query(request).await?,
        };

        let run_id = self.run_async(&query_id).await?;
        tracing::info!("Query {} started as run {}", query_id, run_id);

        Ok(ExecutionHandle::new(run_id, Some(query_id)))
    }

    async fn create_query(&self, request: &QueryRequest) -> Result<String, AppError> {
        let body = json!({
            "title": Self::unique_title(),
            "config": {
                "sql": request.text,
                "limit": request.row_limit,
            },
        });

        let response = self
            .client
            .call(Method::POST, "/queries", JSON_HEADERS, Some(body))
            .await?;

        if !response.is_success() {
            return Err(AppError::Submission {
                stage: "create",
                status: response.status,
                detail: response.detail(),
            });
        }

        let query_id = Self::extract_id(&response, "query_id")?;
        tracing::debug!("Created query {}", query_id);
        Ok(query_id)
    }

    async fn run_async(&self, query_id: &str) -> Result<String, AppError> {
        let path = format!("/queries/{}/run-async", path_segment(query_id)?);
        let response = self
            .client
            .call(Method::POST, &path, JSON_HEADERS, Some(json!({ "parameters": {} })))
            .await?;

        if !response.is_success() {
            return Err(AppError::Submission {
                stage: "run-async",
                status: response.status,
                detail: response.detail(),
            });
        }

        Self::extract_id(&response, "run_id")
    }

    /// Query titles must not collide across concurrent submissions
    fn unique_title() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("st-{}-{}", chrono::Utc::now().timestamp_millis(), &suffix[..8])
    }

    /// Pull a required identifier out of a 2xx body
    fn extract_id(response: &TransportResponse, field: &str) -> Result<String, AppError> {
        let id = response.json().and_then(|body| match body.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });

        id.ok_or_else(|| AppError::Protocol {
            message: format!("No {} in response", field),
            raw: response.detail(),
        })
    }
}
