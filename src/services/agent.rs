use anyhow::Context;
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::AgentConfig;
use crate::models::{NormalizationOutcome, ResultSet};
use crate::services::normalizer;
use crate::services::transport::{Credential, ReqwestTransport, ServiceClient, Transport};

const AGENT_API_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are a data assistant. Use the explorer_run_sql tool to run the SQL query. \
After getting results, output ONLY the JSON object with the data array. No explanation, no markdown, just the JSON.";

#[derive(Debug, Serialize)]
struct AgentMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct McpServer<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    url: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AgentMessage<'a>>,
    mcp_servers: Vec<McpServer<'a>>,
}

/// Runs SQL through an agent that reaches the explorer over MCP.
///
/// The agent replies with content blocks rather than a tabular body, so the
/// rows come out of the normalizer's tool-result and text strategies.
pub struct AgentQueryService {
    client: ServiceClient,
    model: String,
    mcp_url: String,
    max_tokens: u32,
}

impl AgentQueryService {
    pub fn new(client: ServiceClient, model: impl Into<String>, mcp_url: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            mcp_url: mcp_url.into(),
            max_tokens,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, AppError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(std::time::Duration::from_secs(
            config.request_timeout_secs,
        ))?);
        let credential = Credential::new("x-api-key", config.api_key.clone(), "AGENT_API_KEY");

        Ok(Self::new(
            ServiceClient::new(transport, &config.api_url, credential),
            config.model.clone(),
            config.mcp_url.clone(),
            config.max_tokens,
        ))
    }

    pub async fn run(&self, sql: &str) -> Result<ResultSet, AppError> {
        let request = AgentRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![AgentMessage {
                role: "user",
                content: format!("Run this SQL query and return the results:\n\n{}", sql),
            }],
            mcp_servers: vec![McpServer {
                kind: "url",
                url: &self.mcp_url,
                name: "explorer-mcp",
            }],
        };
        let body = serde_json::to_value(&request).context("Failed to encode agent request")?;

        tracing::info!(model = %self.model, "Sending query to agent");
        let response = self
            .client
            .call(
                Method::POST,
                "/v1/messages",
                &[
                    ("Content-Type", "application/json"),
                    ("anthropic-version", AGENT_API_VERSION),
                ],
                Some(body),
            )
            .await?;

        if !response.is_success() {
            return Err(AppError::Submission {
                stage: "agent",
                status: response.status,
                detail: response.detail(),
            });
        }

        match normalizer::normalize(&response.body) {
            NormalizationOutcome::Rows(result) => {
                tracing::info!(rows = result.row_count(), "Agent query returned rows");
                Ok(result)
            }
            NormalizationOutcome::NoData => Ok(ResultSet::empty()),
            NormalizationOutcome::Unparseable {
                content_types,
                fragment,
            } => Err(AppError::UnparseableResult {
                content_types,
                fragment,
            }),
        }
    }
}
