use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{query, AppState};

/// Create router with application state
pub fn create_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/query",
            post(query::execute_query).fallback(query::method_not_allowed),
        )
        .route(
            "/api/agent-query",
            post(query::execute_agent_query).fallback(query::method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, Config, ExplorerConfig, LoggingConfig, ServerConfig};
    use crate::services::transport::mock::{json_reply, MockTransport};
    use crate::services::{AgentQueryService, Credential, PollSettings, QueryExecutor, ServiceClient};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use reqwest::Method;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            explorer: ExplorerConfig {
                base_url: "https://explorer.test".to_string(),
                api_key: Some("key".to_string()),
                request_timeout_secs: 30,
                poll_interval_ms: 2000,
                deadline_secs: 50,
                default_row_limit: 500,
            },
            agent: AgentConfig {
                api_url: "https://agent.test".to_string(),
                api_key: None,
                model: "test-model".to_string(),
                mcp_url: "https://mcp.test".to_string(),
                max_tokens: 1024,
                request_timeout_secs: 55,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                style: "auto".to_string(),
            },
        }
    }

    fn router(transport: Arc<MockTransport>) -> Router {
        let config = test_config();
        let explorer = ServiceClient::new(
            transport.clone(),
            &config.explorer.base_url,
            Credential::new("X-API-KEY", config.explorer.api_key.clone(), "EXPLORER_API_KEY"),
        );
        let agent = ServiceClient::new(
            transport,
            &config.agent.api_url,
            Credential::new("x-api-key", None, "AGENT_API_KEY"),
        );
        let executor = QueryExecutor::new(
            explorer,
            PollSettings {
                interval: Duration::from_secs(2),
                deadline: Duration::from_secs(50),
            },
        );
        let agent = AgentQueryService::new(agent, "test-model", "https://mcp.test", 1024);

        create_router_with_state(AppState::new(config, executor, agent, CancellationToken::new()))
    }

    fn submitted() -> MockTransport {
        MockTransport::new()
            .on(Method::POST, "/queries", json_reply(200, json!({"query_id": "q1"})))
            .on(Method::POST, "/queries/q1/run-async", json_reply(200, json!({"run_id": "r1"})))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(Arc::new(MockTransport::new()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_success() {
        let transport = Arc::new(
            submitted()
                .on(Method::GET, "/query-runs/r1/status", json_reply(200, json!({"status": "success"})))
                .on(
                    Method::GET,
                    "/query-runs/r1/results?f=json",
                    json_reply(200, json!({"data": [{"day": "2024-01-01", "txs": 3}]})),
                ),
        );

        let response = router(transport.clone())
            .oneshot(post_json("/api/query", json!({"sql": "SELECT day, txs FROM t"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"][0]["TXS"], 3);
        assert_eq!(body["columns"], json!(["DAY", "TXS"]));
        assert_eq!(body["row_count"], 1);
        assert_eq!(body["run_id"], "r1");

        let create = &transport.calls()[0];
        assert_eq!(create.body.as_ref().unwrap()["config"]["limit"], 500);
    }

    #[tokio::test]
    async fn test_missing_input_is_bad_request() {
        let transport = Arc::new(MockTransport::new());
        let response = router(transport.clone())
            .oneshot(post_json("/api/query", json!({"limit": 10})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().contains("Missing sql"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_path_like_query_id_is_bad_request() {
        let transport = Arc::new(MockTransport::new());
        let response = router(transport.clone())
            .oneshot(post_json("/api/query", json!({"query_id": "../../admin/users/delete#"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = router(Arc::new(MockTransport::new())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsupported_verb() {
        let response = router(Arc::new(MockTransport::new()))
            .oneshot(Request::builder().method("GET").uri("/api/query").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["error"], "Method not allowed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_gateway_timeout() {
        let transport = Arc::new(
            submitted().on(Method::GET, "/query-runs/r1/status", json_reply(200, json!({"status": "running"}))),
        );

        let response = router(transport)
            .oneshot(post_json("/api/query", json!({"query_id": "q1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "Timed out, last status: running");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_failure_detail_is_returned() {
        let transport = Arc::new(submitted().on(
            Method::GET,
            "/query-runs/r1/status",
            json_reply(200, json!({"status": "error", "error": "Object 'T' does not exist"})),
        ));

        let response = router(transport)
            .oneshot(post_json("/api/query", json!({"sql": "SELECT * FROM t"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "EXECUTION_FAILED");
        assert_eq!(body["detail"], "Object 'T' does not exist");
    }

    #[tokio::test]
    async fn test_agent_query_without_key_is_configuration_error() {
        let transport = Arc::new(MockTransport::new());
        let response = router(transport.clone())
            .oneshot(post_json("/api/agent-query", json!({"sql": "SELECT 1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Configuration error: AGENT_API_KEY not set");
        assert_eq!(transport.call_count(), 0);
    }
}
