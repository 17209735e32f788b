use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{AgentQueryRequest, ExecuteQueryRequest, ExecuteQueryResponse};

/// Run SQL or a saved query on the explorer and return normalized rows
pub async fn execute_query(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteQueryRequest>, JsonRejection>,
) -> Result<Json<ExecuteQueryResponse>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let request = payload.into_query_request(state.config.explorer.default_row_limit)?;

    match &request.saved_query_id {
        Some(id) => tracing::info!("Executing saved query {} (limit {})", id, request.row_limit),
        None => tracing::info!("Executing ad hoc query (limit {})", request.row_limit),
    }

    let cancel = state.shutdown.child_token();
    let execution = state.executor.execute(&request, &cancel).await?;

    Ok(Json(ExecuteQueryResponse::new(execution.result, Some(execution.run_id))))
}

/// Run SQL through the agent path
pub async fn execute_agent_query(
    State(state): State<AppState>,
    payload: Result<Json<AgentQueryRequest>, JsonRejection>,
) -> Result<Json<ExecuteQueryResponse>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let sql = payload
        .sql
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Missing sql field".to_string()))?;

    tracing::info!("Executing agent query");
    let cancel = state.shutdown.child_token();
    let result = tokio::select! {
        _ = cancel.cancelled() => return Err(AppError::Cancelled),
        result = state.agent.run(sql.trim()) => result?,
    };

    Ok(Json(ExecuteQueryResponse::new(result, None)))
}

/// Fallback for verbs the query routes do not serve
pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
