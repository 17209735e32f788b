use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;
use crate::config::ExplorerConfig;
use crate::models::{ExecutionHandle, NormalizationOutcome, QueryRequest, ResultSet};
use crate::services::fetcher::ResultFetcher;
use crate::services::normalizer;
use crate::services::poller::{PollSettings, StatusPoller};
use crate::services::submitter::QuerySubmitter;
use crate::services::transport::{Credential, ReqwestTransport, ServiceClient, Transport};

/// Completed query: the run that produced it and its rows
#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub run_id: String,
    pub result: ResultSet,
}

/// Pipeline stages of one execution
#[derive(Debug)]
enum PipelineState {
    Submitting,
    Polling(ExecutionHandle),
    Fetching(ExecutionHandle),
    Normalizing(ExecutionHandle, String),
    Done(QueryExecution),
    Failed(AppError),
}

impl PipelineState {
    fn name(&self) -> &'static str {
        match self {
            PipelineState::Submitting => "submitting",
            PipelineState::Polling(_) => "polling",
            PipelineState::Fetching(_) => "fetching",
            PipelineState::Normalizing(..) => "normalizing",
            PipelineState::Done(_) => "done",
            PipelineState::Failed(_) => "failed",
        }
    }
}

/// Runs a query end to end on the explorer:
/// submit, poll until terminal or deadline, fetch, normalize.
///
/// A single pass with no retries of its own; the first error ends the run.
pub struct QueryExecutor {
    submitter: QuerySubmitter,
    poller: StatusPoller,
    fetcher: ResultFetcher,
}

impl QueryExecutor {
    pub fn new(client: ServiceClient, settings: PollSettings) -> Self {
        Self {
            submitter: QuerySubmitter::new(client.clone()),
            poller: StatusPoller::new(client.clone(), settings),
            fetcher: ResultFetcher::new(client),
        }
    }

    /// Build an executor talking to the configured explorer over HTTP
    pub fn from_config(config: &ExplorerConfig) -> Result<Self, AppError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let credential = Credential::new("X-API-KEY", config.api_key.clone(), "EXPLORER_API_KEY");
        let client = ServiceClient::new(transport, &config.base_url, credential);

        Ok(Self::new(
            client,
            PollSettings {
                interval: config.poll_interval(),
                deadline: config.deadline(),
            },
        ))
    }

    pub async fn execute(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryExecution, AppError> {
        let started = Instant::now();
        let mut state = PipelineState::Submitting;

        loop {
            tracing::debug!(state = state.name(), "Query pipeline step");
            state = match state {
                PipelineState::Submitting => match self.submitter.submit(request).await {
                    Ok(handle) => PipelineState::Polling(handle),
                    Err(e) => PipelineState::Failed(e),
                },
                PipelineState::Polling(handle) => {
                    match self.poller.wait_for_completion(&handle, cancel).await {
                        Ok(_) => PipelineState::Fetching(handle),
                        Err(e) => PipelineState::Failed(e),
                    }
                }
                PipelineState::Fetching(handle) => match self.fetcher.fetch(&handle).await {
                    Ok(body) => PipelineState::Normalizing(handle, body),
                    Err(e) => PipelineState::Failed(e),
                },
                PipelineState::Normalizing(handle, body) => match normalizer::normalize(&body) {
                    NormalizationOutcome::Rows(result) => PipelineState::Done(QueryExecution {
                        run_id: handle.run_id,
                        result,
                    }),
                    NormalizationOutcome::NoData => {
                        tracing::info!(run_id = %handle.run_id, "Run returned no rows");
                        PipelineState::Done(QueryExecution {
                            run_id: handle.run_id,
                            result: ResultSet::empty(),
                        })
                    }
                    NormalizationOutcome::Unparseable {
                        content_types,
                        fragment,
                    } => PipelineState::Failed(AppError::UnparseableResult {
                        content_types,
                        fragment,
                    }),
                },
                PipelineState::Done(execution) => {
                    tracing::info!(
                        run_id = %execution.run_id,
                        rows = execution.result.row_count(),
                        "Query completed in {} ms",
                        started.elapsed().as_millis()
                    );
                    return Ok(execution);
                }
                PipelineState::Failed(e) => {
                    tracing::warn!("Query pipeline failed after {} ms: {}", started.elapsed().as_millis(), e);
                    return Err(e);
                }
            };
        }
    }
}
