pub mod query;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::{AgentQueryService, QueryExecutor};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub executor: Arc<QueryExecutor>,
    pub agent: Arc<AgentQueryService>,
    /// Cancelled on shutdown; in-flight pipelines stop polling
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        executor: QueryExecutor,
        agent: AgentQueryService,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            agent: Arc::new(agent),
            shutdown,
        }
    }

    /// Wire the HTTP-backed services from configuration
    pub fn from_config(config: Config, shutdown: CancellationToken) -> Result<Self, AppError> {
        let executor = QueryExecutor::from_config(&config.explorer)?;
        let agent = AgentQueryService::from_config(&config.agent)?;
        Ok(Self::new(config, executor, agent, shutdown))
    }
}
