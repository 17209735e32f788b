use reqwest::Method;

use crate::api::middleware::AppError;
use crate::models::ExecutionHandle;
use crate::services::transport::{path_segment, ServiceClient};

/// Retrieves the payload of a run that finished successfully
pub struct ResultFetcher {
    client: ServiceClient,
}

impl ResultFetcher {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// Returns the raw body. It is not parsed here, some result paths need
    /// last-mile text extraction in the normalizer.
    pub async fn fetch(&self, handle: &ExecutionHandle) -> Result<String, AppError> {
        let path = format!("/query-runs/{}/results?f=json", path_segment(&handle.run_id)?);
        let response = self.client.call(Method::GET, &path, &[], None).await?;

        if !response.is_success() {
            return Err(AppError::Fetch {
                status: response.status,
                detail: response.detail(),
            });
        }

        tracing::debug!(
            run_id = %handle.run_id,
            bytes = response.body.len(),
            "Fetched run results"
        );
        Ok(response.body)
    }
}
