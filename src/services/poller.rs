use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::{truncate_detail, AppError};
use crate::models::{ExecutionHandle, ExecutionStatus};
use crate::services::transport::{path_segment, ServiceClient, TransportResponse};

/// Timing of the status loop
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Total budget measured from submission of the run
    pub deadline: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(50),
        }
    }
}

/// Watches one run until it reaches a terminal status or the deadline passes
pub struct StatusPoller {
    client: ServiceClient,
    settings: PollSettings,
}

impl StatusPoller {
    pub fn new(client: ServiceClient, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Returns `Success` once observed. Failure statuses, the deadline and
    /// cancellation end the loop with an error.
    pub async fn wait_for_completion(
        &self,
        handle: &ExecutionHandle,
        cancel: &CancellationToken,
    ) -> Result<ExecutionStatus, AppError> {
        let path = format!("/query-runs/{}/status", path_segment(&handle.run_id)?);
        let mut last_status = ExecutionStatus::Created;
        let mut polls = 0u32;

        while handle.elapsed() < self.settings.deadline {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            // A slow status call must not stretch the deadline
            let remaining = self.settings.deadline.saturating_sub(handle.elapsed());
            if remaining.is_zero() {
                break;
            }

            polls += 1;
            let call = self.client.call(Method::GET, &path, &[], None);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                outcome = tokio::time::timeout(remaining, call) => outcome,
            };

            let response = match outcome {
                Err(_) => {
                    tracing::warn!(run_id = %handle.run_id, "Status call outlived the deadline");
                    break;
                }
                Ok(Err(AppError::Transport(e))) => {
                    tracing::warn!(run_id = %handle.run_id, "Transient status check failure: {}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(response)) => response,
            };

            if !response.is_success() {
                tracing::warn!(
                    run_id = %handle.run_id,
                    status = response.status,
                    "Status check returned an error response, retrying"
                );
                continue;
            }

            let (status, detail) = interpret_status(&response);
            tracing::debug!(run_id = %handle.run_id, poll = polls, "Run status: {}", status);

            match status {
                ExecutionStatus::Success => {
                    tracing::info!(
                        run_id = %handle.run_id,
                        "Run succeeded after {} polls ({} ms)",
                        polls,
                        handle.elapsed().as_millis()
                    );
                    return Ok(status);
                }
                s if s.is_failure() => {
                    tracing::warn!(run_id = %handle.run_id, "Run ended with status {}", s);
                    return Err(AppError::ExecutionFailed { status: s, detail });
                }
                s => last_status = s,
            }
        }

        tracing::warn!(
            run_id = %handle.run_id,
            "Run did not finish within {:?}, last status: {}",
            self.settings.deadline,
            last_status
        );

        Err(AppError::TimedOut {
            last_status,
            elapsed_ms: handle.elapsed().as_millis() as u64,
        })
    }
}

/// Read the run status from a status response. Bodies without a readable
/// status count as still running.
fn interpret_status(response: &TransportResponse) -> (ExecutionStatus, Option<String>) {
    let Some(body) = response.json() else {
        return (ExecutionStatus::Running, None);
    };

    let status = body
        .get("status")
        .or_else(|| body.get("state"))
        .and_then(Value::as_str)
        .map(ExecutionStatus::from_remote)
        .unwrap_or(ExecutionStatus::Running);

    let detail = match body.get("error") {
        Some(Value::String(s)) if !s.is_empty() => Some(truncate_detail(s)),
        Some(Value::Null) | None => None,
        Some(other) => Some(truncate_detail(&other.to_string())),
    };

    let detail = if status.is_failure() {
        detail.or_else(|| Some(response.detail()))
    } else {
        detail
    };

    (status, detail)
}
