// HTTP plumbing shared by the explorer and agent clients.
//
// `Transport` is the raw wire; `ServiceClient` binds it to one remote service,
// its base URL and its credential header. Non-2xx statuses are returned as
// ordinary responses, only network failures become errors.

use anyhow::Context;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::api::middleware::{truncate_detail, AppError};

/// Fully resolved request handed to a transport
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Raw status and body, uninterpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parsed body, or `None` when it is not JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Body cut down for error payloads and logs
    pub fn detail(&self) -> String {
        truncate_detail(&self.body)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, AppError>;
}

/// Transport backed by a pooled reqwest client
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            AppError::Transport(format!("{} {} failed: {}", request.method, request.url, e))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            AppError::Transport(format!("Failed to read response body from {}: {}", request.url, e))
        })?;

        Ok(TransportResponse { status, body })
    }
}

/// Percent-encode an identifier so it fills exactly one path segment.
///
/// Dot segments are refused since URL resolution would collapse them.
pub fn path_segment(id: &str) -> Result<String, AppError> {
    if matches!(id, "" | "." | "..") {
        return Err(AppError::Validation(format!("Invalid identifier '{}'", id)));
    }

    let mut url = Url::parse("http://segment.local/").context("Failed to build segment encoder")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Segment encoder URL cannot be a base"))?
        .pop_if_empty()
        .push(id);

    Ok(url.path().trim_start_matches('/').to_string())
}

/// Static credential attached to every call of a `ServiceClient`
#[derive(Clone)]
pub struct Credential {
    header: &'static str,
    value: Option<String>,
    /// Where the value is configured, used in error messages
    source: &'static str,
}

impl Credential {
    pub fn new(header: &'static str, value: Option<String>, source: &'static str) -> Self {
        Self {
            header,
            value: value.filter(|v| !v.trim().is_empty()),
            source,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.value.is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("header", &self.header)
            .field("value", &self.value.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .finish()
    }
}

/// Client for one remote service: base URL plus credential over a transport
#[derive(Clone)]
pub struct ServiceClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    credential: Credential,
}

impl ServiceClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str, credential: Credential) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one call. Fails with `Configuration` before touching the network
    /// when the credential is missing.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<TransportResponse, AppError> {
        let key = self
            .credential
            .value
            .as_ref()
            .ok_or_else(|| AppError::Configuration(format!("{} not set", self.credential.source)))?;

        let mut all_headers = Vec::with_capacity(headers.len() + 1);
        all_headers.push((self.credential.header.to_string(), key.clone()));
        all_headers.extend(headers.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let request = TransportRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            headers: all_headers,
            body,
        };

        tracing::debug!("{} {}", request.method, request.url);
        let response = self.transport.send(request).await?;
        tracing::debug!(status = response.status, "Response received from {}", path);

        Ok(response)
    }
}

/// Scripted in-memory transport for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum MockReply {
        Respond(TransportResponse),
        /// Network-level failure
        Fail(String),
        /// Respond only after the delay has passed
        Delayed(Duration, TransportResponse),
    }

    pub fn json_reply(status: u16, body: Value) -> MockReply {
        MockReply::Respond(TransportResponse::new(status, body.to_string()))
    }

    pub fn text_reply(status: u16, body: &str) -> MockReply {
        MockReply::Respond(TransportResponse::new(status, body))
    }

    struct Route {
        method: Method,
        path: String,
        replies: VecDeque<MockReply>,
    }

    /// Routes match on method and URL suffix. The last queued reply of a
    /// route repeats once the earlier ones are used up.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<Route>>,
        calls: Mutex<Vec<TransportRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, method: Method, path: &str, reply: MockReply) -> Self {
            {
                let mut routes = self.routes.lock().unwrap();
                let existing = routes.iter().position(|r| r.method == method && r.path == path);
                match existing {
                    Some(index) => routes[index].replies.push_back(reply),
                    None => routes.push(Route {
                        method,
                        path: path.to_string(),
                        replies: VecDeque::from([reply]),
                    }),
                }
            }
            self
        }

        pub fn calls(&self) -> Vec<TransportRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls_to(&self, path: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.url.ends_with(path))
                .count()
        }

        fn next_reply(&self, request: &TransportRequest) -> Option<MockReply> {
            let mut routes = self.routes.lock().unwrap();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && request.url.ends_with(&r.path))?;
            if route.replies.len() > 1 {
                route.replies.pop_front()
            } else {
                route.replies.front().cloned()
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, AppError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.next_reply(&request) {
                Some(MockReply::Respond(response)) => Ok(response),
                Some(MockReply::Fail(message)) => Err(AppError::Transport(message)),
                Some(MockReply::Delayed(delay, response)) => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
                None => Ok(TransportResponse::new(404, "no mock route")),
            }
        }
    }
}
