//! REST client for the remote task server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{FilterSpec, NetworkError, StatusFilter, Task, TaskError, TaskId};

/// The remote task collection.
///
/// [`RestTaskStore`] talks to the HTTP server; tests substitute in-memory
/// implementations.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// List tasks, narrowed server-side by the filter's status, priority and search.
    async fn list(&self, spec: &FilterSpec) -> Result<Vec<Task>, TaskError>;

    /// Fetch one task.
    async fn get(&self, id: &TaskId) -> Result<Task, TaskError>;

    /// Create a task from its full representation.
    async fn create(&self, task: &Task) -> Result<Task, TaskError>;

    /// Replace a task with its full representation.
    async fn update(&self, task: &Task) -> Result<Task, TaskError>;

    /// Delete a task.
    async fn delete(&self, id: &TaskId) -> Result<(), TaskError>;
}

/// Connection settings for [`RestTaskStore`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, without trailing slash.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Retries for transient failures of GET requests.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// HTTP client for the `/tasks` REST API.
pub struct RestTaskStore {
    http: Client,
    base_url: String,
    max_retries: u32,
}

impl RestTaskStore {
    /// Create a client with default settings for the given server URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TaskError> {
        Self::with_config(ClientConfig::new(base_url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, TaskError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    /// Get the server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.base_url)
    }

    fn task_url(&self, id: &TaskId) -> String {
        format!("{}/tasks/{}", self.base_url, id)
    }

    /// Query parameters for a list request. `All` filters and blank searches
    /// are left out.
    fn list_query(spec: &FilterSpec) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        match spec.status {
            StatusFilter::All => {}
            StatusFilter::Completed => params.push(("completed", "true".to_string())),
            StatusFilter::Pending => params.push(("completed", "false".to_string())),
        }
        if let Some(priority) = spec.priority.priority() {
            params.push(("priority", priority.to_string()));
        }
        if let Some(term) = spec.search_term() {
            params.push(("q", term.to_string()));
        }
        params
    }

    /// Send an idempotent GET, retrying transient failures with backoff.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        operation: &str,
        id: Option<&TaskId>,
        request: impl Fn() -> RequestBuilder,
    ) -> Result<T, TaskError> {
        let mut attempt = 0;
        loop {
            let result = match request().send().await {
                Ok(response) => {
                    if let (Some(id), StatusCode::NOT_FOUND) = (id, response.status()) {
                        return Err(TaskError::NotFound { id: id.clone() });
                    }
                    self.handle_response(response).await
                }
                Err(e) => Err(NetworkError::Http(e)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = backoff_delay(attempt);
                    debug!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient error in {}, retrying",
                        operation
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Turn a response into a decoded body or an error.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, NetworkError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.map_err(|e| {
                NetworkError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| NetworkError::InvalidResponse(format!("malformed task JSON: {}", e)))
    }

    /// Map a single-task write response, translating 404 into `NotFound`.
    async fn handle_write(&self, id: &TaskId, response: reqwest::Response) -> Result<Task, TaskError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(TaskError::NotFound { id: id.clone() });
        }
        Ok(self.handle_response(response).await?)
    }
}

#[async_trait]
impl TaskStore for RestTaskStore {
    async fn list(&self, spec: &FilterSpec) -> Result<Vec<Task>, TaskError> {
        let url = self.tasks_url();
        let params = Self::list_query(spec);
        debug!(?params, "listing tasks");

        self.get_with_retry("list", None, || self.http.get(&url).query(&params))
            .await
    }

    async fn get(&self, id: &TaskId) -> Result<Task, TaskError> {
        let url = self.task_url(id);
        self.get_with_retry("get", Some(id), || self.http.get(&url))
            .await
    }

    async fn create(&self, task: &Task) -> Result<Task, TaskError> {
        debug!(id = %task.id, "creating task");
        let response = self.http.post(self.tasks_url()).json(task).send().await?;
        Ok(self.handle_response(response).await?)
    }

    async fn update(&self, task: &Task) -> Result<Task, TaskError> {
        debug!(id = %task.id, "updating task");
        let response = self
            .http
            .put(self.task_url(&task.id))
            .json(task)
            .send()
            .await?;
        self.handle_write(&task.id, response).await
    }

    async fn delete(&self, id: &TaskId) -> Result<(), TaskError> {
        debug!(id = %id, "deleting task");
        let response = self.http.delete(self.task_url(id)).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(TaskError::NotFound { id: id.clone() });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(id = %id, status = status.as_u16(), "delete rejected");
            return Err(NetworkError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(())
    }
}

/// Delay before retry number `attempt + 1`: 500ms, 1s, 2s, capped at 16s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(500u64 << attempt.min(5))
}
