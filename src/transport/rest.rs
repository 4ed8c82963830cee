use crate::config::{ClientConfig, Credentials, HEADER_ASYNC, HEADER_SSE};
use crate::error::{ApiError, Error, Result};
use crate::protocol::{ServiceRequest, ServiceResult, TaskList, TaskListQuery};
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;

/// The async-task REST surface, as seen by the poller.
///
/// Every call after `submit` carries the credentials the task was created
/// with, so a task submitted under a request-level key stays reachable.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Create call; the returned output carries `task_id` and `task_status`.
    async fn submit(&self, request: &ServiceRequest) -> Result<ServiceResult>;
    async fn fetch(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult>;
    async fn cancel(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult>;
    async fn list(&self, query: &TaskListQuery, credentials: &Credentials) -> Result<TaskList>;
}

/// An adapter for the DashScope REST API.
#[derive(Clone, Debug)]
pub struct RestClient {
    client: Client,
    config: Arc<ClientConfig>,
}

impl RestClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.http_base_url.trim_end_matches('/'), path)
    }

    #[allow(clippy::result_large_err)]
    fn service_post(&self, request: &ServiceRequest) -> Result<RequestBuilder> {
        request.validate_endpoint()?;
        let mut headers = self.config.headers_for(request)?;
        if request.is_async {
            headers.insert(HEADER_ASYNC, HeaderValue::from_static("enable"));
        }
        let body = request.http_body();
        tracing::trace!(
            "POST {}: {}",
            request.service_path(),
            safe_truncate(&body.to_string(), TRACE_LOG_MAX_BYTES)
        );
        Ok(self.client.post(self.url(&request.service_path())).headers(headers).json(&body))
    }

    /// One request, one accumulated result.
    ///
    /// # Errors
    /// Returns `InputRequired`/`NoApiKey` before I/O, `Api` for non-success
    /// responses, and `Http` for transport failures.
    pub async fn call(&self, request: &ServiceRequest) -> Result<ServiceResult> {
        let res = self.service_post(request)?.send().await?;
        read_envelope(res).await
    }

    /// One request, a stream of partial results decoded from server-sent events.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent or is rejected outright.
    pub async fn stream_call(
        &self,
        request: &ServiceRequest,
    ) -> Result<BoxStream<'static, Result<ServiceResult>>> {
        let res = self
            .service_post(request)?
            .header(HEADER_SSE, "enable")
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let res = check_status(res).await?;
        Ok(super::sse::result_stream(res.bytes_stream()))
    }
}

#[async_trait]
impl TaskBackend for RestClient {
    async fn submit(&self, request: &ServiceRequest) -> Result<ServiceResult> {
        let mut request = request.clone();
        request.is_async = true;
        self.call(&request).await
    }

    async fn fetch(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult> {
        let res = self
            .client
            .get(self.url(&format!("tasks/{task_id}")))
            .headers(self.config.auth_headers(credentials)?)
            .send()
            .await?;
        read_envelope(res).await
    }

    async fn cancel(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult> {
        let res = self
            .client
            .post(self.url(&format!("tasks/{task_id}/cancel")))
            .headers(self.config.auth_headers(credentials)?)
            .send()
            .await?;
        read_envelope(res).await
    }

    async fn list(&self, query: &TaskListQuery, credentials: &Credentials) -> Result<TaskList> {
        let res = self
            .client
            .get(self.url("tasks"))
            .headers(self.config.auth_headers(credentials)?)
            .query(query)
            .send()
            .await?;
        let res = check_status(res).await?;
        Ok(res.json().await?)
    }
}

async fn read_envelope(res: Response) -> Result<ServiceResult> {
    let res = check_status(res).await?;
    let status = res.status().as_u16();
    let body: Value = res.json().await?;
    tracing::trace!("Response: {}", safe_truncate(&body.to_string(), TRACE_LOG_MAX_BYTES));
    Ok(ServiceResult::from_envelope(body, Some(status)))
}

/// Map a non-success response to `Error::Api`, keeping the service's error
/// code and request id when the body carries them.
async fn check_status(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    let mut err = serde_json::from_str::<ApiError>(&text).unwrap_or_else(|_| ApiError {
        message: if text.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            text
        },
        ..ApiError::default()
    });
    err.status_code = Some(status.as_u16());
    tracing::debug!("HTTP request failed: {err}");
    Err(Error::Api(err))
}
