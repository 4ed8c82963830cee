//! Asynchronous tasks: submit once, then poll the task endpoint with a
//! bounded backoff until the task reaches a terminal status.

use crate::config::Credentials;
use crate::error::{ApiError, Error, Result};
use crate::protocol::{ServiceRequest, ServiceResult, TaskList, TaskListQuery};
use crate::transport::{RestClient, TaskBackend};
use std::time::Duration;

/// Poll interval schedule: starts at `initial`, doubles after every
/// `doubling_every` waits and never exceeds `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    initial: Duration,
    ceiling: Duration,
    doubling_every: u32,
    current: Duration,
    waits: u32,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5), 3)
    }
}

impl PollBackoff {
    #[must_use]
    pub fn new(initial: Duration, ceiling: Duration, doubling_every: u32) -> Self {
        Self {
            initial,
            ceiling,
            doubling_every: doubling_every.max(1),
            current: initial.min(ceiling),
            waits: 0,
        }
    }

    /// The interval the next wait would use.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Number of waits consumed so far.
    #[must_use]
    pub const fn waits(&self) -> u32 {
        self.waits
    }

    /// Consume one step and return the interval to wait for it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.waits += 1;
        if self.waits % self.doubling_every == 0 {
            self.current = self.current.saturating_mul(2).min(self.ceiling);
        }
        delay
    }

    /// Back to the initial interval.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.ceiling);
        self.waits = 0;
    }
}

/// Limits on how long [`AsyncTasks::wait`] may poll. By default it polls
/// until the task is terminal, however long that takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout: Some(timeout) }
    }
}

/// Submit, poll, fetch, cancel and list asynchronous tasks.
///
/// Status calls authenticate with [`credentials`](Self::with_credentials)
/// over the client configuration; [`call`](Self::call) uses the submitted
/// request's own key and workspace first.
#[derive(Debug, Clone)]
pub struct AsyncTasks<B = RestClient> {
    backend: B,
    backoff: PollBackoff,
    credentials: Credentials,
}

impl<B: TaskBackend> AsyncTasks<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            backoff: PollBackoff::default(),
            credentials: Credentials::default(),
        }
    }

    /// Key and workspace for `wait`, `fetch`, `cancel` and `list`.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the default 1s/x2 every 3 polls/5s schedule.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Create the task. The result's output carries `task_id` and `task_status`.
    ///
    /// # Errors
    /// Returns `InputRequired`/`NoApiKey` before I/O, `Api` if the create call fails.
    pub async fn submit(&self, request: &ServiceRequest) -> Result<ServiceResult> {
        let result = self.backend.submit(request).await?;
        tracing::debug!(task_id = ?result.task_id(), status = result.task_status().as_str(), "Task submitted");
        Ok(result)
    }

    /// One status read, without waiting.
    ///
    /// # Errors
    /// Returns `Api` if the query fails.
    pub async fn fetch(&self, task_id: &str) -> Result<ServiceResult> {
        self.backend.fetch(task_id, &self.credentials).await
    }

    /// Ask the service to cancel a pending task.
    ///
    /// # Errors
    /// Returns `Api` if the service refuses.
    pub async fn cancel(&self, task_id: &str) -> Result<ServiceResult> {
        self.backend.cancel(task_id, &self.credentials).await
    }

    /// # Errors
    /// Returns `Api` if the query fails.
    pub async fn list(&self, query: &TaskListQuery) -> Result<TaskList> {
        self.backend.list(query, &self.credentials).await
    }

    /// Poll until the task reaches a terminal status and return that result.
    /// A `FAILED` or `CANCELED` task is still returned as a result.
    ///
    /// # Errors
    /// Returns `Timeout` if the policy's timeout expires, or the first
    /// non-transient polling error.
    pub async fn wait(&self, task_id: &str, policy: WaitPolicy) -> Result<ServiceResult> {
        self.wait_as(task_id, &self.credentials, policy).await
    }

    async fn wait_as(
        &self,
        task_id: &str,
        credentials: &Credentials,
        policy: WaitPolicy,
    ) -> Result<ServiceResult> {
        match policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.poll(task_id, credentials))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => self.poll(task_id, credentials).await,
        }
    }

    /// Submit and wait. Polling authenticates like the submit did.
    ///
    /// # Errors
    /// Any error from [`submit`](Self::submit) or [`wait`](Self::wait); `Api`
    /// if the create response carries no task id.
    pub async fn call(&self, request: &ServiceRequest, policy: WaitPolicy) -> Result<ServiceResult> {
        let submitted = self.submit(request).await?;
        let task_id = submitted.task_id().map(str::to_owned).ok_or_else(|| {
            Error::Api(
                ApiError::new("MissingTaskId", "create response carries no task_id")
                    .with_request_id(submitted.request_id.clone()),
            )
        })?;
        let credentials = Credentials::from_request(request).or(&self.credentials);
        self.wait_as(&task_id, &credentials, policy).await
    }

    async fn poll(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult> {
        let mut backoff = self.backoff;
        backoff.reset();
        let mut polls: u32 = 0;
        loop {
            match self.backend.fetch(task_id, credentials).await {
                Ok(result) => {
                    polls += 1;
                    let status = result.task_status();
                    if status.is_terminal() {
                        tracing::debug!(task_id, polls, status = status.as_str(), "Task finished");
                        return Ok(result);
                    }
                    let delay = backoff.next_delay();
                    tracing::debug!(task_id, polls, status = status.as_str(), ?delay, "Task pending");
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    let delay = backoff.current();
                    tracing::warn!(task_id, ?delay, "Transient error while polling: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
