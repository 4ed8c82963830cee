use async_trait::async_trait;
use dashscope_rt::transport::TaskBackend;
use dashscope_rt::{
    ApiError, AsyncTasks, Credentials, Error, Result, ServiceRequest, ServiceResult, TaskList, TaskListQuery, TaskStatus,
    WaitPolicy,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Replays scripted fetch responses; once the script runs out every fetch
/// reports `RUNNING`.
#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ServiceResult>>>,
    fetched: Mutex<Vec<String>>,
    polled_as: Mutex<Vec<Credentials>>,
    submitted: Mutex<Vec<ServiceRequest>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Result<ServiceResult>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn fetches(&self) -> usize {
        self.fetched.lock().len()
    }
}

fn task(status: &str) -> Result<ServiceResult> {
    Ok(ServiceResult::from_envelope(
        json!({"request_id": "req", "output": {"task_id": "t-1", "task_status": status}}),
        Some(200),
    ))
}

fn http_error(status: u16) -> Result<ServiceResult> {
    Err(Error::Api(ApiError::new("ServerError", "upstream").with_status(status)))
}

#[async_trait]
impl TaskBackend for ScriptedBackend {
    async fn submit(&self, request: &ServiceRequest) -> Result<ServiceResult> {
        self.submitted.lock().push(request.clone());
        task("PENDING")
    }

    async fn fetch(&self, task_id: &str, credentials: &Credentials) -> Result<ServiceResult> {
        self.fetched.lock().push(task_id.to_string());
        self.polled_as.lock().push(credentials.clone());
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| task("RUNNING"))
    }

    async fn cancel(&self, _task_id: &str, _credentials: &Credentials) -> Result<ServiceResult> {
        task("CANCELED")
    }

    async fn list(&self, query: &TaskListQuery, _credentials: &Credentials) -> Result<TaskList> {
        Ok(TaskList {
            request_id: Some("req".to_string()),
            data: vec![json!({"task_id": "t-1", "task_status": query.status.map(TaskStatus::as_str)})],
            total: 1,
            total_page: 1,
            page_no: query.page_no.map_or(1, u64::from),
            page_size: query.page_size.map_or(10, u64::from),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn terminal_status_on_first_poll_polls_once() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![task("SUCCEEDED")]));
    let start = Instant::now();
    let result = tasks.wait("t-1", WaitPolicy::default()).await.unwrap();
    assert_eq!(result.task_status(), TaskStatus::Succeeded);
    assert_eq!(tasks.backend().fetches(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn seven_running_polls_wait_thirteen_seconds() {
    let mut script: Vec<_> = (0..7).map(|_| task("RUNNING")).collect();
    script.push(task("SUCCEEDED"));
    let tasks = AsyncTasks::new(ScriptedBackend::new(script));

    let start = Instant::now();
    let result = tasks.wait("t-1", WaitPolicy::default()).await.unwrap();

    assert_eq!(result.task_status(), TaskStatus::Succeeded);
    assert_eq!(tasks.backend().fetches(), 8);
    assert_eq!(start.elapsed(), Duration::from_secs(1 + 1 + 1 + 2 + 2 + 2 + 4));
}

#[tokio::test(start_paused = true)]
async fn interval_is_capped_at_five_seconds() {
    let mut script: Vec<_> = (0..12).map(|_| task("PENDING")).collect();
    script.push(task("SUCCEEDED"));
    let tasks = AsyncTasks::new(ScriptedBackend::new(script));

    let start = Instant::now();
    tasks.wait("t-1", WaitPolicy::default()).await.unwrap();

    // 1,1,1 2,2,2 4,4,4 then 5,5,5
    assert_eq!(start.elapsed(), Duration::from_secs(3 + 6 + 12 + 15));
}

#[tokio::test(start_paused = true)]
async fn transient_errors_do_not_consume_a_backoff_step() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![
        task("RUNNING"),
        http_error(503),
        task("RUNNING"),
        http_error(504),
        task("RUNNING"),
        task("SUCCEEDED"),
    ]));

    let start = Instant::now();
    let result = tasks.wait("t-1", WaitPolicy::default()).await.unwrap();

    assert_eq!(result.task_status(), TaskStatus::Succeeded);
    assert_eq!(tasks.backend().fetches(), 6);
    // Three counted waits of 1s, plus two retries at the then-current 1s.
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn other_errors_abort_polling() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![task("RUNNING"), http_error(500), task("SUCCEEDED")]));
    match tasks.wait("t-1", WaitPolicy::default()).await {
        Err(Error::Api(err)) => assert_eq!(err.status_code, Some(500)),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(tasks.backend().fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_canceled_and_unknown_are_terminal() {
    let missing = Ok(ServiceResult::from_envelope(json!({"output": {"task_id": "t-1"}}), Some(200)));
    for (reply, status) in [
        (task("FAILED"), TaskStatus::Failed),
        (task("CANCELED"), TaskStatus::Canceled),
        (missing, TaskStatus::Unknown),
    ] {
        let tasks = AsyncTasks::new(ScriptedBackend::new(vec![reply]));
        let result = tasks.wait("t-1", WaitPolicy::default()).await.unwrap();
        assert_eq!(result.task_status(), status);
        assert_eq!(tasks.backend().fetches(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn wait_policy_timeout_stops_polling() {
    let tasks = AsyncTasks::new(ScriptedBackend::default());
    let start = Instant::now();
    let err = tasks
        .wait("t-1", WaitPolicy::with_timeout(Duration::from_secs(3)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_secs(3)));
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn call_submits_then_waits_on_the_returned_task() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![task("RUNNING"), task("SUCCEEDED")]));
    let request = ServiceRequest::builder("wanx-v1")
        .endpoint("aigc", "text2image", "image-synthesis")
        .input(json!({"prompt": "a lighthouse at dusk"}))
        .build();

    let result = tasks.call(&request, WaitPolicy::default()).await.unwrap();

    assert_eq!(result.task_status(), TaskStatus::Succeeded);
    assert_eq!(tasks.backend().submitted.lock()[0].model, "wanx-v1");
    assert_eq!(*tasks.backend().fetched.lock(), vec!["t-1".to_string(), "t-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn call_polls_with_the_submitted_request_key() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![task("RUNNING"), task("SUCCEEDED")]))
        .with_credentials(Credentials::default().api_key("sk-default").workspace("ws-default"));
    let request = ServiceRequest::builder("wanx-v1")
        .endpoint("aigc", "text2image", "image-synthesis")
        .api_key("sk-request")
        .build();

    tasks.call(&request, WaitPolicy::default()).await.unwrap();

    let expected = Credentials::default().api_key("sk-request").workspace("ws-default");
    assert_eq!(*tasks.backend().polled_as.lock(), vec![expected.clone(), expected]);

    tasks.backend().script.lock().push_back(task("SUCCEEDED"));
    tasks.wait("t-1", WaitPolicy::default()).await.unwrap();
    let last = tasks.backend().polled_as.lock().last().cloned().unwrap();
    assert_eq!(last.api_key.as_deref(), Some("sk-default"));
}

#[tokio::test]
async fn fetch_cancel_and_list_pass_through() {
    let tasks = AsyncTasks::new(ScriptedBackend::new(vec![task("PENDING")]));
    assert_eq!(tasks.fetch("t-1").await.unwrap().task_status(), TaskStatus::Pending);
    assert_eq!(tasks.cancel("t-1").await.unwrap().task_status(), TaskStatus::Canceled);

    let query = TaskListQuery {
        status: Some(TaskStatus::Running),
        page_no: Some(2),
        page_size: Some(5),
        ..TaskListQuery::default()
    };
    let list = tasks.list(&query).await.unwrap();
    assert_eq!(list.page_no, 2);
    assert_eq!(list.data[0]["task_status"], "RUNNING");
}
