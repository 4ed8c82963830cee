use dashscope_rt::{
    ClientConfig, DashScope, Error, PollBackoff, ServiceRequest, TaskListQuery, TaskStatus, WaitPolicy,
};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATION_PATH: &str = "/api/v1/services/aigc/text-generation/generation";
const IMAGE_PATH: &str = "/api/v1/services/aigc/text2image/image-synthesis";

fn client(server: &MockServer, config: ClientConfig) -> DashScope {
    DashScope::new(config.http_base_url(format!("{}/api/v1", server.uri()))).unwrap()
}

fn keyed(server: &MockServer) -> DashScope {
    client(server, ClientConfig::new().api_key("sk-test"))
}

fn generation_request() -> ServiceRequest {
    ServiceRequest::builder("qwen-turbo")
        .endpoint("aigc", "text-generation", "generation")
        .input(json!({"prompt": "hello"}))
        .build()
}

fn image_request() -> ServiceRequest {
    ServiceRequest::builder("wanx-v1")
        .endpoint("aigc", "text2image", "image-synthesis")
        .input(json!({"prompt": "a lighthouse at dusk"}))
        .build()
}

fn task_body(status: &str) -> serde_json::Value {
    json!({"request_id": "req", "output": {"task_id": "t-1", "task_status": status}})
}

fn fast_backoff() -> PollBackoff {
    PollBackoff::new(Duration::from_millis(10), Duration::from_millis(40), 3)
}

#[tokio::test]
async fn call_posts_the_body_and_reads_the_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "qwen-turbo", "input": {"prompt": "hello"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "r1",
            "output": {"text": "hi"},
            "usage": {"total_tokens": 5}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = keyed(&server).half_duplex().call(&generation_request()).await.unwrap();

    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.request_id.as_deref(), Some("r1"));
    assert_eq!(result.output().unwrap()["text"], "hi");
    assert_eq!(result.usage.unwrap().total_tokens, Some(5));

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("x-dashscope-async").is_none());
    assert!(received[0].headers.get("x-dashscope-sse").is_none());
}

#[tokio::test]
async fn error_body_maps_to_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "InvalidParameter",
            "message": "prompt is too long",
            "request_id": "r2"
        })))
        .mount(&server)
        .await;

    match keyed(&server).half_duplex().call(&generation_request()).await {
        Err(Error::Api(err)) => {
            assert_eq!(err.status_code, Some(400));
            assert_eq!(err.code.as_deref(), Some("InvalidParameter"));
            assert_eq!(err.message, "prompt is too long");
            assert_eq!(err.request_id.as_deref(), Some("r2"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_falls_back_to_the_status_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    match keyed(&server).half_duplex().call(&generation_request()).await {
        Err(Error::Api(err)) => {
            assert_eq!(err.status_code, Some(500));
            assert_eq!(err.code, None);
            assert_eq!(err.message, "Internal Server Error");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn stream_call_decodes_server_sent_events() {
    let server = MockServer::start().await;
    let body = "id:1\nevent:result\n:HTTP_STATUS/200\ndata:{\"output\":{\"text\":\"Hi\"},\"request_id\":\"r3\"}\n\n\
        id:2\nevent:result\n:HTTP_STATUS/200\ndata:{\"output\":{\"text\":\"Hi there\"},\"request_id\":\"r3\"}\n\n";
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .and(header("x-dashscope-sse", "enable"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let results = keyed(&server).half_duplex().stream_call(&generation_request()).await.unwrap();
    let texts: Vec<String> = results
        .map(|result| result.unwrap().output().unwrap()["text"].as_str().unwrap().to_string())
        .collect()
        .await;
    assert_eq!(texts, vec!["Hi", "Hi there"]);
}

#[tokio::test]
async fn stream_call_error_block_ends_the_stream() {
    let server = MockServer::start().await;
    let body = "id:1\nevent:result\ndata:{\"output\":{\"text\":\"par\"}}\n\n\
        id:2\nevent:error\n:HTTP_STATUS/400\ndata:{\"code\":\"DataInspectionFailed\",\"message\":\"blocked\",\"request_id\":\"r4\"}\n\n";
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut results = keyed(&server).half_duplex().stream_call(&generation_request()).await.unwrap();
    assert_eq!(results.next().await.unwrap().unwrap().output().unwrap()["text"], "par");
    match results.next().await {
        Some(Err(Error::Api(err))) => {
            assert_eq!(err.code.as_deref(), Some("DataInspectionFailed"));
            assert_eq!(err.request_id.as_deref(), Some("r4"));
        }
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(results.next().await.is_none());
}

#[tokio::test]
async fn stream_call_rejected_outright_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATION_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "InvalidApiKey",
            "message": "Invalid API-key provided."
        })))
        .mount(&server)
        .await;

    match keyed(&server).half_duplex().stream_call(&generation_request()).await {
        Err(Error::Api(err)) => {
            assert_eq!(err.status_code, Some(401));
            assert_eq!(err.code.as_deref(), Some("InvalidApiKey"));
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("stream opened despite a 401"),
    }
}

#[tokio::test]
async fn submit_enables_async_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .and(header("x-dashscope-async", "enable"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("PENDING")))
        .expect(1)
        .mount(&server)
        .await;

    let submitted = keyed(&server).tasks().submit(&image_request()).await.unwrap();
    assert_eq!(submitted.task_id(), Some("t-1"));
    assert_eq!(submitted.task_status(), TaskStatus::Pending);
}

#[tokio::test]
async fn fetch_cancel_and_list_hit_the_task_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/t-1"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("RUNNING")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tasks/t-1/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("CANCELED")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks"))
        .and(query_param("model_name", "wanx-v1"))
        .and(query_param("status", "RUNNING"))
        .and(query_param("page_size", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "req",
            "data": [{"task_id": "t-1", "task_status": "RUNNING"}],
            "total": 1,
            "total_page": 1,
            "page_no": 1,
            "page_size": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tasks = keyed(&server).tasks();
    assert_eq!(tasks.fetch("t-1").await.unwrap().task_status(), TaskStatus::Running);
    assert_eq!(tasks.cancel("t-1").await.unwrap().task_status(), TaskStatus::Canceled);

    let query = TaskListQuery {
        model_name: Some("wanx-v1".to_string()),
        status: Some(TaskStatus::Running),
        page_size: Some(5),
        ..TaskListQuery::default()
    };
    let list = tasks.list(&query).await.unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.page_size, 5);
    assert_eq!(list.data[0]["task_id"], "t-1");

    let received = server.received_requests().await.unwrap();
    let list_url = &received.last().unwrap().url;
    assert!(list_url.query_pairs().all(|(key, _)| key != "page_no"));
}

#[tokio::test]
async fn wait_retries_a_real_503() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/t-1"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "code": "ServiceUnavailable",
            "message": "try again"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/t-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("SUCCEEDED")))
        .mount(&server)
        .await;

    let tasks = keyed(&server).tasks().with_backoff(fast_backoff());
    let result = tasks
        .wait("t-1", WaitPolicy::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(result.task_status(), TaskStatus::Succeeded);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn wait_aborts_on_a_non_transient_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/t-1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "NotFound",
            "message": "task not found"
        })))
        .mount(&server)
        .await;

    let tasks = keyed(&server).tasks().with_backoff(fast_backoff());
    match tasks.wait("t-1", WaitPolicy::with_timeout(Duration::from_secs(5))).await {
        Err(Error::Api(err)) => assert_eq!(err.status_code, Some(404)),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn request_key_reaches_the_polls_on_a_keyless_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(IMAGE_PATH))
        .and(header("authorization", "Bearer sk-request"))
        .and(header("x-dashscope-workspace", "ws-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("PENDING")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/tasks/t-1"))
        .and(header("authorization", "Bearer sk-request"))
        .and(header("x-dashscope-workspace", "ws-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_body("SUCCEEDED")))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = image_request();
    request.api_key = Some("sk-request".to_string());
    request.workspace = Some("ws-request".to_string());

    let tasks = client(&server, ClientConfig::new()).tasks().with_backoff(fast_backoff());
    let result = tasks
        .call(&request, WaitPolicy::with_timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.task_status(), TaskStatus::Succeeded);

    assert!(matches!(tasks.fetch("t-1").await, Err(Error::NoApiKey)));
}
