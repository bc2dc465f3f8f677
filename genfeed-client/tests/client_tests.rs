//! End-to-end tests against a mock backend served by axum on a random port.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::DateTime;
use futures::StreamExt;
use genfeed_client::{
    ClientError, ConnectionStatus, EventStreamClient, HttpTaskApi, LoadOutcome,
    PaginationController, SessionCredential, SubmitRequest, TaskApi, TaskFeed, TaskFeedOptions,
};
use genfeed_core::config::{BackoffStrategy, EndpointsConfig, GenfeedConfig, ReconnectConfig};
use genfeed_core::{GenerationKind, Page, Signal, Task, TaskId, TaskListReconciler, TaskStatus};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ── Helpers ───────────────────────────────────────────────────────────────────

const TOKEN: &str = "test-session-token";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn make_task(id: TaskId, status: TaskStatus) -> Task {
    Task {
        id,
        prompt: format!("prompt {id}"),
        status,
        result_ref: None,
        created_at: DateTime::from_timestamp_millis(1_700_000_000_000 - id * 1_000).unwrap(),
        r#type: Some(GenerationKind::Image),
    }
}

fn make_page(ids: std::ops::RangeInclusive<TaskId>, next: Option<&str>) -> Page {
    Page {
        content: ids.map(|id| make_task(id, TaskStatus::Pending)).collect(),
        next_cursor: next.map(String::from),
    }
}

fn api(base: &str, timeout: Duration) -> HttpTaskApi {
    let api = HttpTaskApi::new(base, EndpointsConfig::default(), timeout).unwrap();
    api.set_credential(Some(SessionCredential::new(TOKEN)));
    api
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        backoff: BackoffStrategy::Fixed,
        initial_delay_ms: 20,
        max_delay_ms: 20,
    }
}

fn notification_frame(id: i64, task_id: TaskId, status: &str) -> Event {
    let body = json!({
        "id": id,
        "type": "image",
        "status": status,
        "payload": { "taskId": task_id, "imageUrls": ["https://cdn.example.com/out.png"] },
        "read": false
    });
    Event::default()
        .event("notification")
        .id(id.to_string())
        .data(body.to_string())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    size: u32,
    cursor: Option<String>,
}

/// Serves one event channel per connection, in order. Records the
/// `Last-Event-ID` header of every connection attempt.
fn stream_app(
    channels: Vec<mpsc::Receiver<Event>>,
    last_event_ids: Arc<Mutex<Vec<Option<String>>>>,
) -> Router {
    let channels = Arc::new(Mutex::new(channels.into_iter().collect::<std::collections::VecDeque<_>>()));
    Router::new().route(
        "/api/notifications/stream",
        get(move |headers: HeaderMap| {
            let channels = Arc::clone(&channels);
            let last_event_ids = Arc::clone(&last_event_ids);
            async move {
                last_event_ids.lock().unwrap().push(
                    headers
                        .get("last-event-id")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from),
                );
                if bearer(&headers) != Some(format!("Bearer {TOKEN}")) {
                    return StatusCode::UNAUTHORIZED.into_response();
                }
                match channels.lock().unwrap().pop_front() {
                    Some(rx) => Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
                        .into_response(),
                    None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                }
            }
        }),
    )
}

// ── Pagination ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_through_cursor_until_exhausted() {
    let seen_cursors = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&seen_cursors);
    let app = Router::new().route(
        "/api/tasks",
        get(move |headers: HeaderMap, Query(query): Query<ListQuery>| {
            let seen = Arc::clone(&seen);
            async move {
                assert_eq!(bearer(&headers).as_deref(), Some("Bearer test-session-token"));
                assert_eq!(query.size, 25);
                seen.lock().unwrap().push(query.cursor.clone());
                match query.cursor.as_deref() {
                    None => Json(make_page(1..=25, Some("c1"))),
                    Some("c1") => Json(make_page(26..=50, None)),
                    Some(other) => panic!("unexpected cursor {other}"),
                }
            }
        }),
    );
    let base = serve(app).await;

    let reconciler = Arc::new(Mutex::new(TaskListReconciler::new()));
    let pagination = PaginationController::new(
        Arc::new(api(&base, Duration::from_secs(5))),
        Arc::clone(&reconciler),
        25,
    );

    assert_eq!(pagination.load_first().await.unwrap(), LoadOutcome::Loaded { added: 25 });
    assert!(pagination.has_more());
    assert_eq!(pagination.load_more().await.unwrap(), LoadOutcome::Loaded { added: 25 });
    assert!(!pagination.has_more());
    assert_eq!(pagination.load_more().await.unwrap(), LoadOutcome::Skipped);

    assert_eq!(*seen_cursors.lock().unwrap(), vec![None, Some("c1".to_string())]);
    let reconciler = reconciler.lock().unwrap();
    assert_eq!(reconciler.len(), 50);
    assert_eq!(reconciler.tasks()[0].id, 1);
    assert_eq!(reconciler.tasks()[49].id, 50);
}

#[tokio::test]
async fn rapid_load_more_issues_one_request() {
    let requests = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&requests);
    let app = Router::new().route(
        "/api/tasks",
        get(move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Json(make_page(1..=25, Some("c1")))
            }
        }),
    );
    let base = serve(app).await;
    let pagination = PaginationController::new(
        Arc::new(api(&base, Duration::from_secs(5))),
        Arc::new(Mutex::new(TaskListReconciler::new())),
        25,
    );

    let (first, second) = tokio::join!(pagination.load_more(), pagination.load_more());

    assert_eq!(first.unwrap(), LoadOutcome::Loaded { added: 25 });
    assert_eq!(second.unwrap(), LoadOutcome::Skipped);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_page_counts_as_failure() {
    let app = Router::new().route(
        "/api/tasks",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(make_page(1..=1, None))
        }),
    );
    let base = serve(app).await;
    let pagination = PaginationController::new(
        Arc::new(api(&base, Duration::from_millis(50))),
        Arc::new(Mutex::new(TaskListReconciler::new())),
        25,
    );

    assert_eq!(pagination.load_first().await.unwrap(), LoadOutcome::Failed);
    assert!(!pagination.has_more());
    assert!(pagination.state().failed);
}

#[tokio::test]
async fn expired_session_on_list_is_surfaced() {
    let app = Router::new().route("/api/tasks", get(|| async { StatusCode::UNAUTHORIZED }));
    let base = serve(app).await;
    let pagination = PaginationController::new(
        Arc::new(api(&base, Duration::from_secs(5))),
        Arc::new(Mutex::new(TaskListReconciler::new())),
        25,
    );

    let err = pagination.load_first().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized));
}

// ── Submit / Delete ──────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_posts_to_kind_endpoint() {
    let app = Router::new().route(
        "/api/generate/{kind}",
        post(|Path(kind): Path<String>, Json(body): Json<serde_json::Value>| async move {
            assert_eq!(kind, "video");
            assert_eq!(body["type"], "video");
            assert_eq!(body["prompt"], "sunset");
            Json(json!({ "taskId": "42", "status": "QUEUED" }))
        }),
    );
    let base = serve(app).await;

    let ack = api(&base, Duration::from_secs(5))
        .submit(&SubmitRequest::new(GenerationKind::Video, "sunset"))
        .await
        .unwrap();

    assert_eq!(ack.task_id, Some(42));
    assert_eq!(ack.status.as_deref(), Some("QUEUED"));
}

#[tokio::test]
async fn rejected_submit_carries_server_message() {
    let app = Router::new().route(
        "/api/generate/{kind}",
        post(|| async {
            (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({ "message": "insufficient credits" })),
            )
        }),
    );
    let base = serve(app).await;

    let err = api(&base, Duration::from_secs(5))
        .submit(&SubmitRequest::new(GenerationKind::Image, "sunset"))
        .await
        .unwrap_err();

    match err {
        ClientError::Rejected { status, message } => {
            assert_eq!(status, 402);
            assert_eq!(message, "insufficient credits");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    let app = Router::new().route(
        "/api/tasks/{id}",
        delete(|Path(id): Path<i64>| async move {
            if id == 7 {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::NO_CONTENT
            }
        }),
    );
    let base = serve(app).await;
    let api = api(&base, Duration::from_secs(5));

    api.delete_task(3).await.unwrap();
    api.delete_task(7).await.unwrap();
}

// ── Event stream ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_delivers_each_event_once() {
    let (tx, rx) = mpsc::channel(16);
    let base = serve(stream_app(vec![rx], Arc::default())).await;
    let stream = EventStreamClient::new(
        reqwest::Client::new(),
        format!("{base}/api/notifications/stream").parse().unwrap(),
        ReconnectConfig::default(),
    );

    let images = Arc::new(Mutex::new(Vec::new()));
    let videos = Arc::new(AtomicUsize::new(0));
    let i = Arc::clone(&images);
    let v = Arc::clone(&videos);
    let _images = stream.on_event(GenerationKind::Image, move |e| i.lock().unwrap().push(e.id));
    let _videos = stream.on_event(GenerationKind::Video, move |_| {
        v.fetch_add(1, Ordering::SeqCst);
    });

    stream.connect(&SessionCredential::new(TOKEN));
    let mut status = stream.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();

    tx.send(Event::default().event("ping").data("{}")).await.unwrap();
    tx.send(notification_frame(1, 42, "PROCESSING")).await.unwrap();
    tx.send(notification_frame(1, 42, "PROCESSING")).await.unwrap();
    tx.send(notification_frame(2, 42, "COMPLETED")).await.unwrap();

    wait_until(|| images.lock().unwrap().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(*images.lock().unwrap(), vec![1, 2]);
    assert_eq!(videos.load(Ordering::SeqCst), 0);

    stream.connect(&SessionCredential::new(TOKEN));
    assert_eq!(stream.status(), ConnectionStatus::Connected);

    stream.disconnect();
    assert_eq!(stream.status(), ConnectionStatus::Idle);
}

#[tokio::test]
async fn reconnect_resumes_from_last_event_id() {
    let (tx1, rx1) = mpsc::channel(16);
    let (tx2, rx2) = mpsc::channel(16);
    let last_event_ids = Arc::new(Mutex::new(Vec::new()));
    let base = serve(stream_app(vec![rx1, rx2], Arc::clone(&last_event_ids))).await;
    let stream = EventStreamClient::new(
        reqwest::Client::new(),
        format!("{base}/api/notifications/stream").parse().unwrap(),
        fast_reconnect(),
    );
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delivered);
    let _sub = stream.on_any(move |e| d.lock().unwrap().push(e.id));

    stream.connect(&SessionCredential::new(TOKEN));
    tx1.send(notification_frame(5, 1, "COMPLETED")).await.unwrap();
    wait_until(|| delivered.lock().unwrap().len() == 1).await;

    // server ends the first connection
    drop(tx1);
    wait_until(|| last_event_ids.lock().unwrap().len() == 2).await;

    // replayed event is dropped, the new one is delivered
    tx2.send(notification_frame(5, 1, "COMPLETED")).await.unwrap();
    tx2.send(notification_frame(6, 2, "COMPLETED")).await.unwrap();
    wait_until(|| delivered.lock().unwrap().len() == 2).await;

    assert_eq!(*delivered.lock().unwrap(), vec![5, 6]);
    assert_eq!(
        *last_event_ids.lock().unwrap(),
        vec![None, Some("5".to_string())]
    );
    stream.disconnect();
}

#[tokio::test]
async fn rejected_session_parks_stream() {
    let base = serve(stream_app(Vec::new(), Arc::default())).await;
    let stream = EventStreamClient::new(
        reqwest::Client::new(),
        format!("{base}/api/notifications/stream").parse().unwrap(),
        fast_reconnect(),
    );
    let expired = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&expired);
    let _unsub = stream.signals().subscribe(move |signal| {
        if *signal == Signal::SessionExpired {
            e.fetch_add(1, Ordering::SeqCst);
        }
    });

    stream.connect(&SessionCredential::new("revoked-token"));
    let mut status = stream.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::AwaitingAuth)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stream.status(), ConnectionStatus::AwaitingAuth);
    assert_eq!(expired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let (tx, rx) = mpsc::channel(16);
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let rx = Arc::new(Mutex::new(Some(rx)));
    let app = Router::new().route(
        "/api/notifications/stream",
        get(move || {
            let a = Arc::clone(&a);
            let rx = Arc::clone(&rx);
            async move {
                if a.fetch_add(1, Ordering::SeqCst) < 2 {
                    return StatusCode::BAD_GATEWAY.into_response();
                }
                match rx.lock().unwrap().take() {
                    Some(rx) => Sse::new(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
                        .into_response(),
                    None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
                }
            }
        }),
    );
    let base = serve(app).await;
    let stream = EventStreamClient::new(
        reqwest::Client::new(),
        format!("{base}/api/notifications/stream").parse().unwrap(),
        fast_reconnect(),
    );
    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);
    let _sub = stream.on_any(move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });

    stream.connect(&SessionCredential::new(TOKEN));
    let mut status = stream.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();
    tx.send(notification_frame(1, 1, "COMPLETED")).await.unwrap();
    wait_until(|| delivered.load(Ordering::SeqCst) == 1).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    stream.disconnect();
}

#[tokio::test]
async fn retry_hint_is_clamped_and_used_once() {
    let (tx, rx) = mpsc::channel(16);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let base = serve(stream_app(vec![rx], Arc::clone(&attempts))).await;
    let stream = EventStreamClient::new(
        reqwest::Client::new(),
        format!("{base}/api/notifications/stream").parse().unwrap(),
        ReconnectConfig {
            backoff: BackoffStrategy::Exponential,
            initial_delay_ms: 300,
            max_delay_ms: 30_000,
        },
    );

    stream.connect(&SessionCredential::new(TOKEN));
    let mut status = stream.watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();

    // `retry: 0`, then the server hangs up; every later attempt gets a 503
    tx.send(Event::default().retry(Duration::ZERO)).await.unwrap();
    drop(tx);

    // 0ms connected, +300ms (hint raised to the floor), +600ms (backoff), next at +1200ms
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(attempts.lock().unwrap().len(), 3);
    stream.disconnect();
}

#[tokio::test]
async fn silent_stream_outlives_request_timeout() {
    let (tx, rx) = mpsc::channel(16);
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let base = serve(stream_app(vec![rx], Arc::clone(&attempts))).await;
    let config = GenfeedConfig {
        base_url: Some(base),
        request_timeout_ms: Some(100),
        ..Default::default()
    };
    let credential = SessionCredential::new(TOKEN);
    let feed = TaskFeed::from_config(&config, &credential).unwrap();

    feed.start(&credential);
    let mut status = feed.stream().watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(feed.stream().status(), ConnectionStatus::Connected);
    assert_eq!(attempts.lock().unwrap().len(), 1);
    drop(tx);
    feed.stop();
}

// ── TaskFeed ─────────────────────────────────────────────────────────────────

/// Submit "sunset"; the completion arrives before the list knows task 42, and
/// the resulting refresh brings it in as completed.
#[tokio::test]
async fn orphan_completion_refreshes_feed() {
    let (tx, rx) = mpsc::channel(16);
    let completed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let c = Arc::clone(&completed);
    let list_calls = Arc::new(AtomicUsize::new(0));
    let l = Arc::clone(&list_calls);

    let app = stream_app(vec![rx], Arc::default())
        .route(
            "/api/tasks",
            get(move || {
                let c = Arc::clone(&c);
                let l = Arc::clone(&l);
                async move {
                    l.fetch_add(1, Ordering::SeqCst);
                    let mut page = make_page(1..=3, None);
                    if c.load(Ordering::SeqCst) {
                        let mut task = make_task(42, TaskStatus::Completed);
                        task.prompt = "sunset".to_string();
                        task.created_at = chrono::Utc::now();
                        page.content.insert(0, task);
                    }
                    Json(page)
                }
            }),
        )
        .route(
            "/api/generate/{kind}",
            post(|| async { Json(json!({ "status": "QUEUED" })) }),
        );
    let base = serve(app).await;

    let credential = SessionCredential::new(TOKEN);
    let api = api(&base, Duration::from_secs(5));
    let stream = EventStreamClient::new(api.client(), api.stream_url().unwrap(), fast_reconnect());
    let feed = TaskFeed::new(Arc::new(api), stream, TaskFeedOptions::default());

    feed.start(&credential);
    feed.refresh().await.unwrap();
    let mut status = feed.stream().watch_status();
    status
        .wait_for(|s| *s == ConnectionStatus::Connected)
        .await
        .unwrap();

    let temp_id = feed
        .submit(SubmitRequest::new(GenerationKind::Image, "sunset"))
        .await
        .unwrap();
    assert!(temp_id < 0);
    assert_eq!(feed.snapshot()[0].id, temp_id);
    assert_eq!(feed.snapshot()[0].status, TaskStatus::Pending);

    completed.store(true, Ordering::SeqCst);
    tx.send(notification_frame(1, 42, "COMPLETED")).await.unwrap();
    wait_until(|| feed.get(42).is_some()).await;

    let tasks = feed.snapshot();
    assert_eq!(tasks.len(), 4);
    assert_eq!(tasks[0].id, 42);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert!(feed.get(temp_id).is_none());
    assert_eq!(list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(feed.unread_count(), 1);

    feed.stop();
}

#[tokio::test]
async fn new_session_reaches_task_api() {
    let app = Router::new().route(
        "/api/tasks",
        get(|headers: HeaderMap| async move {
            if bearer(&headers) != Some(format!("Bearer {TOKEN}")) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            Json(make_page(1..=2, None)).into_response()
        }),
    );
    let base = serve(app).await;
    let config = GenfeedConfig {
        base_url: Some(base),
        ..Default::default()
    };
    let feed = TaskFeed::from_config(&config, &SessionCredential::new("old-token")).unwrap();

    let err = feed.refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized));

    feed.start(&SessionCredential::new(TOKEN));
    assert_eq!(feed.refresh().await.unwrap(), LoadOutcome::Loaded { added: 2 });
    assert_eq!(feed.snapshot().len(), 2);

    feed.logout();
    let err = feed.refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized));
}
