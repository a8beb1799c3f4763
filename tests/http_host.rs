use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use pagesmith::api::dispatch_request;
use pagesmith::collab::{ArtifactStore, ProjectFile, UsageLedger};
use pagesmith::config::{AppConfig, FeaturesConfig, GenerationConfig, ServerConfig, UpstreamConfig};
use pagesmith::error::GenerationError;
use pagesmith::observability::UsageReport;
use pagesmith::protocol::Message;
use pagesmith::state::AppState;
use pagesmith::transport::HttpBackend;
use parking_lot::Mutex;
use serde_json::{json, Value};

const PAGE: &str = "<!DOCTYPE html><html><body><h1>Bakery</h1></body></html>";

#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<(String, String, usize, usize)>>,
}

impl ArtifactStore for RecordingStore {
    fn save(
        &self,
        chat_id: &str,
        document: &str,
        files: &[ProjectFile],
        history: &[Message],
    ) -> Result<(), GenerationError> {
        self.saved.lock().push((
            chat_id.to_string(),
            document.to_string(),
            files.len(),
            history.len(),
        ));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLedger {
    reports: Mutex<Vec<UsageReport>>,
}

impl UsageLedger for RecordingLedger {
    fn deduct(&self, report: &UsageReport) -> Result<(), GenerationError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

struct Host {
    state: Arc<AppState>,
    store: Arc<RecordingStore>,
    ledger: Arc<RecordingLedger>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for Host {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start_host(app: Router) -> Host {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let config = AppConfig {
        server: ServerConfig::default(),
        upstream: UpstreamConfig {
            base_url: format!("http://{addr}/v1"),
            api_key: "upstream-secret".to_string(),
            default_model: "page-model".to_string(),
            models: vec!["page-model".to_string()],
            mode_header: "x-response-mode".to_string(),
            proxy: None,
        },
        generation: GenerationConfig::default(),
        features: FeaturesConfig::default(),
    };
    let backend = HttpBackend::from_config(&config).expect("backend");
    let store = Arc::new(RecordingStore::default());
    let ledger = Arc::new(RecordingLedger::default());
    let state = Arc::new(AppState::with_collaborators(
        config,
        backend,
        store.clone(),
        ledger.clone(),
    ));
    Host {
        state,
        store,
        ledger,
        server,
    }
}

fn delta_frame(delta: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": delta}}]})
    )
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        body.push_str(&delta_frame(delta));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Upstream reply that sends one delta and then never ends.
fn stalled_stream_response() -> Response {
    let head = futures_util::stream::once(async {
        Ok::<_, Infallible>(delta_frame("<!DOCTYPE html><html>"))
    });
    let body = Body::from_stream(head.chain(futures_util::stream::pending()));
    ([("content-type", "text/event-stream")], body).into_response()
}

async fn open(state: &Arc<AppState>, method: &str, uri: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serialize")))
        .expect("build request");
    dispatch_request(Arc::clone(state), request)
        .await
        .expect("dispatch")
}

async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: Value) -> (StatusCode, String) {
    let response = open(state, method, uri, body).await;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8 body"))
}

/// `(event, data)` pairs of an SSE body.
fn parse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            let mut event = String::new();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = name.to_string();
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data.push_str(payload);
                }
            }
            (event, serde_json::from_str(&data).expect("event json"))
        })
        .collect()
}

/// Reads SSE events off a live response body.
struct EventReader {
    body: BodyDataStream,
    buffer: String,
}

impl EventReader {
    fn new(response: Response) -> Self {
        Self {
            body: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    async fn next(&mut self) -> Option<(String, Value)> {
        let read = async {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    return parse_events(&block).into_iter().next();
                }
                let bytes = self.body.next().await?.expect("body chunk");
                self.buffer
                    .push_str(std::str::from_utf8(&bytes).expect("utf8 event"));
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("timed out waiting for an event")
    }

    async fn remaining(mut self) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[tokio::test]
async fn test_generate_streams_events_and_persists_artifact() {
    let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
    let seen_upstream = Arc::clone(&seen);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let seen = Arc::clone(&seen_upstream);
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                seen.lock().push((auth, body));
                (
                    [("content-type", "text/event-stream")],
                    sse_body(&["<!DOCTYPE html><html><body>", "<h1>Bakery</h1></body></html>"]),
                )
            }
        }),
    );
    let host = start_host(app).await;

    let (status, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-1", "prompt": "a bakery landing page"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let events = parse_events(&body);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["chunk", "chunk", "complete"]);
    assert_eq!(events[0].1["progress"], 5);
    assert_eq!(events[0].1["mode"], "artifact");
    let complete = &events[2].1;
    assert_eq!(complete["content"], PAGE);
    assert_eq!(complete["completeness"], "complete");
    assert_eq!(complete["usage"]["model"], "page-model");

    let upstream = seen.lock();
    assert_eq!(upstream.len(), 1);
    assert_eq!(upstream[0].0.as_deref(), Some("Bearer upstream-secret"));
    assert_eq!(upstream[0].1["stream"], true);
    assert_eq!(upstream[0].1["model"], "page-model");
    assert_eq!(upstream[0].1["messages"][1]["content"], "a bakery landing page");

    let saved = host.store.saved.lock();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "chat-1");
    assert_eq!(saved[0].1, PAGE);
    assert_eq!(saved[0].2, 1);
    assert_eq!(saved[0].3, 2);
    assert_eq!(host.ledger.reports.lock().len(), 1);

    let (status, body) = call(&host.state, "GET", "/v1/session?chat_id=chat-1", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot["is_complete"], true);
    assert_eq!(snapshot["progress"], 100);
    assert_eq!(snapshot["status_type"], "complete");
    assert_eq!(snapshot["outcome"], "completed");
}

#[tokio::test]
async fn test_conversation_header_routes_to_chat_reply() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                [
                    ("content-type", "text/event-stream"),
                    ("x-response-mode", "conversation"),
                ],
                sse_body(&["<think>planning</think>", "Hello there"]),
            )
        }),
    );
    let host = start_host(app).await;

    let (_, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-2", "prompt": "what can you build?"}),
    )
    .await;
    let events = parse_events(&body);
    let (name, complete) = events.last().expect("events");
    assert_eq!(name, "complete");
    assert_eq!(complete["mode"], "conversation");
    assert_eq!(complete["content"], "Hello there");
    assert_eq!(complete["completeness"], Value::Null);

    assert!(host.store.saved.lock().is_empty());
    assert_eq!(host.ledger.reports.lock().len(), 1);
}

#[tokio::test]
async fn test_payment_required_maps_to_balance_message() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({"error": {"message": "balance exhausted"}})),
            )
                .into_response()
        }),
    );
    let host = start_host(app).await;

    let (_, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-3", "prompt": "page"}),
    )
    .await;
    let events = parse_events(&body);
    assert_eq!(events.len(), 1);
    let (name, error) = &events[0];
    assert_eq!(name, "error");
    assert_eq!(error["error"]["status"], 402);
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Insufficient credits"));
    assert!(error["error"]["detail"]
        .as_str()
        .unwrap()
        .contains("balance exhausted"));

    assert!(host.store.saved.lock().is_empty());
    assert!(host.ledger.reports.lock().is_empty());

    let (_, body) = call(&host.state, "GET", "/v1/session?chat_id=chat-3", Value::Null).await;
    let snapshot: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot["progress"], 0);
    assert_eq!(snapshot["status_type"], "error");
    assert_eq!(snapshot["is_complete"], false);
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("retry-after", "0")],
                        "slow down",
                    )
                        .into_response();
                }
                (
                    [("content-type", "text/event-stream")],
                    sse_body(&[PAGE]),
                )
                    .into_response()
            }
        }),
    );
    let host = start_host(app).await;

    let (_, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-4", "prompt": "page"}),
    )
    .await;
    let events = parse_events(&body);
    assert_eq!(events.last().map(|(name, _)| name.as_str()), Some("complete"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unknown_model_is_rejected() {
    let host = start_host(Router::new()).await;
    let (status, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-5", "prompt": "page", "model": "mystery"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let payload: Value = serde_json::from_str(&body).unwrap();
    assert!(payload["error"]["detail"]
        .as_str()
        .unwrap()
        .contains("mystery"));
}

#[tokio::test]
async fn test_stop_unknown_chat_is_noop() {
    let host = start_host(Router::new()).await;
    let (status, body) = call(&host.state, "POST", "/v1/stop", json!({"chat_id": "idle"})).await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["stopped"], false);

    let (status, _) = call(&host.state, "GET", "/v1/session?chat_id=idle", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_config_summary() {
    let host = start_host(Router::new()).await;
    let (status, body) = call(&host.state, "GET", "/health", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["status"], "pagesmith is running");
    assert_eq!(payload["config"]["default_model"], "page-model");
    assert_eq!(payload["chat_sessions"], 0);
}

#[tokio::test]
async fn test_stop_during_generation_sends_cancelled_event() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { stalled_stream_response() }),
    );
    let host = start_host(app).await;

    let response = open(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-7", "prompt": "page"}),
    )
    .await;
    let mut events = EventReader::new(response);
    let (name, _) = events.next().await.expect("first event");
    assert_eq!(name, "chunk");

    let (_, body) = call(&host.state, "POST", "/v1/stop", json!({"chat_id": "chat-7"})).await;
    let stop: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stop["stopped"], true);
    assert_eq!(stop["session"]["outcome"], "cancelled");

    let rest = events.remaining().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].0, "cancelled");
    assert_eq!(rest[0].1["message"], "Generation stopped");

    let snapshot = host.state.existing_controller("chat-7").unwrap().snapshot();
    assert!(!snapshot.is_generating);
    assert!(!snapshot.is_complete);
    assert_eq!(snapshot.error, None);
    assert!(host.store.saved.lock().is_empty());
    assert!(host.ledger.reports.lock().is_empty());
}

#[tokio::test]
async fn test_superseded_session_reports_stopped_not_new_status() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return stalled_stream_response();
                }
                (
                    [("content-type", "text/event-stream")],
                    sse_body(&[PAGE]),
                )
                    .into_response()
            }
        }),
    );
    let host = start_host(app).await;

    let first = open(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-8", "prompt": "first idea"}),
    )
    .await;
    let mut first_events = EventReader::new(first);
    assert_eq!(first_events.next().await.expect("first chunk").0, "chunk");

    let (_, body) = call(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-8", "prompt": "second idea"}),
    )
    .await;
    let second_events = parse_events(&body);
    assert_eq!(
        second_events.last().map(|(name, _)| name.as_str()),
        Some("complete")
    );

    let rest = first_events.remaining().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].0, "cancelled");
    assert_eq!(rest[0].1["message"], "Generation stopped");

    let reports = host.ledger.reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(host.store.saved.lock().len(), 1);
    assert_eq!(host.store.saved.lock()[0].1, PAGE);
}

#[tokio::test]
async fn test_client_disconnect_stops_session() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            let ticks = futures_util::stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Some((Ok::<_, Infallible>(delta_frame(&format!("<p>{n}</p>"))), n + 1))
            });
            (
                [("content-type", "text/event-stream")],
                Body::from_stream(ticks),
            )
                .into_response()
        }),
    );
    let host = start_host(app).await;

    let response = open(
        &host.state,
        "POST",
        "/v1/generate",
        json!({"chat_id": "chat-9", "prompt": "page"}),
    )
    .await;
    let mut events = EventReader::new(response);
    assert_eq!(events.next().await.expect("first chunk").0, "chunk");
    drop(events);

    let controller = host.state.existing_controller("chat-9").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.snapshot().outcome.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session was not stopped after the client went away");

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status_message, "Generation stopped");
    assert!(!snapshot.is_generating);
    assert!(host.ledger.reports.lock().is_empty());
}
