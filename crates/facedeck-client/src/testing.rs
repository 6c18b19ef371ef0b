//! In-process fake of the dashboard API for tests.
//!
//! Serves the REST endpoints from in-memory lists and a `/ws` endpoint that
//! forwards whatever the test pushes to every connected subscriber.

use crate::api::ApiClient;
use crate::config::Config;
use crate::notify::{Notice, Notifier};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Pushed text that makes the server send a Close frame.
const CLOSE_FRAME: &str = "\u{0}close";
/// Pushed text that makes the server drop the socket without a close handshake.
const DROP_SOCKET: &str = "\u{0}drop";

#[derive(Default)]
struct FakeState {
    healthy: bool,
    cameras: Vec<Value>,
    persons: Vec<Value>,
    events: Vec<Value>,
    next_id: u64,
    reject_next: Option<String>,
    recognition_delays: VecDeque<Duration>,
    requests: usize,
    last_body: Option<Value>,
    last_query: Option<String>,
    subscribers: usize,
}

struct Inner {
    addr: SocketAddr,
    state: Mutex<FakeState>,
    live: broadcast::Sender<String>,
}

type Shared = Arc<Inner>;

pub struct FakeAppliance {
    inner: Shared,
}

impl FakeAppliance {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (live, _) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            addr,
            state: Mutex::new(FakeState {
                healthy: true,
                ..FakeState::default()
            }),
            live,
        });

        let app = Router::new()
            .route("/api/health", get(health))
            .route("/api/cameras", get(list_cameras).post(add_camera))
            .route("/api/cameras/:id", put(update_camera))
            .route("/api/camera/:id/snapshot", get(snapshot))
            .route("/api/camera/:id/stream", get(stream))
            .route("/api/persons", get(list_persons).post(add_person))
            .route("/api/persons/:id", put(update_person).delete(delete_person))
            .route("/api/events", get(list_events).post(add_event))
            .route("/api/events/:id", put(update_event).delete(delete_event))
            .route("/api/recognitions", get(recognitions))
            .route("/api/websocket/info", get(websocket_info))
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::clone(&inner));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { inner }
    }

    pub fn config(&self) -> Config {
        Config::default()
            .with_api_base(&format!("http://{}", self.inner.addr))
            .unwrap()
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.config()).unwrap()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.inner.addr)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.state.lock().unwrap().healthy = healthy;
    }

    /// Fail the next create request with a 400 carrying `message`.
    pub fn reject_next(&self, message: &str) {
        self.inner.state.lock().unwrap().reject_next = Some(message.to_string());
    }

    /// Delay the next recognition query response.
    pub fn delay_next_query(&self, delay: Duration) {
        self.inner
            .state
            .lock()
            .unwrap()
            .recognition_delays
            .push_back(delay);
    }

    pub fn request_count(&self) -> usize {
        self.inner.state.lock().unwrap().requests
    }

    pub fn last_body(&self) -> Option<Value> {
        self.inner.state.lock().unwrap().last_body.clone()
    }

    pub fn last_query(&self) -> Option<String> {
        self.inner.state.lock().unwrap().last_query.clone()
    }

    /// Push a text frame to all subscribers.
    pub fn push(&self, text: &str) {
        let _ = self.inner.live.send(text.to_string());
    }

    pub fn close_subscribers(&self) {
        self.push(CLOSE_FRAME);
    }

    pub fn drop_subscribers(&self) {
        self.push(DROP_SOCKET);
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        for _ in 0..200 {
            if self.inner.state.lock().unwrap().subscribers == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} subscribers");
    }
}

/// Recognition record in the appliance's push format.
pub fn recognition_json(score: f64, fullname: Option<&str>) -> String {
    let mut record = json!({
        "type": 1,
        "score": score,
        "target_score": 0.85,
        "snapshot": "/9j/",
        "channel": "Camera-5",
        "timestamp": 1714623611025i64,
    });
    if let Some(name) = fullname {
        record["person_info"] = json!({ "fullname": name, "employeeno": "A0001" });
    }
    record.to_string()
}

/// Notifier that keeps every notice for assertions.
#[derive(Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<(Notice, String)>>,
}

impl CollectingNotifier {
    pub fn errors(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == Notice::Error)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == Notice::Info)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, kind: Notice, message: &str) {
        self.notices.lock().unwrap().push((kind, message.to_string()));
    }
}

fn record(s: &Shared, query: Option<String>, body: Option<&Value>) -> Option<String> {
    let mut state = s.state.lock().unwrap();
    state.requests += 1;
    if query.is_some() {
        state.last_query = query;
    }
    if let Some(body) = body {
        state.last_body = Some(body.clone());
    }
    state.reject_next.take()
}

fn rejected(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn create(s: &Shared, body: Value, pick: fn(&mut FakeState) -> &mut Vec<Value>) -> Response {
    if let Some(message) = record(s, None, Some(&body)) {
        return rejected(message);
    }
    let mut state = s.state.lock().unwrap();
    state.next_id += 1;
    let id = state.next_id;
    let mut entity = body;
    entity["id"] = json!(id);
    entity["online"] = json!(true);
    pick(&mut state).push(entity);
    (StatusCode::OK, Json(json!({ "id": id, "message": "created" }))).into_response()
}

/// Replace the fields in `body` on an existing entity, keeping its id.
fn update(s: &Shared, id: &str, body: Value, pick: fn(&mut FakeState) -> &mut Vec<Value>) -> Response {
    if let Some(message) = record(s, None, Some(&body)) {
        return rejected(message);
    }
    let mut state = s.state.lock().unwrap();
    let Some(entity) = pick(&mut state).iter_mut().find(|e| e["id"].to_string() == id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response();
    };
    if let (Some(target), Value::Object(fields)) = (entity.as_object_mut(), body) {
        for (key, value) in fields {
            target.insert(key, value);
        }
    }
    (StatusCode::OK, Json(json!({ "message": "updated" }))).into_response()
}

fn remove(s: &Shared, id: &str, pick: fn(&mut FakeState) -> &mut Vec<Value>) -> Response {
    record(s, None, None);
    let mut state = s.state.lock().unwrap();
    let list = pick(&mut state);
    let before = list.len();
    list.retain(|e| e["id"].to_string() != id);
    if list.len() == before {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
    } else {
        (StatusCode::OK, Json(json!({ "message": "deleted" }))).into_response()
    }
}

async fn health(State(s): State<Shared>) -> Response {
    record(&s, None, None);
    if s.state.lock().unwrap().healthy {
        Json(json!({ "status": "healthy", "aira_api": "connected", "token_valid": true })).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "unhealthy", "aira_api": "disconnected", "error": "token generation failed" })),
        )
            .into_response()
    }
}

async fn list_cameras(State(s): State<Shared>) -> Json<Value> {
    record(&s, None, None);
    Json(json!({ "cameras": s.state.lock().unwrap().cameras }))
}

async fn add_camera(State(s): State<Shared>, Json(body): Json<Value>) -> Response {
    create(&s, body, |st| &mut st.cameras)
}

async fn update_camera(State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    update(&s, &id, body, |st| &mut st.cameras)
}

async fn stream(State(s): State<Shared>, Path(_id): Path<String>) -> Response {
    record(&s, None, None);
    (
        [(axum::http::header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        "--frame\r\n",
    )
        .into_response()
}

async fn snapshot(State(s): State<Shared>, Path(_id): Path<String>) -> Vec<u8> {
    record(&s, None, None);
    vec![0xff, 0xd8, 0xff, 0xe0]
}

async fn list_persons(State(s): State<Shared>) -> Json<Value> {
    record(&s, None, None);
    Json(json!({ "persons": s.state.lock().unwrap().persons }))
}

async fn add_person(State(s): State<Shared>, Json(body): Json<Value>) -> Response {
    create(&s, body, |st| &mut st.persons)
}

async fn update_person(State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    update(&s, &id, body, |st| &mut st.persons)
}

async fn delete_person(State(s): State<Shared>, Path(id): Path<String>) -> Response {
    remove(&s, &id, |st| &mut st.persons)
}

async fn list_events(State(s): State<Shared>) -> Json<Value> {
    record(&s, None, None);
    Json(json!({ "events": s.state.lock().unwrap().events }))
}

async fn add_event(State(s): State<Shared>, Json(body): Json<Value>) -> Response {
    create(&s, body, |st| &mut st.events)
}

async fn update_event(State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    update(&s, &id, body, |st| &mut st.events)
}

async fn delete_event(State(s): State<Shared>, Path(id): Path<String>) -> Response {
    remove(&s, &id, |st| &mut st.events)
}

/// Echoes the `camera_id` filter into the result channel so tests can tell responses apart.
async fn recognitions(State(s): State<Shared>, RawQuery(query): RawQuery) -> Json<Value> {
    let camera = query
        .as_deref()
        .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("camera_id=")))
        .unwrap_or("Camera-5")
        .to_string();
    record(&s, query, None);
    let delay = s.state.lock().unwrap().recognition_delays.pop_front();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    Json(json!({
        "results": [{
            "type": 1,
            "score": 0.95,
            "snapshot": "/9j/",
            "channel": camera,
            "timestamp": 1714623611025i64,
            "person_info": { "fullname": "John Doe", "employeeno": "EMP001" }
        }]
    }))
}

async fn websocket_info(State(s): State<Shared>) -> Json<Value> {
    record(&s, None, None);
    Json(json!({
        "websocket_url": format!("ws://{}/ws", s.addr),
        "description": "Connect to this WebSocket to receive real-time recognition events",
    }))
}

async fn ws_upgrade(State(s): State<Shared>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(s, socket))
}

async fn serve_socket(s: Shared, mut socket: WebSocket) {
    let mut rx = s.live.subscribe();
    s.state.lock().unwrap().subscribers += 1;
    loop {
        tokio::select! {
            pushed = rx.recv() => match pushed {
                Ok(text) if text == CLOSE_FRAME => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Ok(text) if text == DROP_SOCKET => break,
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    s.state.lock().unwrap().subscribers -= 1;
}
