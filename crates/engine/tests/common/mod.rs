//! Fake generation service for integration tests.
//!
//! Serves the REST endpoints and the `/ws` push channel on an ephemeral
//! port. Tests drive it directly: [`FakeService::advance`] changes a job in
//! the listing and pushes a `status_update`, [`FakeService::push_only`]
//! sends a frame without touching the listing (a lagging poll),
//! [`FakeService::set_listed`] changes the listing without a push (a
//! dropped push).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use cadenza_core::job::GenerationJob;
use cadenza_engine::{EngineConfig, GenerationEngine};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub const CREATED_AT: &str = "2024-05-01T10:00:00.000000";
pub const ARTIFACT: &[u8] = br#"[{"type":"note_on","note":60,"velocity":80,"time":0.0}]"#;

/// Frames fanned out to every open socket.
#[derive(Debug, Clone)]
enum Outbound {
    Text(String),
    Close,
}

pub struct FakeState {
    jobs: Mutex<Vec<Value>>,
    outbound: broadcast::Sender<Outbound>,
    next_id: AtomicU32,
    open_sockets: AtomicUsize,
    connects: AtomicUsize,
    downloads: AtomicUsize,
}

pub struct FakeService {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeService {
    pub async fn start() -> Self {
        let (outbound, _) = broadcast::channel(64);
        let state = Arc::new(FakeState {
            jobs: Mutex::new(Vec::new()),
            outbound,
            next_id: AtomicU32::new(1),
            open_sockets: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/generate", post(generate))
            .route("/generations", get(list_generations))
            .route("/status/{id}", get(status))
            .route("/generation/{id}", delete(delete_generation))
            .route("/download/{id}", get(download))
            .route("/health", get(health))
            .route("/genres", get(genres))
            .route("/ws", get(ws_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            api_url: format!("http://{}", self.addr),
            ws_url: format!("ws://{}/ws", self.addr),
            poll_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(50),
            reconnect_max: Duration::from_millis(200),
            ..Default::default()
        }
    }

    pub fn start_engine(&self) -> Arc<GenerationEngine> {
        GenerationEngine::start(&self.config()).unwrap()
    }

    /// Update a listed job and push the same change.
    pub fn advance(&self, id: &str, status: &str, progress: u8, message: &str) {
        self.set_listed(id, status, progress, message);
        self.push_only(id, status, progress, message);
    }

    /// Update a listed job without pushing. Completed jobs gain artifacts.
    pub fn set_listed(&self, id: &str, status: &str, progress: u8, message: &str) {
        let mut jobs = self.state.jobs.lock().unwrap();
        let index = match jobs.iter().position(|job| job["id"] == id) {
            Some(index) => index,
            None => {
                jobs.push(json!({ "id": id, "created_at": CREATED_AT }));
                jobs.len() - 1
            }
        };
        let entry = &mut jobs[index];
        entry["status"] = json!(status);
        entry["progress"] = json!(progress);
        entry["message"] = json!(message);
        if status == "completed" {
            entry["music_data"] = serde_json::from_slice(ARTIFACT).unwrap();
            entry["midi_url"] = json!(format!("/download/{id}"));
            entry["duration"] = json!(50.0);
        }
    }

    /// Push a `status_update` without changing the listing.
    pub fn push_only(&self, id: &str, status: &str, progress: u8, message: &str) {
        let frame = json!({
            "type": "status_update",
            "generation_id": id,
            "status": status,
            "progress": progress,
            "message": message,
        });
        let _ = self.state.outbound.send(Outbound::Text(frame.to_string()));
    }

    /// Drop a job from the service without telling the client.
    pub fn forget(&self, id: &str) {
        self.state.jobs.lock().unwrap().retain(|job| job["id"] != id);
    }

    /// Close every open push socket from the server side.
    pub fn kick_sockets(&self) {
        let _ = self.state.outbound.send(Outbound::Close);
    }

    pub fn open_sockets(&self) -> usize {
        self.state.open_sockets.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    /// Poll until `check` holds, panicking after five seconds.
    pub async fn wait_until(&self, what: &str, check: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Poll the engine until the job satisfies `check`, panicking after five
/// seconds. Returns the record that matched.
pub async fn wait_for_job(
    engine: &GenerationEngine,
    id: &str,
    check: impl Fn(Option<&GenerationJob>) -> bool,
) -> Option<GenerationJob> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = engine.get(id).await;
        if check(job.as_ref()) {
            return job;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting on job {id}, last seen {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn generate(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let tempo = body["tempo"].as_u64().unwrap_or(0);
    if !(60..=200).contains(&tempo) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "tempo out of range").into_response();
    }

    let id = format!("gen_{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    state.jobs.lock().unwrap().push(json!({
        "id": id,
        "status": "queued",
        "progress": 0,
        "message": "Generation queued",
        "created_at": CREATED_AT,
    }));

    Json(json!({ "id": id, "status": "queued", "created_at": CREATED_AT })).into_response()
}

async fn list_generations(State(state): State<Arc<FakeState>>) -> Json<Value> {
    let jobs = state.jobs.lock().unwrap().clone();
    Json(json!({ "generations": jobs }))
}

async fn status(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Response {
    let jobs = state.jobs.lock().unwrap();
    match jobs.iter().find(|job| job["id"] == id.as_str()) {
        Some(job) => Json(job.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Generation not found").into_response(),
    }
}

async fn delete_generation(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Json<Value> {
    state
        .jobs
        .lock()
        .unwrap()
        .retain(|job| job["id"] != id.as_str());
    Json(json!({ "message": "Generation deleted" }))
}

async fn download(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    let completed = state
        .jobs
        .lock()
        .unwrap()
        .iter()
        .any(|job| job["id"] == id.as_str() && job["status"] == "completed");
    if !completed {
        return (StatusCode::NOT_FOUND, "Generation not found").into_response();
    }
    ARTIFACT.to_vec().into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "timestamp": CREATED_AT, "generator_loaded": true }))
}

async fn genres() -> Json<Value> {
    Json(json!({
        "genres": [
            { "name": "classical", "description": "Classical and orchestral music" },
            { "name": "jazz", "description": "Jazz and swing music" },
        ]
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<FakeState>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<FakeState>) {
    // Subscribe before counting the socket as open so a frame sent right
    // after `open_sockets()` turns positive is never missed.
    let mut outbound = state.outbound.subscribe();
    state.connects.fetch_add(1, Ordering::SeqCst);
    state.open_sockets.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Ok(Outbound::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Outbound::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.open_sockets.fetch_sub(1, Ordering::SeqCst);
}
