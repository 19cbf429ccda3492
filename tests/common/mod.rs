//! In-process stand-in for the DirectAI API.
#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use directai_vision::{Credentials, Image};

pub const CLIENT_ID: &str = "client-id";
pub const CLIENT_SECRET: &str = "client-secret";

#[derive(Default)]
pub struct StubState {
    pub token_calls: AtomicUsize,
    pub deploy_calls: AtomicUsize,
    pub detect_calls: AtomicUsize,
    pub classify_calls: AtomicUsize,
    /// Upcoming detect/classify calls to answer with 401 regardless of token.
    pub unauthorized_remaining: AtomicUsize,
    pub reject_deploy: AtomicBool,
    pub delay_ms: AtomicU64,
    pub valid_token: Mutex<String>,
    pub deployed: Mutex<HashSet<String>>,
    pub last_deployed_id: Mutex<Option<String>>,
    pub last_upload: Mutex<Option<(String, usize)>>,
}

impl StubState {
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.token_calls() + self.deploy_calls() + self.detect_calls() + self.classify_calls()
    }

    pub fn reject_next(&self, count: usize) {
        self.unauthorized_remaining.store(count, Ordering::SeqCst);
    }

    /// Invalidates the current token, as if it had expired upstream.
    pub fn expire_token(&self) {
        *self.valid_token.lock().unwrap() = "expired".to_string();
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == expected)
    }
}

pub struct Stub {
    pub base_url: String,
    pub state: Arc<StubState>,
}

impl Stub {
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/token", post(token))
            .route("/deploy_detector", post(deploy_detector))
            .route("/deploy_classifier", post(deploy_classifier))
            .route("/detect", post(detect))
            .route("/classify", post(classify))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.base_url, CLIENT_ID, CLIENT_SECRET)
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

async fn token(
    State(state): State<Arc<StubState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let valid = params.get("client_id").map(String::as_str) == Some(CLIENT_ID)
        && params.get("client_secret").map(String::as_str) == Some(CLIENT_SECRET);
    if !valid {
        return detail(StatusCode::UNAUTHORIZED, "invalid client credentials");
    }

    let token = format!("token-{n}");
    *state.valid_token.lock().unwrap() = token.clone();
    Json(json!({ "access_token": token, "token_type": "bearer" })).into_response()
}

async fn deploy(state: &StubState, headers: &HeaderMap, body: &Value, key: &str, prefix: &str) -> Response {
    let n = state.deploy_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !state.authorized(headers) {
        return detail(StatusCode::UNAUTHORIZED, "token expired");
    }
    if state.reject_deploy.load(Ordering::SeqCst) || !body[key].is_array() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "invalid configuration");
    }

    let id = format!("{prefix}-{n}");
    state.deployed.lock().unwrap().insert(id.clone());
    Json(json!({ "deployed_id": id })).into_response()
}

async fn deploy_detector(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !body["nms_thresh"].is_number() {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "nms_thresh missing");
    }
    deploy(&state, &headers, &body, "detector_configs", "det").await
}

async fn deploy_classifier(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    deploy(&state, &headers, &body, "classifier_configs", "cls").await
}

/// Shared checks for the image endpoints; `Err` is the response to send.
async fn accept_upload(
    state: &StubState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    multipart: &mut Multipart,
) -> Result<(), Response> {
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let forced = state
        .unauthorized_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if forced || !state.authorized(headers) {
        return Err(detail(StatusCode::UNAUTHORIZED, "token expired"));
    }

    let id = params.get("deployed_id").cloned().unwrap_or_default();
    if !state.deployed.lock().unwrap().contains(&id) {
        return Err(detail(StatusCode::NOT_FOUND, "deployment not found"));
    }
    *state.last_deployed_id.lock().unwrap() = Some(id);

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("data") {
            let mime = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| detail(StatusCode::BAD_REQUEST, &e.to_string()))?;
            *state.last_upload.lock().unwrap() = Some((mime, bytes.len()));
            return Ok(());
        }
    }
    Err(detail(StatusCode::UNPROCESSABLE_ENTITY, "missing data field"))
}

async fn detect(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    state.detect_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(response) = accept_upload(&state, &headers, &params, &mut multipart).await {
        return response;
    }

    Json(json!([[
        {"score": 0.9, "class": "head", "tlbr": [-5.0, 10.0, 120.0, 40.0]},
        {"score": 0.4, "class": "fist", "tlbr": [10.2, 5.5, 30.7, 20.1]}
    ]]))
    .into_response()
}

async fn classify(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    state.classify_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(response) = accept_upload(&state, &headers, &params, &mut multipart).await {
        return response;
    }

    Json(json!({ "scores": { "kitchen": 0.2, "office": 0.9, "bedroom": 0.5 } })).into_response()
}

pub fn png(width: u32, height: u32) -> Image {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    Image::new(out.into_inner(), "image/png")
}
