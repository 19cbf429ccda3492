use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::camera::CameraRegistry;
use crate::config::ServiceConfig;
use crate::error::Error;
use crate::service::DirectAiService;
use crate::types::Image;
use crate::vision::Vision;

#[derive(Clone)]
pub struct AppState {
    service: Arc<DirectAiService>,
    cameras: CameraRegistry,
}

impl AppState {
    pub fn new(service: Arc<DirectAiService>, cameras: CameraRegistry) -> Self {
        Self { service, cameras }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detections", post(detections_handler))
        .route("/classifications", post(classifications_handler))
        .route("/cameras/:name/detections", get(camera_detections_handler))
        .route(
            "/cameras/:name/classifications",
            get(camera_classifications_handler),
        )
        .route("/cameras/:name/point_clouds", get(point_clouds_handler))
        .route("/do_command", post(do_command_handler))
        .route("/reconfigure", post(reconfigure_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    fn new(prefix: &str, data: Vec<T>) -> Self {
        Self {
            id: format!("{prefix}-{}", uuid::Uuid::new_v4().simple()),
            object: "list".to_string(),
            created: chrono::Utc::now().timestamp(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::NotConfigured(_) => StatusCode::PRECONDITION_FAILED,
            Error::UnknownCamera { .. } => StatusCode::NOT_FOUND,
            Error::UnsupportedCapability(_) => StatusCode::NOT_IMPLEMENTED,
            Error::InvalidImage(_) => StatusCode::BAD_REQUEST,
            Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Auth { .. }
            | Error::Deployment { .. }
            | Error::Inference { .. }
            | Error::MalformedResponse { .. }
            | Error::Transport(_)
            | Error::Camera(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self.0 {
            Error::Auth { body, .. } | Error::Deployment { body, .. } | Error::Inference { body, .. } => {
                body.clone()
            }
            _ => Value::Null,
        };
        tracing::error!(status = status.as_u16(), error = %self.0, "Request failed");
        (
            status,
            Json(json!({ "error": self.0.to_string(), "details": details })),
        )
            .into_response()
    }
}

fn image_from_request(headers: &HeaderMap, body: Bytes) -> Image {
    let mime_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("image/"))
        .unwrap_or("image/jpeg");
    Image::new(body.to_vec(), mime_type)
}

#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len()))]
async fn detections_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ListResponse<crate::types::Detection>>, ApiError> {
    counter!("detection_requests_total").increment(1);
    let image = image_from_request(&headers, body);
    let detections = state.service.get_detections(&image, None).await?;
    Ok(Json(ListResponse::new("detect", detections)))
}

#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len(), count = query.count))]
async fn classifications_handler(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ListResponse<crate::types::Classification>>, ApiError> {
    counter!("classification_requests_total").increment(1);
    let image = image_from_request(&headers, body);
    let classifications = state
        .service
        .get_classifications(&image, query.count, None)
        .await?;
    Ok(Json(ListResponse::new("classify", classifications)))
}

#[tracing::instrument(skip(state))]
async fn camera_detections_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ListResponse<crate::types::Detection>>, ApiError> {
    counter!("detection_requests_total").increment(1);
    let detections = state
        .service
        .get_detections_from_camera(&name, None)
        .await?;
    Ok(Json(ListResponse::new("detect", detections)))
}

#[tracing::instrument(skip(state))]
async fn camera_classifications_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CountQuery>,
) -> Result<Json<ListResponse<crate::types::Classification>>, ApiError> {
    counter!("classification_requests_total").increment(1);
    let classifications = state
        .service
        .get_classifications_from_camera(&name, query.count, None)
        .await?;
    Ok(Json(ListResponse::new("classify", classifications)))
}

async fn point_clouds_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ListResponse<crate::types::PointCloudObject>>, ApiError> {
    let objects = state.service.get_object_point_clouds(&name).await?;
    Ok(Json(ListResponse::new("point-clouds", objects)))
}

async fn do_command_handler(
    State(state): State<AppState>,
    Json(command): Json<Map<String, Value>>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    Ok(Json(state.service.do_command(command).await?))
}

#[tracing::instrument(skip(state, config))]
async fn reconfigure_handler(
    State(state): State<AppState>,
    Json(config): Json<ServiceConfig>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .reconfigure(config, state.cameras.clone())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
