use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Image;

/// Something that can hand over the current frame as an encoded image.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn get_image(&self) -> Result<Image>;
}

pub type CameraRegistry = HashMap<String, Arc<dyn Camera>>;

/// Camera reachable through a still-image snapshot URL.
pub struct HttpSnapshotCamera {
    http: reqwest::Client,
    url: String,
}

impl HttpSnapshotCamera {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build camera client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Camera for HttpSnapshotCamera {
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    async fn get_image(&self) -> Result<Image> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Camera(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Camera(format!("snapshot returned {status}")));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or_else(|| "image/jpeg".to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Camera(e.to_string()))?;

        Ok(Image::new(data.to_vec(), mime_type))
    }
}
