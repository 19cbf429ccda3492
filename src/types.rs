use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.free.directai.io";

#[derive(Clone, PartialEq, Deserialize)]
pub struct Credentials {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Credentials {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

// Never print the secret.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub name: String,
    pub examples_to_include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples_to_exclude: Option<Vec<String>>,
    pub detection_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub name: String,
    pub examples_to_include: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples_to_exclude: Option<Vec<String>>,
}

/// Opaque id the remote service hands back for an uploaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(pub String);

impl DeploymentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub class_name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointCloudObject {
    pub point_cloud: Vec<u8>,
}

/// An encoded image as handed over by a camera or a caller.
#[derive(Clone, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Image {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self::new(data, "image/jpeg")
    }

    /// Reads width and height from the encoded header without decoding pixels.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        image::ImageReader::new(Cursor::new(&self.data))
            .with_guessed_format()
            .map_err(|e| Error::InvalidImage(e.to_string()))?
            .into_dimensions()
            .map_err(|e| Error::InvalidImage(e.to_string()))
    }

    pub(crate) fn file_name(&self) -> String {
        let extension = match self.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "jpg",
        };
        format!("image.{extension}")
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("bytes", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
