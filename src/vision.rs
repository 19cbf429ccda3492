use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::Result;
use crate::types::{Classification, Detection, Image, PointCloudObject};

/// Vision service capabilities a host drives.
#[async_trait]
pub trait Vision: Send + Sync {
    async fn get_detections(
        &self,
        image: &Image,
        timeout: Option<Duration>,
    ) -> Result<Vec<Detection>>;

    async fn get_detections_from_camera(
        &self,
        camera_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<Detection>>;

    async fn get_classifications(
        &self,
        image: &Image,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Classification>>;

    async fn get_classifications_from_camera(
        &self,
        camera_name: &str,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Classification>>;

    async fn get_object_point_clouds(&self, camera_name: &str) -> Result<Vec<PointCloudObject>>;

    async fn do_command(&self, command: Map<String, Value>) -> Result<Map<String, Value>>;
}
