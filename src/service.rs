use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::camera::{Camera, CameraRegistry};
use crate::client::RemoteClient;
use crate::config::ServiceConfig;
use crate::error::{Capability, Error, Result};
use crate::translate::rank_classifications;
use crate::types::{Classification, DeploymentId, Detection, Image, PointCloudObject};
use crate::vision::Vision;

/// Everything one successful reconfiguration produced.
struct Deployment {
    client: RemoteClient,
    detector: Option<DeploymentId>,
    classifier: Option<DeploymentId>,
    source_cams: Vec<String>,
    cameras: CameraRegistry,
}

impl Deployment {
    fn camera(&self, name: &str) -> Result<&Arc<dyn Camera>> {
        if !self.source_cams.iter().any(|cam| cam == name) {
            return Err(Error::UnknownCamera {
                name: name.to_string(),
                allowed: self.source_cams.clone(),
            });
        }
        self.cameras
            .get(name)
            .ok_or_else(|| Error::Camera(format!("camera {name:?} is not available")))
    }

    async fn detect(&self, image: &Image, timeout: Option<Duration>) -> Result<Vec<Detection>> {
        let id = self
            .detector
            .as_ref()
            .ok_or(Error::NotConfigured(Capability::Detector))?;
        let (width, height) = image.dimensions()?;
        self.client.detect(id, image, width, height, timeout).await
    }

    async fn classify(
        &self,
        image: &Image,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Classification>> {
        let id = self
            .classifier
            .as_ref()
            .ok_or(Error::NotConfigured(Capability::Classifier))?;
        let scores = self.client.classify(id, image, timeout).await?;
        Ok(rank_classifications(scores, count))
    }
}

enum State {
    NotReady(String),
    Ready(Arc<Deployment>),
}

/// DirectAI-backed vision service.
pub struct DirectAiService {
    name: String,
    timeout: Duration,
    state: RwLock<State>,
}

impl DirectAiService {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            state: RwLock::new(State::NotReady("not configured yet".into())),
        }
    }

    pub async fn new_service(
        name: impl Into<String>,
        timeout: Duration,
        config: ServiceConfig,
        cameras: CameraRegistry,
    ) -> Result<Self> {
        let service = Self::new(name, timeout);
        service.reconfigure(config, cameras).await?;
        Ok(service)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.read().await, State::Ready(_))
    }

    /// Swaps in a fresh token and fresh deployments. A failure leaves the
    /// service rejecting inference until the next successful call.
    #[tracing::instrument(skip(self, config, cameras), fields(service = %self.name))]
    pub async fn reconfigure(&self, config: ServiceConfig, cameras: CameraRegistry) -> Result<()> {
        match self.deploy(config, cameras).await {
            Ok(deployment) => {
                *self.state.write().await = State::Ready(Arc::new(deployment));
                tracing::info!("Service reconfigured");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Reconfiguration failed, service not ready");
                *self.state.write().await = State::NotReady(err.to_string());
                Err(err)
            }
        }
    }

    async fn deploy(&self, config: ServiceConfig, cameras: CameraRegistry) -> Result<Deployment> {
        let source_cams = config.validate()?;
        if let Some(missing) = source_cams.iter().find(|cam| !cameras.contains_key(*cam)) {
            return Err(Error::Config(format!(
                "source camera {missing:?} has no camera dependency"
            )));
        }

        let credentials = config.credentials_source().load()?;
        let client = RemoteClient::connect(credentials, self.timeout).await?;

        let detector = match &config.deployed_detector {
            Some(detector) => Some(
                client
                    .deploy_detector(&detector.detector_configs, detector.nms_threshold)
                    .await?,
            ),
            None => {
                tracing::info!("No deployed detector in config");
                None
            }
        };
        let classifier = match &config.deployed_classifier {
            Some(classifier) => Some(
                client
                    .deploy_classifier(&classifier.classifier_configs)
                    .await?,
            ),
            None => {
                tracing::info!("No deployed classifier in config");
                None
            }
        };

        Ok(Deployment {
            client,
            detector,
            classifier,
            source_cams,
            cameras,
        })
    }

    async fn ready(&self) -> Result<Arc<Deployment>> {
        match &*self.state.read().await {
            State::Ready(deployment) => Ok(Arc::clone(deployment)),
            State::NotReady(reason) => Err(Error::Config(format!(
                "service {} is not ready: {reason}",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl Vision for DirectAiService {
    #[tracing::instrument(skip(self, image), fields(service = %self.name))]
    async fn get_detections(
        &self,
        image: &Image,
        timeout: Option<Duration>,
    ) -> Result<Vec<Detection>> {
        self.ready().await?.detect(image, timeout).await
    }

    #[tracing::instrument(skip(self), fields(service = %self.name))]
    async fn get_detections_from_camera(
        &self,
        camera_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<Detection>> {
        let deployment = self.ready().await?;
        let image = deployment.camera(camera_name)?.get_image().await?;
        deployment.detect(&image, timeout).await
    }

    #[tracing::instrument(skip(self, image), fields(service = %self.name))]
    async fn get_classifications(
        &self,
        image: &Image,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Classification>> {
        self.ready().await?.classify(image, count, timeout).await
    }

    #[tracing::instrument(skip(self), fields(service = %self.name))]
    async fn get_classifications_from_camera(
        &self,
        camera_name: &str,
        count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Classification>> {
        let deployment = self.ready().await?;
        let image = deployment.camera(camera_name)?.get_image().await?;
        deployment.classify(&image, count, timeout).await
    }

    async fn get_object_point_clouds(&self, _camera_name: &str) -> Result<Vec<PointCloudObject>> {
        Err(Error::UnsupportedCapability("get_object_point_clouds"))
    }

    async fn do_command(&self, _command: Map<String, Value>) -> Result<Map<String, Value>> {
        Err(Error::UnsupportedCapability("do_command"))
    }
}
