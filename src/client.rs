use metrics::counter;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{Error, Result, decode_body};
use crate::translate::{detections_from_raw, parse_classify_response, parse_detect_response};
use crate::types::{ClassifierConfig, Credentials, DeploymentId, Detection, DetectorConfig, Image};

#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct DeployResponse {
    deployed_id: String,
}

/// Exchanges client id and secret for a bearer token.
#[tracing::instrument(skip(http, credentials), fields(base_url = %credentials.base_url))]
pub async fn authenticate(
    http: &reqwest::Client,
    credentials: &Credentials,
) -> Result<SessionToken> {
    counter!("directai_remote_requests_total", "endpoint" => "token").increment(1);

    let response = http
        .post(credentials.endpoint("token"))
        .query(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(Error::Auth {
            status: status.as_u16(),
            body: decode_body(&body),
        });
    }

    let token: TokenResponse = serde_json::from_slice(&body).map_err(|_| Error::Auth {
        status: status.as_u16(),
        body: decode_body(&body),
    })?;

    Ok(SessionToken(token.access_token))
}

/// Authenticated session against one DirectAI deployment endpoint.
pub struct RemoteClient {
    http: reqwest::Client,
    credentials: Credentials,
    token: RwLock<SessionToken>,
}

impl RemoteClient {
    /// Builds the HTTP session and fetches the first token.
    pub async fn connect(credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        let token = authenticate(&http, &credentials).await?;

        Ok(Self {
            http,
            credentials,
            token: RwLock::new(token),
        })
    }

    #[tracing::instrument(skip(self, configs), fields(detectors = configs.len()))]
    pub async fn deploy_detector(
        &self,
        configs: &[DetectorConfig],
        nms_threshold: f64,
    ) -> Result<DeploymentId> {
        let body = json!({
            "detector_configs": configs,
            "nms_thresh": nms_threshold,
        });
        let id = self.deploy("deploy_detector", &body).await?;
        tracing::info!(deployed_id = %id, "Detector deployed");
        Ok(id)
    }

    #[tracing::instrument(skip(self, configs), fields(classifiers = configs.len()))]
    pub async fn deploy_classifier(&self, configs: &[ClassifierConfig]) -> Result<DeploymentId> {
        let body = json!({ "classifier_configs": configs });
        let id = self.deploy("deploy_classifier", &body).await?;
        tracing::info!(deployed_id = %id, "Classifier deployed");
        Ok(id)
    }

    async fn deploy(
        &self,
        endpoint: &'static str,
        body: &serde_json::Value,
    ) -> Result<DeploymentId> {
        counter!("directai_remote_requests_total", "endpoint" => endpoint).increment(1);
        let token = self.token.read().await.clone();

        let response = self
            .http
            .post(self.credentials.endpoint(endpoint))
            .bearer_auth(&token.0)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Deployment {
                status: status.as_u16(),
                body: decode_body(&bytes),
            });
        }

        let deployed: DeployResponse =
            serde_json::from_slice(&bytes).map_err(|e| Error::MalformedResponse {
                endpoint,
                reason: e.to_string(),
            })?;
        Ok(DeploymentId(deployed.deployed_id))
    }

    /// Runs the deployed detector on an encoded image and clamps the boxes to
    /// `width` x `height`.
    #[tracing::instrument(skip(self, image), fields(deployed_id = %deployment, bytes = image.data.len()))]
    pub async fn detect(
        &self,
        deployment: &DeploymentId,
        image: &Image,
        width: u32,
        height: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Detection>> {
        let body = self.post_image("detect", deployment, image, timeout).await?;
        let raw = parse_detect_response(&body)?;
        tracing::debug!(boxes = raw.len(), "Detect response received");
        Ok(detections_from_raw(raw, width, height))
    }

    /// Returns the raw class scores in the order the service reported them.
    #[tracing::instrument(skip(self, image), fields(deployed_id = %deployment, bytes = image.data.len()))]
    pub async fn classify(
        &self,
        deployment: &DeploymentId,
        image: &Image,
        timeout: Option<Duration>,
    ) -> Result<Vec<(String, f64)>> {
        let body = self
            .post_image("classify", deployment, image, timeout)
            .await?;
        parse_classify_response(&body)
    }

    /// Uploads the image, refreshing the token and retrying once on 401.
    async fn post_image(
        &self,
        endpoint: &'static str,
        deployment: &DeploymentId,
        image: &Image,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let token = self.token.read().await.clone();
        let mut response = self
            .send_image(endpoint, deployment, image, &token, timeout)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(endpoint, "DirectAI auth token expired, refreshing");
            let token = self.refresh_token(&token).await?;
            response = self
                .send_image(endpoint, deployment, image, &token, timeout)
                .await?;
        }

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(Error::Inference {
                status: status.as_u16(),
                body: decode_body(&body),
            });
        }
        Ok(body.to_vec())
    }

    async fn send_image(
        &self,
        endpoint: &'static str,
        deployment: &DeploymentId,
        image: &Image,
        token: &SessionToken,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        counter!("directai_remote_requests_total", "endpoint" => endpoint).increment(1);

        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name())
            .mime_str(&image.mime_type)
            .map_err(|e| Error::InvalidImage(format!("{}: {e}", image.mime_type)))?;
        let form = Form::new().part("data", part);

        let mut request = self
            .http
            .post(self.credentials.endpoint(endpoint))
            .query(&[("deployed_id", deployment.as_str())])
            .bearer_auth(&token.0)
            .multipart(form);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        Ok(request.send().await?)
    }

    /// Replaces `stale` with a fresh token. When another caller already swapped
    /// it out, the newer token is reused instead of authenticating again.
    async fn refresh_token(&self, stale: &SessionToken) -> Result<SessionToken> {
        let mut current = self.token.write().await;
        if *current != *stale {
            tracing::debug!("Token already refreshed by a concurrent request");
            return Ok(current.clone());
        }

        counter!("directai_token_refreshes_total").increment(1);
        let fresh = authenticate(&self.http, &self.credentials).await?;
        *current = fresh.clone();
        Ok(fresh)
    }
}
