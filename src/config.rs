use clap::Parser;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ClassifierConfig, Credentials, DEFAULT_BASE_URL, DetectorConfig};

pub const BASE_URL_KEY: &str = "DIRECTAI_BASE_URL";
pub const CLIENT_ID_KEY: &str = "DIRECTAI_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "DIRECTAI_CLIENT_SECRET";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Name the vision service is registered under
    #[arg(long, env = "SERVICE_NAME", default_value = "directai")]
    pub service_name: String,

    /// JSON file holding the service attributes (credentials, source_cams, deployments)
    #[arg(long, env = "SERVICE_CONFIG")]
    pub service_config: Option<PathBuf>,

    /// Default timeout for every call to the DirectAI API, in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Snapshot cameras in format "front=http://cam1/snap.jpg,back=http://cam2/snap.jpg"
    #[arg(long, env = "CAMERAS")]
    pub cameras: Option<String>,
}

impl Config {
    pub fn parse_cameras(&self) -> HashMap<String, String> {
        self.cameras
            .as_ref()
            .map(|cameras| {
                cameras
                    .split(',')
                    .filter_map(|pair| {
                        let (name, url) = pair.split_once('=')?;
                        let (name, url) = (name.trim(), url.trim());
                        if name.is_empty() || url.is_empty() {
                            return None;
                        }
                        Some((name.to_string(), url.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeployedDetector {
    pub nms_threshold: f64,
    pub detector_configs: Vec<DetectorConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeployedClassifier {
    pub classifier_configs: Vec<ClassifierConfig>,
}

/// Attributes the service is (re)configured with.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub access_json: Option<PathBuf>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub source_cams: Vec<String>,
    #[serde(default)]
    pub deployed_detector: Option<DeployedDetector>,
    #[serde(default)]
    pub deployed_classifier: Option<DeployedClassifier>,
}

impl ServiceConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid service config {}: {e}", path.display())))
    }

    /// Checks the attribute shape and returns the camera dependencies it needs.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.access_json.is_some() && self.credentials.is_some() {
            return Err(Error::Config(
                "access_json and credentials are mutually exclusive".into(),
            ));
        }
        if let Some(path) = &self.access_json {
            if !path.to_string_lossy().ends_with(".json") {
                return Err(Error::Config(
                    "the location of the access JSON must end in '.json'".into(),
                ));
            }
        }

        if let Some(detector) = &self.deployed_detector {
            check_threshold("nms_threshold", detector.nms_threshold)?;
            check_names(
                "detector",
                detector
                    .detector_configs
                    .iter()
                    .map(|c| (c.name.as_str(), c.examples_to_include.len())),
            )?;
            for config in &detector.detector_configs {
                check_threshold(
                    &format!("detection_threshold of {:?}", config.name),
                    config.detection_threshold,
                )?;
            }
        }

        if let Some(classifier) = &self.deployed_classifier {
            check_names(
                "classifier",
                classifier
                    .classifier_configs
                    .iter()
                    .map(|c| (c.name.as_str(), c.examples_to_include.len())),
            )?;
        }

        Ok(self.source_cams.clone())
    }

    pub fn credentials_source(&self) -> CredentialsSource {
        match (&self.access_json, &self.credentials) {
            (Some(path), _) => CredentialsSource::File(path.clone()),
            (None, Some(credentials)) => CredentialsSource::Inline(credentials.clone()),
            (None, None) => CredentialsSource::Environment,
        }
    }
}

fn check_threshold(what: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!("{what} must be within [0, 1], got {value}")));
    }
    Ok(())
}

fn check_names<'a>(kind: &str, entries: impl Iterator<Item = (&'a str, usize)>) -> Result<()> {
    let mut seen = HashSet::new();
    for (name, includes) in entries {
        if name.trim().is_empty() {
            return Err(Error::Config(format!("{kind} config with an empty name")));
        }
        if !seen.insert(name) {
            return Err(Error::Config(format!("duplicate {kind} name {name:?}")));
        }
        if includes == 0 {
            return Err(Error::Config(format!(
                "{kind} {name:?} needs at least one example to include"
            )));
        }
    }
    Ok(())
}

/// Where the DirectAI credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialsSource {
    /// Access JSON file keyed by `DIRECTAI_*` names.
    File(PathBuf),
    /// `DIRECTAI_*` process environment variables.
    Environment,
    Inline(Credentials),
}

#[derive(Deserialize)]
struct AccessFile {
    #[serde(rename = "DIRECTAI_BASE_URL")]
    base_url: Option<String>,
    #[serde(rename = "DIRECTAI_CLIENT_ID")]
    client_id: String,
    #[serde(rename = "DIRECTAI_CLIENT_SECRET")]
    client_secret: String,
}

impl CredentialsSource {
    pub fn load(&self) -> Result<Credentials> {
        match self {
            CredentialsSource::File(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read access JSON {}: {e}", path.display()))
                })?;
                let access: AccessFile = serde_json::from_str(&raw).map_err(|e| {
                    Error::Config(format!("invalid access JSON {}: {e}", path.display()))
                })?;
                Ok(Credentials::new(
                    access.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                    access.client_id,
                    access.client_secret,
                ))
            }
            CredentialsSource::Environment => {
                Self::from_lookup(|key| std::env::var(key).ok())
            }
            CredentialsSource::Inline(credentials) => Ok(credentials.clone()),
        }
    }

    /// Resolves credentials through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::Config(format!("{key} is not set")))
        };

        Ok(Credentials::new(
            lookup(BASE_URL_KEY).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            required(CLIENT_ID_KEY)?,
            required(CLIENT_SECRET_KEY)?,
        ))
    }
}
