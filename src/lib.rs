//! DirectAI cloud detection and classification behind a vision service interface.

pub mod api;
pub mod camera;
pub mod client;
pub mod config;
pub mod error;
pub mod service;
pub mod translate;
pub mod types;
pub mod vision;

pub use camera::{Camera, CameraRegistry, HttpSnapshotCamera};
pub use client::{RemoteClient, SessionToken, authenticate};
pub use config::{CredentialsSource, ServiceConfig};
pub use error::{Capability, Error, Result};
pub use service::DirectAiService;
pub use types::{
    Classification, ClassifierConfig, Credentials, DeploymentId, Detection, DetectorConfig, Image,
};
pub use vision::Vision;
