use serde_json::Value;
use thiserror::Error;

/// Which remote deployment an inference call needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Detector,
    Classifier,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Detector => f.write_str("detector"),
            Capability::Classifier => f.write_str("classifier"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: Value },

    #[error("deployment rejected ({status}): {body}")]
    Deployment { status: u16, body: Value },

    #[error("inference request failed ({status}): {body}")]
    Inference { status: u16, body: Value },

    #[error("request timed out")]
    Timeout,

    #[error("{0} is not supported by this service")]
    UnsupportedCapability(&'static str),

    #[error("no {0} is deployed for this service")]
    NotConfigured(Capability),

    #[error("camera {name:?} is not one of the configured source_cams {allowed:?}")]
    UnknownCamera { name: String, allowed: Vec<String> },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        endpoint: &'static str,
        reason: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("camera error: {0}")]
    Camera(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes a response body for error context, falling back to the raw text.
pub(crate) fn decode_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
