use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::{
    result::InferenceResult,
    wire::{self, WireError},
};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("inference service answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Payload(#[from] WireError),
    #[error("{0}")]
    Other(String),
}

/// Blocking request/response call to the neural inference service.
///
/// Implementations must be shareable across threads; the pipeline keeps one
/// client behind an `Arc` and calls it from its scheduler stage only.
pub trait InferenceClient: Send + Sync {
    fn infer(&self, jpeg: &[u8]) -> Result<InferenceResult, InferenceError>;
}

/// Posts JPEG frames to an HTTP endpoint and parses the JSON answer.
pub struct HttpInferenceClient {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InferenceError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl InferenceClient for HttpInferenceClient {
    fn infer(&self, jpeg: &[u8]) -> Result<InferenceResult, InferenceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg.to_vec())
            .send()?;

        let status = response.status();
        let body = response.bytes()?;
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let result = wire::parse_result(&body)?;
        debug!(
            endpoint = %self.endpoint,
            predictions = result.len(),
            "inference response parsed"
        );
        Ok(result)
    }
}

impl<T: InferenceClient + ?Sized> InferenceClient for std::sync::Arc<T> {
    fn infer(&self, jpeg: &[u8]) -> Result<InferenceResult, InferenceError> {
        (**self).infer(jpeg)
    }
}
