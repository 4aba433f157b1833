//! Scene analysis requests and the sink they are sent to.

use async_trait::async_trait;
use camwatch_stream::Frame;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Analysis sink error
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("http error: {0}")]
    Http(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("analysis timed out")]
    Timeout,
}

/// Frame submitted for analysis once motion is confirmed
#[derive(Clone, Debug)]
pub struct AnalysisRequest {
    pub image: Frame,
    pub timestamp: DateTime<Utc>,
    /// Ask the service to keep the image
    pub store: bool,
}

impl AnalysisRequest {
    pub fn new(image: Frame, timestamp: DateTime<Utc>, store: bool) -> Self {
        Self {
            image,
            timestamp,
            store,
        }
    }

    /// ISO-8601 UTC timestamp, e.g. `2024-05-01T12:00:00.123456+00:00`
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

/// Something detected in the scene
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, alias = "type")]
    pub label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Service-specific attributes
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Structured analysis result
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// Receives frames with confirmed motion
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    async fn process(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

/// Sink that only logs, used when no analysis service is configured
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AnalysisSink for LogSink {
    async fn process(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        info!(
            timestamp = %request.timestamp_iso(),
            len = request.image.len(),
            store = request.store,
            "Motion frame"
        );
        Ok(AnalysisResult::default())
    }
}
