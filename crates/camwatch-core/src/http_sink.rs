//! HTTP client for a scene-analysis service.

#![cfg(feature = "http-sink")]

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisSink};

/// JSON body posted to the analysis service
#[derive(Serialize)]
struct RequestBody<'a> {
    /// Base64 of the encoded frame
    image: String,
    timestamp: &'a str,
    store: bool,
}

/// Posts motion frames to an HTTP scene-analysis endpoint
#[derive(Clone)]
pub struct HttpAnalysisSink {
    url: String,
    client: reqwest::Client,
}

impl HttpAnalysisSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AnalysisSink for HttpAnalysisSink {
    async fn process(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let timestamp = request.timestamp_iso();
        let body = RequestBody {
            image: base64::engine::general_purpose::STANDARD.encode(request.image.as_bytes()),
            timestamp: &timestamp,
            store: request.store,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::Http(e.to_string())
                }
            })?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => resp
                .json::<AnalysisResult>()
                .await
                .map_err(|e| AnalysisError::BadResponse(e.to_string())),
            other => Err(AnalysisError::BadResponse(format!(
                "status={} body={:?}",
                other,
                resp.text().await.ok()
            ))),
        }
    }
}
