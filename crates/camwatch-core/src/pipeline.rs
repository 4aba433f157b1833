//! Frame pipeline: source -> stream server, motion detector -> analysis.
//!
//! Every frame is forwarded to the stream server first. Motion detection
//! runs on the blocking pool, and every confirmed motion frame is handed to
//! the analysis sink on its own task, so a slow service never stalls capture.
//! At most `max_in_flight` sink calls run at once; the rest wait their turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camwatch_stream::{Frame, FrameSender};
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisSink};
use crate::motion::MotionDetector;
use crate::source::{FrameSource, SourceError};

/// Pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame source failed: {0}")]
    Source(#[from] SourceError),

    #[error("motion detection task failed: {0}")]
    Detector(#[from] tokio::task::JoinError),
}

/// Pipeline settings
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Passed through to the analysis service
    pub store: bool,
    pub analysis_timeout: Duration,
    /// Concurrent analysis calls; further motion frames queue for a slot
    pub max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: true,
            analysis_timeout: Duration::from_secs(10),
            max_in_flight: 2,
        }
    }
}

/// Pipeline counters
#[derive(Default)]
pub struct PipelineStats {
    frames: AtomicU64,
    motion_frames: AtomicU64,
    decode_failures: AtomicU64,
    analyses_dispatched: AtomicU64,
    analyses_completed: AtomicU64,
    analyses_failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub frames: u64,
    pub motion_frames: u64,
    pub decode_failures: u64,
    pub analyses_dispatched: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            motion_frames: self.motion_frames.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            analyses_dispatched: self.analyses_dispatched.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
            analyses_failed: self.analyses_failed.load(Ordering::Relaxed),
        }
    }
}

/// Drives frames from a source through streaming, detection and analysis
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    stream: FrameSender,
    detector: Arc<Mutex<MotionDetector>>,
    sink: Arc<dyn AnalysisSink>,
    config: PipelineConfig,
    in_flight: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        stream: FrameSender,
        detector: MotionDetector,
        sink: Arc<dyn AnalysisSink>,
        config: PipelineConfig,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            source,
            stream,
            detector: Arc::new(Mutex::new(detector)),
            sink,
            config,
            in_flight,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Pull frames until the source fails
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        info!("Pipeline started");
        loop {
            let frame = self.source.next_frame().await?;
            self.process(frame).await?;
        }
    }

    /// Handle one frame. Returns the detector's verdict, `false` when the
    /// frame could not be decoded.
    pub async fn process(&mut self, frame: Frame) -> Result<bool, PipelineError> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stream.send(frame.clone());

        let detector = self.detector.clone();
        let input = frame.clone();
        let verdict = tokio::task::spawn_blocking(move || detector.lock().update(&input)).await?;

        let active = match verdict {
            Ok(active) => active,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping motion check: {}", e);
                return Ok(false);
            }
        };

        if active {
            self.stats.motion_frames.fetch_add(1, Ordering::Relaxed);
            self.dispatch(frame);
        } else {
            debug!("Waiting for motion");
        }
        Ok(active)
    }

    fn dispatch(&self, frame: Frame) {
        self.stats.analyses_dispatched.fetch_add(1, Ordering::Relaxed);

        let request = AnalysisRequest::new(frame, Utc::now(), self.config.store);
        let sink = self.sink.clone();
        let stats = self.stats.clone();
        let in_flight = self.in_flight.clone();
        let limit = self.config.analysis_timeout;

        tokio::spawn(async move {
            let timestamp = request.timestamp_iso();
            // The semaphore is never closed
            let Ok(_permit) = in_flight.acquire_owned().await else {
                return;
            };

            let outcome = match tokio::time::timeout(limit, sink.process(request)).await {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::Timeout),
            };

            match outcome {
                Ok(result) => {
                    stats.analyses_completed.fetch_add(1, Ordering::Relaxed);
                    info!(%timestamp, entities = ?result.entities, "Analysis complete");
                }
                Err(e) => {
                    stats.analyses_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(%timestamp, "Analysis failed: {}", e);
                }
            }
        });
    }
}
