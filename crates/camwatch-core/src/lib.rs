//! Core logic for camwatch.
//!
//! - `motion`: frame-differencing motion detector with cooldown
//! - `source`, `capture`, `replay`: where frames come from
//! - `analysis`, `http_sink`: where motion frames go
//! - `pipeline`: the loop tying sources, the stream server and analysis together

pub mod analysis;
pub mod capture;
pub mod http_sink;
pub mod motion;
pub mod pipeline;
pub mod replay;
pub mod source;

pub use analysis::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisSink, Entity, LogSink};
pub use capture::{CaptureConfig, LibcameraSource, MjpegSplitter};
#[cfg(feature = "http-sink")]
pub use http_sink::HttpAnalysisSink;
pub use motion::{DecodeError, MotionConfig, MotionDetector, MotionPhase, CHANGED_PIXEL_FLOOR};
pub use pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineStats, PipelineStatsSnapshot};
pub use replay::DirectorySource;
pub use source::{FrameSource, SourceError};
