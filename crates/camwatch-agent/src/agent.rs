//! Agent wiring: stream server, frame source, analysis sink, pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use camwatch_core::{
    AnalysisSink, DirectorySource, FrameSource, LibcameraSource, LogSink, MotionDetector, Pipeline,
};
use camwatch_stream::{FrameSender, FrameStreamServer};

use crate::config::{AgentConfig, SourceKind};

/// How long shutdown waits for the terminator to be written
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(2);

/// Run the agent until the frame source ends or Ctrl-C is received
pub async fn run(config: AgentConfig) -> Result<()> {
    let server = FrameStreamServer::bind(config.to_stream_config())
        .await
        .context("Failed to start frame stream server")?;
    let sender = server.sender();

    let sink = build_sink(&config)?;
    let source = build_source(&config)?;

    info!("Frame stream listening on {}", server.local_addr());
    let server_task = server.spawn();
    let detector = MotionDetector::new(config.to_motion_config());

    let mut pipeline = Pipeline::new(source, sender.clone(), detector, sink, config.to_pipeline_config());
    let stats = pipeline.stats();

    let outcome = tokio::select! {
        result = pipeline.run() => result.context("Pipeline stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    drop(pipeline);
    finish_session(&sender).await;
    server_task.abort();

    let pipeline_stats = stats.snapshot();
    let stream_stats = sender.stats();
    info!(
        frames = pipeline_stats.frames,
        motion_frames = pipeline_stats.motion_frames,
        analyses = pipeline_stats.analyses_dispatched,
        frames_sent = stream_stats.frames_sent,
        sessions = stream_stats.sessions_accepted,
        "Agent stopped"
    );

    outcome
}

fn build_sink(config: &AgentConfig) -> Result<Arc<dyn AnalysisSink>> {
    match &config.analysis_url {
        #[cfg(feature = "http-sink")]
        Some(url) => {
            let sink = camwatch_core::HttpAnalysisSink::new(url.clone(), config.analysis_timeout())
                .context("Failed to build analysis client")?;
            info!("Submitting motion frames to {}", url);
            Ok(Arc::new(sink))
        }
        #[cfg(not(feature = "http-sink"))]
        Some(url) => anyhow::bail!("analysis_url {} set but HTTP support is not compiled in", url),
        None => {
            info!("No analysis_url configured, motion frames are logged only");
            Ok(Arc::new(LogSink))
        }
    }
}

fn build_source(config: &AgentConfig) -> Result<Box<dyn FrameSource>> {
    match config.source {
        SourceKind::Camera => {
            let source = LibcameraSource::start(config.to_capture_config())?;
            Ok(Box::new(source))
        }
        SourceKind::Directory => {
            let dir = config
                .replay_dir
                .as_ref()
                .context("source = directory requires replay_dir")?;
            let source = DirectorySource::open(dir, config.fps)
                .with_context(|| format!("Failed to open replay directory {:?}", dir))?;
            Ok(Box::new(source))
        }
    }
}

/// End the current session so a connected viewer sees a terminator
async fn finish_session(sender: &FrameSender) {
    let before = sender.stats();
    if before.peer.is_none() || !sender.end_session() {
        return;
    }
    let flushed = tokio::time::timeout(SHUTDOWN_FLUSH, async {
        while sender.stats().sessions_ended == before.sessions_ended {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if flushed.is_err() {
        warn!("Session did not drain before shutdown");
    }
}
