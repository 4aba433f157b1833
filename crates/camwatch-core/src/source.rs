//! Frame sources.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use camwatch_stream::Frame;
use thiserror::Error;

/// Frame source error
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("no image files found in {0}")]
    Empty(PathBuf),

    #[error("capture stream ended")]
    Ended,

    #[error("capture error: {0}")]
    Capture(String),
}

/// Infinite, non-restartable sequence of encoded frames.
///
/// `next_frame` waits until the next frame is due. Any error ends the
/// sequence.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        (**self).next_frame().await
    }
}
