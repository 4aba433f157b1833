//! Replays still images from a directory as if they came from a camera.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use camwatch_stream::Frame;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::source::{FrameSource, SourceError};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Loops over the image files of a directory, in file name order, one frame
/// per tick.
pub struct DirectorySource {
    paths: Vec<PathBuf>,
    next: usize,
    period: Duration,
    ticker: Option<Interval>,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>, fps: u32) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::Empty(dir.to_path_buf()));
        }

        let period = Duration::from_secs(1) / fps.max(1);
        info!("Replaying {} images from {:?} every {:?}", paths.len(), dir, period);

        Ok(Self {
            paths,
            next: 0,
            period,
            ticker: None,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl FrameSource for DirectorySource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;

        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();

        let data = tokio::fs::read(path).await?;
        debug!(len = data.len(), "Replayed {:?}", path);
        Ok(Frame::from(data))
    }
}
