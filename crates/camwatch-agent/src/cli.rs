//! Command-line and environment overrides

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use camwatch_stream::OverflowPolicy;

use crate::config::{AgentConfig, SourceKind};

/// camwatch agent - camera capture, motion detection and frame streaming
///
/// Every option can also be given as a `CAMWATCH_*` environment variable.
/// Flags win over the environment, which wins over the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "camwatch-agent")]
#[command(version, about = "camwatch agent - camera capture, motion detection and frame streaming")]
pub struct Cli {
    /// Config file path (TOML)
    #[arg(short = 'f', long, env = "CAMWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Frame stream listen address
    #[arg(short, long, env = "CAMWATCH_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Frames buffered per session, 0 for unbounded
    #[arg(long, env = "CAMWATCH_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// drop_oldest or drop_newest
    #[arg(long, env = "CAMWATCH_OVERFLOW_POLICY")]
    pub overflow_policy: Option<OverflowPolicy>,

    /// camera or directory
    #[arg(long, env = "CAMWATCH_SOURCE")]
    pub source: Option<SourceKind>,

    /// Capture program, libcamera-vid or rpicam-vid
    #[arg(long, env = "CAMWATCH_CAMERA_PROGRAM")]
    pub camera_program: Option<String>,

    /// Directory replayed when source = directory
    #[arg(short = 'd', long, env = "CAMWATCH_REPLAY_DIR")]
    pub replay_dir: Option<PathBuf>,

    #[arg(long, env = "CAMWATCH_WIDTH")]
    pub width: Option<u32>,

    #[arg(long, env = "CAMWATCH_HEIGHT")]
    pub height: Option<u32>,

    #[arg(long, env = "CAMWATCH_FPS")]
    pub fps: Option<u32>,

    /// Sensor rotation, 0 or 180
    #[arg(long, env = "CAMWATCH_ROTATION")]
    pub rotation: Option<u32>,

    /// Pixel intensity difference counted as a change
    #[arg(long, env = "CAMWATCH_THRESHOLD")]
    pub threshold: Option<u8>,

    /// Changed pixels needed for motion
    #[arg(long, env = "CAMWATCH_CHANGED_PIXEL_FLOOR")]
    pub changed_pixel_floor: Option<u64>,

    /// Frames reported as motion after a trigger
    #[arg(long, env = "CAMWATCH_COOLDOWN_FRAMES")]
    pub cooldown_frames: Option<u32>,

    /// Scene-analysis endpoint
    #[arg(long, env = "CAMWATCH_ANALYSIS_URL")]
    pub analysis_url: Option<String>,

    #[arg(long, env = "CAMWATCH_ANALYSIS_TIMEOUT_SECS")]
    pub analysis_timeout_secs: Option<u64>,

    /// Concurrent analysis calls
    #[arg(long, env = "CAMWATCH_MAX_IN_FLIGHT_ANALYSES")]
    pub max_in_flight_analyses: Option<usize>,

    /// Ask the analysis service to keep images
    #[arg(long, env = "CAMWATCH_STORE", action = ArgAction::Set)]
    pub store: Option<bool>,
}

impl Cli {
    /// Overwrite every setting given on the command line or in the environment
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(policy) = self.overflow_policy {
            config.overflow_policy = policy;
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        if let Some(program) = &self.camera_program {
            config.camera_program = program.clone();
        }
        if let Some(dir) = &self.replay_dir {
            config.replay_dir = Some(dir.clone());
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(rotation) = self.rotation {
            config.rotation = rotation;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(floor) = self.changed_pixel_floor {
            config.changed_pixel_floor = floor;
        }
        if let Some(cooldown) = self.cooldown_frames {
            config.cooldown_frames = cooldown;
        }
        if let Some(url) = &self.analysis_url {
            config.analysis_url = (!url.is_empty()).then(|| url.clone());
        }
        if let Some(secs) = self.analysis_timeout_secs {
            config.analysis_timeout_secs = secs;
        }
        if let Some(max) = self.max_in_flight_analyses {
            config.max_in_flight_analyses = max;
        }
        if let Some(store) = self.store {
            config.store = store;
        }
    }
}
