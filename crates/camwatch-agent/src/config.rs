//! Configuration management
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file
//! (`--config` or `CAMWATCH_CONFIG`), `CAMWATCH_*` environment variables,
//! command-line flags. The last two are parsed by [`Cli`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use camwatch_core::{CaptureConfig, MotionConfig, PipelineConfig, CHANGED_PIXEL_FLOOR};
use camwatch_stream::{OverflowPolicy, QueueConfig, StreamServerConfig, DEFAULT_STREAM_PORT};

use crate::cli::Cli;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Live camera through the capture program
    Camera,
    /// Image files replayed from `replay_dir`
    Directory,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(Self::Camera),
            "directory" | "dir" => Ok(Self::Directory),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Frames buffered per session; unbounded when unset or 0
    pub queue_capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub source: SourceKind,
    pub camera_program: String,
    pub replay_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub rotation: u32,
    pub threshold: u8,
    pub changed_pixel_floor: u64,
    pub cooldown_frames: u32,
    /// Scene-analysis endpoint; motion frames are only logged when unset
    pub analysis_url: Option<String>,
    pub analysis_timeout_secs: u64,
    pub max_in_flight_analyses: usize,
    pub store: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            queue_capacity: None,
            overflow_policy: OverflowPolicy::DropOldest,
            source: SourceKind::Camera,
            camera_program: "libcamera-vid".to_string(),
            replay_dir: None,
            width: 640,
            height: 480,
            fps: 7,
            rotation: 0,
            threshold: 100,
            changed_pixel_floor: CHANGED_PIXEL_FLOOR,
            cooldown_frames: 20,
            analysis_url: None,
            analysis_timeout_secs: 10,
            max_in_flight_analyses: 2,
            store: true,
        }
    }
}

impl AgentConfig {
    /// Build the configuration from parsed overrides
    pub fn load_from(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };

        cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML config file; missing keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        if config.queue_capacity == Some(0) {
            config.queue_capacity = None;
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("width and height must be > 0".to_string()));
        }

        if self.fps == 0 {
            return Err(ConfigError::Invalid("fps must be > 0".to_string()));
        }

        if self.rotation != 0 && self.rotation != 180 {
            return Err(ConfigError::Invalid(format!(
                "rotation must be 0 or 180, got {}",
                self.rotation
            )));
        }

        if self.source == SourceKind::Directory && self.replay_dir.is_none() {
            return Err(ConfigError::Invalid("source = directory requires replay_dir".to_string()));
        }

        if self.analysis_timeout_secs == 0 {
            return Err(ConfigError::Invalid("analysis_timeout_secs must be > 0".to_string()));
        }

        if self.max_in_flight_analyses == 0 {
            return Err(ConfigError::Invalid("max_in_flight_analyses must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn to_stream_config(&self) -> StreamServerConfig {
        StreamServerConfig {
            listen_addr: self.listen_addr,
            queue: match self.queue_capacity {
                Some(capacity) => QueueConfig::bounded(capacity, self.overflow_policy),
                None => QueueConfig::unbounded(),
            },
        }
    }

    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            program: self.camera_program.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            rotation: self.rotation,
        }
    }

    pub fn to_motion_config(&self) -> MotionConfig {
        MotionConfig {
            threshold: self.threshold,
            changed_pixel_floor: self.changed_pixel_floor,
            cooldown_frames: self.cooldown_frames,
        }
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            store: self.store,
            analysis_timeout: self.analysis_timeout(),
            max_in_flight: self.max_in_flight_analyses,
        }
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let argv = std::iter::once("camwatch-agent").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_from(&Cli::default()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8181".parse().unwrap());
        assert_eq!(config.cooldown_frames, 20);
        assert_eq!(config.threshold, 100);
        assert_eq!(config.changed_pixel_floor, 2500);
        assert_eq!((config.width, config.height, config.fps), (640, 480, 7));
        assert!(config.store);
        assert_eq!(config.to_stream_config().queue, QueueConfig::unbounded());
    }

    #[test]
    fn test_flags() {
        let config = AgentConfig::load_from(&cli(&[
            "--fps",
            "30",
            "--queue-capacity",
            "64",
            "--overflow-policy=drop_newest",
            "-l",
            "127.0.0.1:9000",
            "--store",
            "false",
        ]))
        .unwrap();

        assert_eq!(config.fps, 30);
        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(!config.store);
        assert_eq!(
            config.to_stream_config().queue,
            QueueConfig::bounded(64, OverflowPolicy::DropNewest)
        );
    }

    #[test]
    fn test_toml_file_is_lowest_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camwatch.toml");
        std::fs::write(
            &path,
            r#"
                source = "directory"
                replay_dir = "/srv/frames"
                cooldown_frames = 5
                store = false
                queue_capacity = 0
                analysis_url = "http://127.0.0.1:9100/analyze"
            "#,
        )
        .unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = AgentConfig::load_from(&cli(&["--config", &path_str, "--cooldown-frames", "8"])).unwrap();

        assert_eq!(config.source, SourceKind::Directory);
        assert_eq!(config.replay_dir, Some(PathBuf::from("/srv/frames")));
        assert_eq!(config.cooldown_frames, 8);
        assert!(!config.store);
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.fps, 7);
        assert_eq!(config.analysis_url.as_deref(), Some("http://127.0.0.1:9100/analyze"));
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camwatch.toml");
        std::fs::write(&path, "frame_rate = 7\n").unwrap();

        let err = AgentConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AgentConfig::load_from(&cli(&["--rotation", "90"])).is_err());
        assert!(AgentConfig::load_from(&cli(&["--fps", "0"])).is_err());
        assert!(AgentConfig::load_from(&cli(&["--source", "directory"])).is_err());
        assert!(AgentConfig::load_from(&cli(&["--max-in-flight-analyses", "0"])).is_err());
    }

    #[test]
    fn test_malformed_flags_rejected() {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(std::iter::once("camwatch-agent").chain(args.iter().copied()))
        };
        assert!(parse(&["--threshold", "300"]).is_err());
        assert!(parse(&["--bogus", "1"]).is_err());
        assert!(parse(&["--fps"]).is_err());
        assert!(parse(&["stray"]).is_err());
        assert!(parse(&["--overflow-policy", "drop_everything"]).is_err());
    }

    #[test]
    fn test_zero_queue_capacity_means_unbounded() {
        let mut config = AgentConfig {
            queue_capacity: Some(10),
            ..Default::default()
        };
        cli(&["--queue-capacity", "0"]).apply(&mut config);
        assert_eq!(config.queue_capacity, None);
    }
}
