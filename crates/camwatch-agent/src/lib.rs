//! camwatch-agent: camera capture, motion detection and frame streaming

pub mod agent;
pub mod cli;
pub mod config;

pub use agent::run;
pub use cli::Cli;
pub use config::{AgentConfig, ConfigError, SourceKind};
