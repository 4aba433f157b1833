//! Frame streaming for camwatch.
//!
//! This crate re-streams encoded camera frames to a single TCP client using a
//! little-endian length-prefixed framing. The server accepts one client at a
//! time and falls back to listening whenever the client goes away.

pub mod client;
pub mod frame;
pub mod framing;
pub mod queue;
pub mod server;
pub mod stats;

pub use client::FrameStreamClient;
pub use frame::Frame;
pub use framing::*;
pub use queue::{FrameQueue, OverflowPolicy, PushOutcome, QueueConfig, QueueItem};
pub use server::{FrameSender, FrameStreamServer, StreamServerConfig, StreamServerError, DEFAULT_STREAM_PORT};
pub use stats::{StreamStats, StreamStatsSnapshot};
