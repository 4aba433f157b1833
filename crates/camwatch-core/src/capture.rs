//! Camera capture through `libcamera-vid` in MJPEG mode.
//!
//! The capture process writes concatenated JPEG images to stdout; the
//! splitter cuts them apart on the SOI/EOI markers.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use camwatch_stream::Frame;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::source::{FrameSource, SourceError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Give up on a partial image once this much data has piled up
const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Camera capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture binary, `libcamera-vid` or `rpicam-vid`
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Sensor rotation in degrees, 0 or 180
    pub rotation: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "libcamera-vid".to_string(),
            width: 640,
            height: 480,
            fps: 7,
            rotation: 0,
        }
    }
}

impl CaptureConfig {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "0".to_string(), // Run indefinitely
            "--nopreview".to_string(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--framerate".to_string(),
            self.fps.to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--flush".to_string(),
            "-o".to_string(),
            "-".to_string(), // Output to stdout
        ];

        if self.rotation != 0 {
            args.push("--rotation".to_string());
            args.push(self.rotation.to_string());
        }
        args
    }
}

/// Splits a concatenated JPEG byte stream into single images
#[derive(Default)]
pub struct MjpegSplitter {
    buf: BytesMut,
    discarded: u64,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete image, if one is buffered
    pub fn next_image(&mut self) -> Option<Frame> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Keep a trailing 0xFF, it may begin the next SOI
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            self.discard(self.buf.len() - keep);
            return None;
        };
        if start > 0 {
            self.discard(start);
        }

        match find(&self.buf, &EOI, SOI.len()) {
            Some(end) => Some(Frame::from(self.buf.split_to(end + EOI.len()).freeze())),
            None => {
                if self.buf.len() > MAX_PENDING_BYTES {
                    warn!(pending = self.buf.len(), "No end of image marker, dropping partial image");
                    self.discard(self.buf.len());
                }
                None
            }
        }
    }

    /// Bytes thrown away outside of any image
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn discard(&mut self, n: usize) {
        if n > 0 {
            let _ = self.buf.split_to(n);
            self.discarded += n as u64;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Live camera source backed by a capture subprocess
pub struct LibcameraSource {
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    chunk: Vec<u8>,
    config: CaptureConfig,
}

impl LibcameraSource {
    /// Spawn the capture process
    pub fn start(config: CaptureConfig) -> Result<Self> {
        let args = config.args();
        info!(
            "Starting {}: {}x{} @ {}fps, rotation {}",
            config.program, config.width, config.height, config.fps, config.rotation
        );
        debug!("{} args: {:?}", config.program, args);

        let mut child = Command::new(&config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}. Is it installed?", config.program))?;

        let stdout = child
            .stdout
            .take()
            .with_context(|| format!("Failed to capture stdout from {}", config.program))?;

        Ok(Self {
            child,
            stdout,
            splitter: MjpegSplitter::new(),
            chunk: vec![0u8; READ_CHUNK],
            config,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

#[async_trait]
impl FrameSource for LibcameraSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        loop {
            if let Some(frame) = self.splitter.next_image() {
                return Ok(frame);
            }

            let n = self.stdout.read(&mut self.chunk).await?;
            if n == 0 {
                let status = self.child.wait().await?;
                if !status.success() {
                    return Err(SourceError::Capture(format!(
                        "{} exited with {}",
                        self.config.program, status
                    )));
                }
                info!("Capture process exited: {}", status);
                return Err(SourceError::Ended);
            }
            self.splitter.push(&self.chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(body);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_split_concatenated_images() {
        let a = jpeg(b"first");
        let b = jpeg(&[1, 2, 0xFF, 0x00, 3]);

        let mut splitter = MjpegSplitter::new();
        splitter.push(&a);
        splitter.push(&b);
        assert_eq!(splitter.next_image().unwrap().as_bytes(), &a[..]);
        assert_eq!(splitter.next_image().unwrap().as_bytes(), &b[..]);
        assert!(splitter.next_image().is_none());
    }

    #[test]
    fn test_split_across_chunks() {
        let a = jpeg(b"split across reads");
        let mut splitter = MjpegSplitter::new();
        for byte in &a[..a.len() - 1] {
            splitter.push(&[*byte]);
            assert!(splitter.next_image().is_none());
        }
        splitter.push(&a[a.len() - 1..]);
        assert_eq!(splitter.next_image().unwrap().as_bytes(), &a[..]);
    }

    #[test]
    fn test_garbage_before_soi_is_discarded() {
        let a = jpeg(b"x");
        let mut splitter = MjpegSplitter::new();
        splitter.push(b"noise\xFF");
        assert!(splitter.next_image().is_none());
        assert_eq!(splitter.discarded(), 5);

        // The kept 0xFF is not part of the next SOI
        splitter.push(&a);
        assert_eq!(splitter.next_image().unwrap().as_bytes(), &a[..]);
        assert_eq!(splitter.discarded(), 6);
    }

    #[test]
    fn test_args_include_rotation_only_when_set() {
        let config = CaptureConfig::default();
        assert!(!config.args().contains(&"--rotation".to_string()));

        let rotated = CaptureConfig {
            rotation: 180,
            ..Default::default()
        };
        let args = rotated.args();
        let pos = args.iter().position(|a| a == "--rotation").unwrap();
        assert_eq!(args[pos + 1], "180");
        assert!(args.windows(2).any(|w| w[0] == "--codec" && w[1] == "mjpeg"));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_start() {
        let config = CaptureConfig {
            program: "camwatch-no-such-capture-binary".to_string(),
            ..Default::default()
        };
        assert!(LibcameraSource::start(config).is_err());
    }

    /// Capture program stand-in: ignores its arguments, prints two images,
    /// exits with `code`
    #[cfg(unix)]
    fn fake_camera(dir: &std::path::Path, code: i32) -> CaptureConfig {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(format!("fake-camera-{}", code));
        let script = format!(
            "#!/bin/sh\nprintf '\\377\\330one\\377\\331\\377\\330two\\377\\331'\nexit {}\n",
            code
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        CaptureConfig {
            program: path.to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    #[cfg(unix)]
    fn start(config: &CaptureConfig) -> LibcameraSource {
        // A freshly written script can briefly fail with ETXTBSY
        for _ in 0..20 {
            if let Ok(source) = LibcameraSource::start(config.clone()) {
                return source;
            }
            std::thread::sleep(std::time::Duration::from_millis(25));
        }
        panic!("failed to start {}", config.program);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_exit_ends_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = start(&fake_camera(dir.path(), 0));

        assert_eq!(source.next_frame().await.unwrap().as_bytes(), &jpeg(b"one")[..]);
        assert_eq!(source.next_frame().await.unwrap().as_bytes(), &jpeg(b"two")[..]);
        assert!(matches!(source.next_frame().await, Err(SourceError::Ended)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_exit_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = start(&fake_camera(dir.path(), 3));

        assert_eq!(source.next_frame().await.unwrap().as_bytes(), &jpeg(b"one")[..]);
        assert_eq!(source.next_frame().await.unwrap().as_bytes(), &jpeg(b"two")[..]);
        match source.next_frame().await {
            Err(SourceError::Capture(msg)) => assert!(msg.contains("fake-camera-3")),
            other => panic!("expected capture error, got {:?}", other.map(|f| f.len())),
        }
    }
}
