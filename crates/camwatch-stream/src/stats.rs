//! Streaming statistics shared between the server task and its senders.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for the lifetime of one stream server
pub struct StreamStats {
    sessions_accepted: AtomicU64,
    sessions_ended: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_lost: AtomicU64,
    active: Mutex<Option<(SocketAddr, Instant)>>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            sessions_accepted: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_lost: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    pub(crate) fn session_started(&self, peer: SocketAddr) {
        self.sessions_accepted.fetch_add(1, Ordering::SeqCst);
        *self.active.lock() = Some((peer, Instant::now()));
    }

    pub(crate) fn session_ended(&self) {
        *self.active.lock() = None;
        self.sessions_ended.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Frame discarded by a bounded queue
    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames still queued when their queue was replaced
    pub(crate) fn record_lost(&self, frames: usize) {
        self.frames_lost.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        let active = *self.active.lock();
        StreamStatsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::SeqCst),
            sessions_ended: self.sessions_ended.load(Ordering::SeqCst),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_lost: self.frames_lost.load(Ordering::Relaxed),
            peer: active.map(|(peer, _)| peer),
            session_duration: active.map(|(_, since)| since.elapsed()),
        }
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Clone, Debug)]
pub struct StreamStatsSnapshot {
    pub sessions_accepted: u64,
    pub sessions_ended: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
    pub frames_lost: u64,
    /// Currently connected client
    pub peer: Option<SocketAddr>,
    pub session_duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let stats = StreamStats::new();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        stats.session_started(peer);
        stats.record_sent(100);
        stats.record_sent(50);
        let snap = stats.snapshot();
        assert_eq!(snap.peer, Some(peer));
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 150);

        stats.session_ended();
        stats.record_lost(3);
        let snap = stats.snapshot();
        assert!(snap.peer.is_none());
        assert!(snap.session_duration.is_none());
        assert_eq!(snap.sessions_accepted, 1);
        assert_eq!(snap.sessions_ended, 1);
        assert_eq!(snap.frames_lost, 3);
    }
}
