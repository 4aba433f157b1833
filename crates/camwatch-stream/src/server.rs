//! Single-client frame stream server.
//!
//! The server alternates between two states for its whole lifetime:
//! `Listening` (a fresh queue is installed and `accept` is pending) and
//! `Streaming` (the queue is drained to the one connected client). Any
//! session end puts it back in `Listening` with a brand-new queue, so frames
//! queued for a previous session are never replayed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::frame::Frame;
use crate::framing::{FramingError, LengthCodec};
use crate::queue::{FrameQueue, PushOutcome, QueueConfig, QueueItem};
use crate::stats::{StreamStats, StreamStatsSnapshot};

/// Default TCP port of the stream service
pub const DEFAULT_STREAM_PORT: u16 = 8181;

/// Pause after a failed accept before listening again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Stream server configuration
#[derive(Clone, Debug)]
pub struct StreamServerConfig {
    pub listen_addr: SocketAddr,
    pub queue: QueueConfig,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            queue: QueueConfig::unbounded(),
        }
    }
}

/// Stream server error.
///
/// `Bind` is fatal and surfaces from [`FrameStreamServer::bind`]. `Accept`
/// and `Write` are connection errors: the server logs them and goes back to
/// listening.
#[derive(Debug, Error)]
pub enum StreamServerError {
    #[error("failed to bind stream server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("write to {peer} failed: {source}")]
    Write {
        peer: SocketAddr,
        #[source]
        source: FramingError,
    },
}

impl StreamServerError {
    /// True for errors recovered by returning to `Listening`
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Accept(_) | Self::Write { .. })
    }
}

/// Slot holding the queue of the current session attempt
type QueueSlot = Arc<Mutex<Option<FrameQueue>>>;

/// Producer-side handle of a [`FrameStreamServer`]
#[derive(Clone)]
pub struct FrameSender {
    slot: QueueSlot,
    stats: Arc<StreamStats>,
}

impl FrameSender {
    /// Queue a frame for the connected (or next) client.
    ///
    /// Never blocks and never fails. Before the server has installed its
    /// first queue the frame is dropped. Empty frames cannot be framed
    /// (length 0 is the terminator) and are dropped too.
    pub fn send(&self, frame: Frame) {
        if frame.is_empty() {
            debug!("Dropping empty frame, length 0 is reserved for the terminator");
            return;
        }

        let slot = self.slot.lock();
        let Some(queue) = slot.as_ref() else {
            trace!("Stream server not ready, frame dropped");
            return;
        };

        match queue.push(QueueItem::Frame(frame)) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest | PushOutcome::DroppedNewest => {
                self.stats.record_dropped();
                trace!(generation = queue.generation(), "Frame queue full, frame dropped");
            }
        }
    }

    /// Ask the server to end the current session with a terminator frame.
    /// Returns false when no queue exists yet.
    pub fn end_session(&self) -> bool {
        match self.slot.lock().as_ref() {
            Some(queue) => {
                queue.push(QueueItem::EndOfSession);
                true
            }
            None => false,
        }
    }

    /// Whether the server has installed a queue
    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Frames waiting in the current queue
    pub fn queued(&self) -> usize {
        self.slot.lock().as_ref().map(FrameQueue::frame_count).unwrap_or(0)
    }

    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }
}

/// One accepted client and the queue feeding it
struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    queue: FrameQueue,
}

enum ServerState {
    Listening { queue: FrameQueue },
    Streaming(Session),
}

/// How a session finished
enum SessionEnd {
    Terminated,
    Failed(StreamServerError),
}

/// Frame stream server
pub struct FrameStreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: StreamServerConfig,
    codec: LengthCodec,
    slot: QueueSlot,
    stats: Arc<StreamStats>,
    generation: u64,
}

impl FrameStreamServer {
    /// Bind the listening socket. Failure here is fatal for the server.
    pub async fn bind(config: StreamServerConfig) -> Result<Self, StreamServerError> {
        let addr = config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StreamServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StreamServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            local_addr,
            config,
            codec: LengthCodec::unlimited(),
            slot: Arc::new(Mutex::new(None)),
            stats: Arc::new(StreamStats::new()),
            generation: 0,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Producer handle. Usable before the server runs; frames sent before
    /// the first queue is installed are dropped.
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            slot: self.slot.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Run the server on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept and stream forever
    pub async fn run(mut self) {
        info!(addr = %self.local_addr, "Frame stream server listening");

        let mut state = ServerState::Listening {
            queue: self.install_queue(),
        };
        loop {
            state = match state {
                ServerState::Listening { queue } => self.accept(queue).await,
                ServerState::Streaming(session) => self.stream(session).await,
            };
        }
    }

    /// Replace the current queue with an empty one. The previous queue, and
    /// anything still in it, is discarded.
    fn install_queue(&mut self) -> FrameQueue {
        self.generation += 1;
        let queue = FrameQueue::new(self.config.queue, self.generation);
        let previous = self.slot.lock().replace(queue.clone());

        if let Some(previous) = previous {
            let lost = previous.frame_count();
            if lost > 0 {
                self.stats.record_lost(lost);
                debug!(generation = previous.generation(), lost, "Discarded undelivered frames");
            }
        }
        queue
    }

    async fn accept(&mut self, queue: FrameQueue) -> ServerState {
        debug!(generation = queue.generation(), "Ready for new incoming connection");

        match self.listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "New incoming connection");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
                }
                self.stats.session_started(peer);
                ServerState::Streaming(Session { stream, peer, queue })
            }
            Err(e) => {
                let err = StreamServerError::Accept(e);
                warn!("{}", err);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                ServerState::Listening {
                    queue: self.install_queue(),
                }
            }
        }
    }

    async fn stream(&mut self, session: Session) -> ServerState {
        let Session {
            mut stream,
            peer,
            queue,
        } = session;

        let end = loop {
            match queue.pop().await {
                QueueItem::Frame(frame) => {
                    if let Err(source) = self.codec.write_frame(&mut stream, frame.as_bytes()).await {
                        break SessionEnd::Failed(StreamServerError::Write { peer, source });
                    }
                    self.stats.record_sent(frame.len());
                }
                QueueItem::EndOfSession => {
                    break match LengthCodec::write_terminator(&mut stream).await {
                        Ok(()) => SessionEnd::Terminated,
                        Err(source) => SessionEnd::Failed(StreamServerError::Write { peer, source }),
                    };
                }
            }
        };

        match end {
            SessionEnd::Terminated => {
                info!(%peer, "Session ended with terminator");
                if let Err(e) = stream.shutdown().await {
                    debug!(%peer, "Shutdown after terminator failed: {}", e);
                }
            }
            SessionEnd::Failed(e) => {
                warn!(%peer, "Connection lost: {}", e);
            }
        }
        drop(stream);
        drop(queue);

        let queue = self.install_queue();
        self.stats.session_ended();
        ServerState::Listening { queue }
    }
}
