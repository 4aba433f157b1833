//! Reader side of the frame stream.

use std::io;
use std::net::SocketAddr;

use tokio::io::BufReader;
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::frame::Frame;
use crate::framing::{Decoded, FramingError, LengthCodec};

/// Client for a [`FrameStreamServer`](crate::FrameStreamServer)
pub struct FrameStreamClient {
    reader: BufReader<TcpStream>,
    codec: LengthCodec,
    peer: SocketAddr,
    finished: bool,
}

impl FrameStreamClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            reader: BufReader::new(stream),
            codec: LengthCodec::default(),
            peer,
            finished: false,
        })
    }

    /// Limit accepted payload sizes
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.codec = LengthCodec::new(max_frame_size);
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Next frame, or `None` once the terminator has been received.
    ///
    /// A server that goes away without sending the terminator surfaces as
    /// `FramingError::Closed`.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.finished {
            return Ok(None);
        }

        match self.codec.read_frame(&mut self.reader).await? {
            Decoded::Frame(data) => Ok(Some(Frame::from(data))),
            Decoded::Terminator => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Whether the terminator has been received
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
