//! Length-prefixed framing for the frame stream.
//!
//! Wire format: `length (4 bytes LE) || payload`. A length of zero is the
//! end-of-session terminator and is never followed by payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Zero-length frame marking the end of a session
pub const TERMINATOR: [u8; LENGTH_PREFIX_SIZE] = [0; LENGTH_PREFIX_SIZE];

/// Largest payload the length prefix can describe
pub const MAX_WIRE_FRAME_SIZE: usize = u32::MAX as usize;

/// Default limit applied by readers (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("Empty payload cannot be framed, length 0 is the terminator")]
    EmptyPayload,

    #[error("Stream closed before a terminator was received")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded unit of the stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(Bytes),
    Terminator,
}

/// Length-prefixed frame codec
#[derive(Clone, Copy, Debug)]
pub struct LengthCodec {
    max_frame_size: usize,
}

impl LengthCodec {
    /// Create a new codec with the specified maximum frame size
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_WIRE_FRAME_SIZE),
        }
    }

    /// Codec accepting anything the length prefix can describe
    pub fn unlimited() -> Self {
        Self::new(MAX_WIRE_FRAME_SIZE)
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> Result<(), FramingError> {
        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }
        Ok(())
    }

    /// Encode data with length prefix
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, FramingError> {
        if data.is_empty() {
            return Err(FramingError::EmptyPayload);
        }
        self.check_len(data.len())?;

        let mut encoded = Vec::with_capacity(LENGTH_PREFIX_SIZE + data.len());
        encoded.put_u32_le(data.len() as u32);
        encoded.extend_from_slice(data);
        Ok(encoded)
    }

    /// Decode a single complete unit
    pub fn decode(&self, framed: &[u8]) -> Result<Decoded, FramingError> {
        if framed.len() < LENGTH_PREFIX_SIZE {
            return Err(FramingError::Incomplete(LENGTH_PREFIX_SIZE - framed.len()));
        }

        let mut buf = framed;
        let len = buf.get_u32_le() as usize;
        if len == 0 {
            return Ok(Decoded::Terminator);
        }
        self.check_len(len)?;

        if buf.remaining() < len {
            return Err(FramingError::Incomplete(len - buf.remaining()));
        }

        Ok(Decoded::Frame(Bytes::copy_from_slice(&buf[..len])))
    }

    /// Streaming decoder for partial reads.
    /// Returns None while more data is needed.
    pub fn decode_stream(&self, buf: &mut BytesMut) -> Result<Option<Decoded>, FramingError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = {
            let mut len_buf = &buf[..LENGTH_PREFIX_SIZE];
            len_buf.get_u32_le() as usize
        };

        if len == 0 {
            buf.advance(LENGTH_PREFIX_SIZE);
            return Ok(Some(Decoded::Terminator));
        }
        self.check_len(len)?;

        if buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(Decoded::Frame(buf.split_to(len).freeze())))
    }

    /// Write one frame: the length prefix, then the payload verbatim.
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), FramingError>
    where
        W: AsyncWrite + Unpin,
    {
        if payload.is_empty() {
            return Err(FramingError::EmptyPayload);
        }
        self.check_len(payload.len())?;

        writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write the zero-length terminator
    pub async fn write_terminator<W>(writer: &mut W) -> Result<(), FramingError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&TERMINATOR).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read exactly one unit from the stream.
    ///
    /// A peer closing the connection cleanly between units yields
    /// `FramingError::Closed`; closing inside a unit yields `Incomplete` or
    /// an unexpected-EOF IO error.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Decoded, FramingError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        let mut filled = 0;
        while filled < LENGTH_PREFIX_SIZE {
            let n = reader.read(&mut header[filled..]).await?;
            if n == 0 {
                return Err(if filled == 0 {
                    FramingError::Closed
                } else {
                    FramingError::Incomplete(LENGTH_PREFIX_SIZE - filled)
                });
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        if len == 0 {
            return Ok(Decoded::Terminator);
        }
        self.check_len(len)?;

        let mut payload = BytesMut::zeroed(len);
        reader.read_exact(&mut payload).await?;
        Ok(Decoded::Frame(payload.freeze()))
    }
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
