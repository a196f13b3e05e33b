//! Length-delimited JSON codec for the bridge stream.
//!
//! Wire format: 4-byte big-endian length prefix + UTF-8 JSON object payload.
//! The limit is enforced on both sides: an oversize payload is never written,
//! and an oversize declared length is rejected before its payload is read.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;
use crate::{ProtocolError, Result, LENGTH_PREFIX_SIZE, MAX_FRAME_BYTES};

/// Encode a message into a complete frame.
pub fn encode_message(message: &Message, max_frame_bytes: usize) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let length = checked_length(payload.len(), max_frame_bytes)?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame payload (without its length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ProtocolError::Malformed("received a non-UTF-8 payload".into()))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::Malformed(format!("received invalid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ProtocolError::Malformed(
            "protocol message must decode to a JSON object".into(),
        )),
    }
}

fn checked_length(size: usize, max_frame_bytes: usize) -> Result<u32> {
    if size > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_bytes,
        });
    }
    u32::try_from(size).map_err(|_| ProtocolError::FrameTooLarge {
        size,
        max: u32::MAX as usize,
    })
}

/// Codec for framing [`Message`] values over a byte stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Message>, Self::Error> {
        // Need at least the length prefix
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_bytes,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);
        decode_payload(&payload).map(Some)
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let payload = serde_json::to_vec(item)?;
        let length = checked_length(payload.len(), self.max_frame_bytes)?;

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(length);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Incremental frame buffer for a non-blocking reader.
///
/// Accepts arbitrary chunks and yields every complete frame in arrival order.
/// Partial prefix or payload bytes stay buffered across calls. Any decode
/// error is fatal: the buffer refuses further input and the stream must be
/// dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    codec: FrameCodec,
    buffer: BytesMut,
    failed: bool,
}

impl FrameBuffer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            codec: FrameCodec::new(max_frame_bytes),
            buffer: BytesMut::new(),
            failed: false,
        }
    }

    /// Add bytes and return any fully decoded messages.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        if self.failed {
            return Err(ProtocolError::Malformed(
                "frame stream already failed".into(),
            ));
        }
        self.buffer.extend_from_slice(data);
        self.drain()
    }

    /// Mutable access to the raw buffer, for `read_buf` style readers.
    /// Call [`FrameBuffer::drain`] afterwards.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Drain all complete frames currently buffered.
    pub fn drain(&mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => return Ok(messages),
                Err(e) => {
                    self.failed = true;
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Bytes of an incomplete frame still waiting for the rest.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Read exactly one frame from a stream.
///
/// Waits until the 4 prefix bytes and then exactly that many payload bytes
/// have arrived. A peer closing mid-frame is [`ProtocolError::ConnectionClosed`].
pub async fn read_message<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    read_exactly(reader, &mut len_buf).await?;
    let length = u32::from_be_bytes(len_buf) as usize;

    if length > max_frame_bytes {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; length];
    read_exactly(reader, &mut payload).await?;
    decode_payload(&payload)
}

/// Encode and write one frame, flushing the stream.
pub async fn write_message<W>(writer: &mut W, message: &Message, max_frame_bytes: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(message, max_frame_bytes)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exactly<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}
