use crate::{FrameError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Magic constant opening every frame header
pub const MAGIC: u16 = 0xCAFE;

/// The only protocol version this client speaks
pub const VERSION: u8 = 0x01;

/// magic(2) + version(1) + reserved(1) + type(1) + length(4)
pub const HEADER_SIZE: usize = 9;

/// Default capacity of the receive region (8KB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Message types carried in the header's type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    LoginRequest = 0x01,
    LoginResponse = 0x02,
    ChatMessage = 0x03,
    UserJoin = 0x04,
    UserLeave = 0x05,
    UserList = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    ErrorNotice = 0x09,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::LoginRequest => "login_request",
            MessageKind::LoginResponse => "login_response",
            MessageKind::ChatMessage => "chat_message",
            MessageKind::UserJoin => "user_join",
            MessageKind::UserLeave => "user_leave",
            MessageKind::UserList => "user_list",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::ErrorNotice => "error",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, u8> {
        let kind = match code {
            0x01 => MessageKind::LoginRequest,
            0x02 => MessageKind::LoginResponse,
            0x03 => MessageKind::ChatMessage,
            0x04 => MessageKind::UserJoin,
            0x05 => MessageKind::UserLeave,
            0x06 => MessageKind::UserList,
            0x07 => MessageKind::Ping,
            0x08 => MessageKind::Pong,
            0x09 => MessageKind::ErrorNotice,
            other => return Err(other),
        };
        Ok(kind)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single decoded protocol unit.
///
/// The raw type byte is kept as received so that codes this client does
/// not know still reach the dispatcher instead of failing the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: u8,
    payload: Bytes,
}

impl Frame {
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            code: kind.code(),
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::try_from(self.code).ok()
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text; invalid UTF-8 sequences are replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Header plus payload
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Outcome of one decode attempt at a given offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole frame was available; `consumed` is header + payload length
    Complete { frame: Frame, consumed: usize },
    /// Wait for more bytes, then retry from the same offset
    Incomplete,
    /// The stream is corrupted from this offset on
    Invalid(FrameError),
}

/// Encodes and decodes the 9-byte header + payload layout.
///
/// `max_frame_size` bounds a whole frame (header included) and is the
/// capacity of whatever region the frame has to fit in.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Largest payload a frame may carry
    pub fn max_payload(&self) -> usize {
        self.max_frame_size
            .saturating_sub(HEADER_SIZE)
            .min(u32::MAX as usize)
    }

    /// Appends one encoded frame to `dst`.
    ///
    /// ```text
    /// offset 0: u16 magic   0xCAFE
    /// offset 2: u8  version 0x01
    /// offset 3: u8  reserved (0)
    /// offset 4: u8  type
    /// offset 5: u32 payload length
    /// offset 9: payload
    /// ```
    pub fn encode(
        &self,
        kind: MessageKind,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> std::result::Result<(), FrameError> {
        let max = self.max_payload();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u16(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(0);
        dst.put_u8(kind.code());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);

        Ok(())
    }

    /// Attempts to decode one frame starting at `offset` in `src`
    pub fn decode(&self, src: &[u8], offset: usize) -> Decoded {
        let src = src.get(offset..).unwrap_or(&[]);

        if src.len() < HEADER_SIZE {
            return Decoded::Incomplete;
        }

        let magic = u16::from_be_bytes([src[0], src[1]]);
        if magic != MAGIC {
            warn!("Invalid magic number: 0x{:04X}", magic);
            return Decoded::Invalid(FrameError::InvalidMagic(magic));
        }

        let version = src[2];
        if version != VERSION {
            warn!("Unsupported version: {}", version);
            return Decoded::Invalid(FrameError::UnsupportedVersion(version));
        }

        // src[3] is reserved and ignored on decode
        let code = src[4];
        let length = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;

        let max = self.max_payload();
        if length > max {
            warn!("Received oversized frame: {} bytes (max: {})", length, max);
            return Decoded::Invalid(FrameError::PayloadTooLarge { size: length, max });
        }

        let consumed = HEADER_SIZE + length;
        if src.len() < consumed {
            return Decoded::Incomplete;
        }

        let frame = Frame {
            code,
            payload: Bytes::copy_from_slice(&src[HEADER_SIZE..consumed]),
        };
        debug!("Decoded frame type 0x{:02X}, {} payload bytes", code, length);

        Decoded::Complete { frame, consumed }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Encodes a frame and writes it to an async writer
pub async fn write_frame<W>(
    writer: &mut W,
    codec: &FrameCodec,
    kind: MessageKind,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    codec.encode(kind, payload, &mut buf)?;

    debug!("Writing frame of {} bytes, type: {}", payload.len(), kind);

    writer.write_all(&buf).await?;

    // Flush to ensure data is sent
    writer.flush().await?;

    Ok(())
}
