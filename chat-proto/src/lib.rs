pub mod frame;
pub mod payload;
pub mod reassembly;

pub use frame::*;
pub use payload::*;
pub use reassembly::*;

/// Structural faults found while decoding a frame header.
///
/// Any of these means the stream is desynchronized; the caller must
/// discard everything it has buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid magic number: 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Frame too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Buffer overflow: {occupied} buffered + {incoming} incoming exceeds {capacity} bytes")]
    BufferOverflow {
        occupied: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("Malformed payload: missing field '{0}'")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
