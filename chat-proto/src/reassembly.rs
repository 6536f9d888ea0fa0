use crate::frame::{Decoded, Frame, FrameCodec, DEFAULT_BUFFER_CAPACITY};
use crate::{ProtocolError, Result};
use bytes::{Buf, BytesMut};
use std::iter::FusedIterator;
use tracing::{debug, warn};

/// Accumulates bytes from a boundary-less stream and extracts whole frames.
///
/// The occupied region only ever holds the incomplete prefix of the next
/// frame (plus, transiently, complete frames not yet pulled from a
/// [`Frames`] iterator). Capacity is fixed; a frame can never be larger
/// than the buffer itself, so the codec rejects any header declaring more.
///
/// Mutation is in place. Sharing one buffer between tasks needs an
/// external lock.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    buf: BytesMut,
    capacity: usize,
    codec: FrameCodec,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            codec: FrameCodec::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// How many more bytes can be ingested before overflowing
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Discards everything buffered
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Appends newly arrived bytes and returns the frames they complete.
    ///
    /// Fails with [`ProtocolError::BufferOverflow`] (after resetting the
    /// buffer) when the bytes do not fit. The returned iterator removes each
    /// frame from the buffer as it yields it; stopping early leaves the rest
    /// for the next call. A corrupted header yields one error, empties the
    /// buffer and ends the iteration.
    pub fn ingest(&mut self, data: &[u8]) -> Result<Frames<'_>> {
        let occupied = self.buf.len();
        if occupied + data.len() > self.capacity {
            warn!(
                "Buffer overflow ({} buffered + {} incoming > {}), clearing buffer",
                occupied,
                data.len(),
                self.capacity
            );
            self.reset();
            return Err(ProtocolError::BufferOverflow {
                occupied,
                incoming: data.len(),
                capacity: self.capacity,
            });
        }

        self.buf.extend_from_slice(data);
        debug!("Ingested {} bytes ({} buffered)", data.len(), self.buf.len());

        Ok(Frames {
            buffer: self,
            done: false,
        })
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames completed by one [`ReassemblyBuffer::ingest`] call, in arrival order
#[derive(Debug)]
pub struct Frames<'a> {
    buffer: &'a mut ReassemblyBuffer,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let buffer = &mut *self.buffer;
        match buffer.codec.decode(&buffer.buf, 0) {
            Decoded::Complete { frame, consumed } => {
                buffer.buf.advance(consumed);
                Some(Ok(frame))
            }
            Decoded::Incomplete => {
                self.done = true;
                None
            }
            Decoded::Invalid(err) => {
                warn!("Discarding {} buffered bytes: {}", buffer.buf.len(), err);
                buffer.reset();
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

impl FusedIterator for Frames<'_> {}
