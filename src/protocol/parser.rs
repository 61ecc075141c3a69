//! Incremental Frame Parser
//!
//! This module turns an arbitrarily chunked byte stream into complete milter frames.
//!
//! ## How the Parser Works
//!
//! The frame boundary is taken from the 4-byte big-endian length prefix and
//! nothing else. Parsing returns either:
//! - `Ok(Some((frame, consumed)))` - A complete frame, `consumed` bytes were used
//! - `Ok(None)` - The frame is incomplete, nothing was consumed
//! - `Err(ParseError)` - Invalid protocol data
//!
//! [`FrameBuffer`] wraps this in the usual loop:
//! 1. Append incoming network data with `feed()`
//! 2. Call `next_frame()` until it returns `Ok(None)`
//! 3. Wait for more data
//!
//! An incomplete frame is a wait condition, not an error. Partially received
//! data is kept for as long as the connection lives unless a maximum frame size
//! is configured.

use crate::protocol::types::{Frame, LENGTH_PREFIX_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while framing or decoding milter data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A length prefix of zero: there is no tag byte
    #[error("empty frame")]
    EmptyFrame,

    /// Declared frame length above the configured limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// A fixed-width field was cut short
    #[error("truncated '{command}' payload: need {needed} bytes, got {got}")]
    Truncated {
        command: char,
        needed: usize,
        got: usize,
    },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Parses one frame from the start of `buf` without consuming it.
pub(crate) fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    let total = match complete_frame_len(buf, None)? {
        Some(total) => total,
        None => return Ok(None),
    };

    let tag = buf[LENGTH_PREFIX_SIZE];
    let payload = Bytes::copy_from_slice(&buf[LENGTH_PREFIX_SIZE + 1..total]);
    Ok(Some((Frame { tag, payload }, total)))
}

/// Wire size of the frame at the start of `buf`, once all of it is buffered.
fn complete_frame_len(buf: &[u8], max: Option<u32>) -> ParseResult<Option<usize>> {
    let len = match declared_len(buf) {
        Some(len) => len,
        None => return Ok(None),
    };

    check_len(len, max)?;

    let total = frame_total(len)?;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

#[inline]
fn declared_len(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

fn check_len(len: u32, max: Option<u32>) -> ParseResult<()> {
    if len == 0 {
        return Err(ParseError::EmptyFrame);
    }
    match max {
        Some(max) if len > max => Err(ParseError::FrameTooLarge { size: len, max }),
        _ => Ok(()),
    }
}

/// Prefix plus declared length, rejected when it does not fit in `usize`.
fn frame_total(len: u32) -> ParseResult<usize> {
    usize::try_from(len)
        .ok()
        .and_then(|len| len.checked_add(LENGTH_PREFIX_SIZE))
        .ok_or_else(|| ParseError::FrameTooLarge {
            size: len,
            max: u32::try_from(usize::MAX - LENGTH_PREFIX_SIZE).unwrap_or(u32::MAX),
        })
}

/// Accumulates bytes for one connection and yields complete frames.
///
/// # Example
///
/// ```
/// use milterkit::protocol::FrameBuffer;
///
/// let mut buffer = FrameBuffer::new();
/// buffer.feed(b"\x00\x00\x00");
/// assert!(buffer.next_frame().unwrap().is_none());
///
/// buffer.feed(b"\x01N\x00\x00\x00\x01T");
/// assert_eq!(buffer.next_frame().unwrap().unwrap().tag, b'N');
/// assert_eq!(buffer.next_frame().unwrap().unwrap().tag, b'T');
/// assert!(buffer.next_frame().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received but not yet yielded as frames
    buffer: BytesMut,
    /// Optional ceiling on a single frame's declared length
    max_frame_size: Option<u32>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// Creates an unbounded frame buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_frame_size: None,
        }
    }

    /// Creates a frame buffer that rejects frames declaring more than `max` bytes.
    pub fn with_max_frame_size(max: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_frame_size: Some(max),
        }
    }

    /// Appends raw bytes from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next complete frame, if there is one.
    ///
    /// Returns `Ok(None)` without consuming anything when fewer than four bytes,
    /// or fewer than the declared length, are buffered.
    pub fn next_frame(&mut self) -> ParseResult<Option<Frame>> {
        let total = match complete_frame_len(&self.buffer, self.max_frame_size)? {
            Some(total) => total,
            None => return Ok(None),
        };

        let mut body = self.buffer.split_to(total).freeze();
        body.advance(LENGTH_PREFIX_SIZE);
        let tag = body.get_u8();
        Ok(Some(Frame { tag, payload: body }))
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Direct access for socket reads that fill the buffer in place.
    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}
