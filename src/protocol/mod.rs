//! Milter Protocol Implementation
//!
//! This module implements the wire side of the milter protocol: framing,
//! command decoding and response encoding.
//!
//! ## Overview
//!
//! An MTA talks to a filter over a stream socket. Every message is a frame made
//! of a 4-byte big-endian length, a one-byte tag and a payload. The MTA sends
//! commands (connect, HELO, MAIL FROM, headers, body chunks, ...) and the filter
//! answers each with one or more responses (continue, reject, replace body, ...).
//!
//! ## Modules
//!
//! - `types`: Tags, flags, `Frame` and the `Response` encoder
//! - `parser`: Incremental framing over a byte stream
//! - `command`: Typed decoding of command payloads
//!
//! ## Example
//!
//! ```
//! use milterkit::protocol::{Command, FrameBuffer, Response};
//!
//! let mut buffer = FrameBuffer::new();
//! buffer.feed(b"\x00\x00\x00\x0bHmx.example");
//!
//! let frame = buffer.next_frame().unwrap().unwrap();
//! assert_eq!(Command::decode(&frame).unwrap(), Command::Helo("mx.example".into()));
//!
//! let bytes = Response::Continue.serialize().unwrap();
//! assert_eq!(bytes, b"\x00\x00\x00\x01c");
//! ```

pub mod command;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use command::{Command, CommandKind, MacroMap};
pub use parser::{FrameBuffer, ParseError, ParseResult};
pub use types::{
    action_flags, protocol_flags, Frame, PayloadTooLarge, Response, PROTOCOL_VERSION,
};
