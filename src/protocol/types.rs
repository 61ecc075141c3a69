//! Milter Wire Types
//!
//! This module defines the constants and values exchanged on a milter connection.
//! Every message, in both directions, is a length-prefixed frame:
//!
//! ```text
//! ┌────────────────────┬──────────┬──────────────────────────┐
//! │ length (u32, BE)   │ tag (u8) │ payload (length-1 bytes) │
//! └────────────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! The length counts the tag byte plus the payload, never itself.
//!
//! ## Examples
//!
//! Continue: `\x00\x00\x00\x01c`
//! Replace body with "X": `\x00\x00\x00\x03bX\x00`
//! Delete recipient: `\x00\x00\x00\x0a-<a@b.cd>\x00`

use bytes::{BufMut, Bytes};
use std::fmt;

/// Protocol version this implementation speaks
pub const PROTOCOL_VERSION: u32 = 6;

/// Size of the length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a frame can carry (the length prefix also counts the tag)
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize - 1;

/// A payload that does not fit behind a 32-bit length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("payload of {0} bytes does not fit in a frame")]
pub struct PayloadTooLarge(pub usize);

/// Command tags sent by the MTA
pub mod command {
    pub const ABORT: u8 = b'A';
    pub const BODY: u8 = b'B';
    pub const CONNECT: u8 = b'C';
    pub const MACRO: u8 = b'D';
    pub const BODY_EOB: u8 = b'E';
    pub const HELO: u8 = b'H';
    pub const QUIT_NC: u8 = b'K';
    pub const HEADER: u8 = b'L';
    pub const MAIL: u8 = b'M';
    pub const EOH: u8 = b'N';
    pub const OPTNEG: u8 = b'O';
    pub const QUIT: u8 = b'Q';
    pub const RCPT: u8 = b'R';
    pub const DATA: u8 = b'T';
    pub const UNKNOWN: u8 = b'U';
}

/// Response codes sent back to the MTA
pub mod response {
    pub const ADD_RCPT: u8 = b'+';
    pub const DEL_RCPT: u8 = b'-';
    pub const ADD_RCPT_PAR: u8 = b'2';
    pub const SHUTDOWN: u8 = b'4';
    pub const ACCEPT: u8 = b'a';
    pub const REPL_BODY: u8 = b'b';
    pub const CONTINUE: u8 = b'c';
    pub const DISCARD: u8 = b'd';
    pub const CHG_FROM: u8 = b'e';
    pub const CONN_FAIL: u8 = b'f';
    pub const ADD_HEADER: u8 = b'h';
    pub const INS_HEADER: u8 = b'i';
    pub const SET_SYMLIST: u8 = b'l';
    pub const CHG_HEADER: u8 = b'm';
    pub const PROGRESS: u8 = b'p';
    pub const QUARANTINE: u8 = b'q';
    pub const REJECT: u8 = b'r';
    pub const SKIP: u8 = b's';
    pub const TEMPFAIL: u8 = b't';
    pub const REPLY_CODE: u8 = b'y';
    pub const OPTNEG: u8 = b'O';
}

/// Protocol flags: which commands the MTA may skip, and which it expects no reply for
pub mod protocol_flags {
    pub const NO_CONNECT: u32 = 0x00_0001;
    pub const NO_HELO: u32 = 0x00_0002;
    pub const NO_MAIL: u32 = 0x00_0004;
    pub const NO_RCPT: u32 = 0x00_0008;
    pub const NO_BODY: u32 = 0x00_0010;
    pub const NO_HDRS: u32 = 0x00_0020;
    pub const NO_EOH: u32 = 0x00_0040;
    pub const NR_HDR: u32 = 0x00_0080;
    pub const NO_UNKNOWN: u32 = 0x00_0100;
    pub const NO_DATA: u32 = 0x00_0200;
    pub const SKIP: u32 = 0x00_0400;
    pub const RCPT_REJ: u32 = 0x00_0800;
    pub const NR_CONN: u32 = 0x00_1000;
    pub const NR_HELO: u32 = 0x00_2000;
    pub const NR_MAIL: u32 = 0x00_4000;
    pub const NR_RCPT: u32 = 0x00_8000;
    pub const NR_DATA: u32 = 0x01_0000;
    pub const NR_UNKN: u32 = 0x02_0000;
    pub const NR_EOH: u32 = 0x04_0000;
    pub const NR_BODY: u32 = 0x08_0000;
    pub const HDR_LEADSPC: u32 = 0x10_0000;
}

/// Action flags: which modifications the filter may request
pub mod action_flags {
    pub const NONE: u32 = 0x000;
    pub const ADD_HDRS: u32 = 0x001;
    pub const CHG_BODY: u32 = 0x002;
    pub const ADD_RCPT: u32 = 0x004;
    pub const DEL_RCPT: u32 = 0x008;
    pub const CHG_HDRS: u32 = 0x010;
    pub const QUARANTINE: u32 = 0x020;
    pub const CHG_FROM: u32 = 0x040;
    pub const ADD_RCPT_PAR: u32 = 0x080;
    pub const SET_SYMLIST: u32 = 0x100;
    /// Every action known to protocol version 6
    pub const CURRENT: u32 = 0x1FF;
}

/// A raw frame: one tag byte plus its payload.
///
/// Frames are what the [`FrameBuffer`](super::FrameBuffer) yields and what
/// every [`Response`] serializes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The command or response tag
    pub tag: u8,
    /// Everything after the tag
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Value of the length prefix for this frame
    pub fn wire_len(&self) -> Result<u32, PayloadTooLarge> {
        frame_len(self.payload.len())
    }

    /// Serializes the frame, length prefix included.
    pub fn serialize(&self) -> Result<Vec<u8>, PayloadTooLarge> {
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + 1 + self.payload.len());
        self.serialize_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the frame to `buf`. Nothing is written on error.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), PayloadTooLarge> {
        let len = self.wire_len()?;
        buf.put_u32(len);
        buf.push(self.tag);
        buf.extend_from_slice(&self.payload);
        Ok(())
    }
}

fn frame_len(payload_len: usize) -> Result<u32, PayloadTooLarge> {
    payload_len
        .checked_add(1)
        .and_then(|len| u32::try_from(len).ok())
        .ok_or(PayloadTooLarge(payload_len))
}

/// A response to the MTA.
///
/// Each variant maps to one response code; variants with data carry the
/// fields needed to build the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Proceed to the next stage
    Continue,
    /// Accept the message, skip the remaining stages
    Accept,
    /// Reject the command or message
    Reject,
    /// Accept but silently drop the message
    Discard,
    /// Temporary failure
    TempFail,
    /// Skip the remaining body chunks
    Skip,
    /// Ask the MTA to keep waiting
    Progress,
    /// 421 shutdown
    Shutdown,
    /// Fail the SMTP connection
    ConnFail,

    /// Add an envelope recipient; the address must already be in angle brackets
    AddRcpt(Bytes),
    /// Add an envelope recipient with ESMTP arguments
    AddRcptPar { rcpt: Bytes, args: Bytes },
    /// Remove an envelope recipient; the address must already be in angle brackets
    DeleteRcpt(Bytes),
    /// Replace the message body (one chunk)
    ReplaceBody(Bytes),
    /// Change the `index`th occurrence (1-based) of a header; an empty value deletes it
    ChangeHeader { index: u32, name: Bytes, value: Bytes },
    /// Append a header
    AddHeader { name: Bytes, value: Bytes },
    /// Insert a header at position `index`
    InsertHeader { index: u32, name: Bytes, value: Bytes },
    /// Change the envelope sender
    ChangeFrom { sender: Bytes, args: Option<Bytes> },
    /// Put the message in quarantine with a reason
    Quarantine(Bytes),
    /// Custom SMTP reply, e.g. `550 5.7.1 Go away`
    ReplyCode(Bytes),
    /// Request the macros the MTA should send at one protocol stage
    SetSymList { stage: u32, macros: Bytes },
    /// Option negotiation answer
    OptNeg {
        version: u32,
        actions: u32,
        protocol: u32,
    },
    /// Any code/payload pair not covered above
    Raw { code: u8, payload: Bytes },
}

impl Response {
    /// Removes a recipient. `email` must be enclosed in `<>`.
    pub fn delete_rcpt(email: impl Into<Bytes>) -> Self {
        Response::DeleteRcpt(email.into())
    }

    /// Adds a recipient. `email` must be enclosed in `<>`.
    pub fn add_rcpt(email: impl Into<Bytes>) -> Self {
        Response::AddRcpt(email.into())
    }

    /// Changes a header. `index` counts occurrences of the same name, starting at 1.
    ///
    /// # Example
    /// ```
    /// use milterkit::protocol::Response;
    /// let r = Response::change_header("Subject", "[SPAM] hello", 1);
    /// assert_eq!(r.code(), b'm');
    /// ```
    pub fn change_header(name: impl Into<Bytes>, value: impl Into<Bytes>, index: u32) -> Self {
        Response::ChangeHeader {
            index,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn add_header(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Response::AddHeader {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn insert_header(index: u32, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Response::InsertHeader {
            index,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Replaces the body.
    ///
    /// # Example
    /// ```
    /// use milterkit::protocol::Response;
    /// let r = Response::replace_body("X");
    /// assert_eq!(r.serialize().unwrap(), b"\x00\x00\x00\x03bX\x00");
    /// ```
    pub fn replace_body(body: impl Into<Bytes>) -> Self {
        Response::ReplaceBody(body.into())
    }

    pub fn change_from(sender: impl Into<Bytes>) -> Self {
        Response::ChangeFrom {
            sender: sender.into(),
            args: None,
        }
    }

    pub fn quarantine(reason: impl Into<Bytes>) -> Self {
        Response::Quarantine(reason.into())
    }

    pub fn reply_code(text: impl Into<Bytes>) -> Self {
        Response::ReplyCode(text.into())
    }

    pub fn opt_neg(version: u32, actions: u32, protocol: u32) -> Self {
        Response::OptNeg {
            version,
            actions,
            protocol,
        }
    }

    /// The one-byte response code
    pub fn code(&self) -> u8 {
        match self {
            Response::Continue => response::CONTINUE,
            Response::Accept => response::ACCEPT,
            Response::Reject => response::REJECT,
            Response::Discard => response::DISCARD,
            Response::TempFail => response::TEMPFAIL,
            Response::Skip => response::SKIP,
            Response::Progress => response::PROGRESS,
            Response::Shutdown => response::SHUTDOWN,
            Response::ConnFail => response::CONN_FAIL,
            Response::AddRcpt(_) => response::ADD_RCPT,
            Response::AddRcptPar { .. } => response::ADD_RCPT_PAR,
            Response::DeleteRcpt(_) => response::DEL_RCPT,
            Response::ReplaceBody(_) => response::REPL_BODY,
            Response::ChangeHeader { .. } => response::CHG_HEADER,
            Response::AddHeader { .. } => response::ADD_HEADER,
            Response::InsertHeader { .. } => response::INS_HEADER,
            Response::ChangeFrom { .. } => response::CHG_FROM,
            Response::Quarantine(_) => response::QUARANTINE,
            Response::ReplyCode(_) => response::REPLY_CODE,
            Response::SetSymList { .. } => response::SET_SYMLIST,
            Response::OptNeg { .. } => response::OPTNEG,
            Response::Raw { code, .. } => *code,
        }
    }

    /// Builds the payload that follows the code byte.
    pub fn payload(&self) -> Bytes {
        let mut buf = Vec::new();
        match self {
            Response::Continue
            | Response::Accept
            | Response::Reject
            | Response::Discard
            | Response::TempFail
            | Response::Skip
            | Response::Progress
            | Response::Shutdown
            | Response::ConnFail => {}
            Response::AddRcpt(data)
            | Response::DeleteRcpt(data)
            | Response::ReplaceBody(data)
            | Response::Quarantine(data)
            | Response::ReplyCode(data) => {
                buf.extend_from_slice(data);
                buf.push(0);
            }
            Response::AddRcptPar { rcpt, args } => {
                put_cstr(&mut buf, rcpt);
                put_cstr(&mut buf, args);
            }
            Response::ChangeHeader { index, name, value }
            | Response::InsertHeader { index, name, value } => {
                buf.put_u32(*index);
                put_cstr(&mut buf, name);
                put_cstr(&mut buf, value);
            }
            Response::AddHeader { name, value } => {
                put_cstr(&mut buf, name);
                put_cstr(&mut buf, value);
            }
            Response::ChangeFrom { sender, args } => {
                put_cstr(&mut buf, sender);
                if let Some(args) = args {
                    put_cstr(&mut buf, args);
                }
            }
            Response::SetSymList { stage, macros } => {
                buf.put_u32(*stage);
                put_cstr(&mut buf, macros);
            }
            Response::OptNeg {
                version,
                actions,
                protocol,
            } => {
                buf.put_u32(*version);
                buf.put_u32(*actions);
                buf.put_u32(*protocol);
            }
            Response::Raw { payload, .. } => return payload.clone(),
        }
        Bytes::from(buf)
    }

    /// Converts the response into a generic frame.
    pub fn to_frame(&self) -> Frame {
        Frame::new(self.code(), self.payload())
    }

    /// Serializes the response for sending over the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, PayloadTooLarge> {
        self.to_frame().serialize()
    }

    /// Serializes the response into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), PayloadTooLarge> {
        self.to_frame().serialize_into(buf)
    }
}

fn put_cstr(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(data);
    buf.push(0);
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Continue => write!(f, "continue"),
            Response::Accept => write!(f, "accept"),
            Response::Reject => write!(f, "reject"),
            Response::Discard => write!(f, "discard"),
            Response::TempFail => write!(f, "tempfail"),
            Response::Skip => write!(f, "skip"),
            Response::OptNeg {
                version,
                actions,
                protocol,
            } => write!(
                f,
                "optneg (version {}, actions {:#x}, protocol {:#x})",
                version, actions, protocol
            ),
            other => write!(
                f,
                "'{}' ({} payload bytes)",
                other.code() as char,
                other.payload().len()
            ),
        }
    }
}
