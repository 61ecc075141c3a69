//! Command Decoding
//!
//! Every frame from the MTA carries a one-byte command tag. This module maps the
//! tag to a [`CommandKind`] and decodes the payload into a typed [`Command`].
//!
//! ## Payload Layouts
//!
//! ```text
//! A  Abort            (empty)
//! B  Body chunk       raw bytes
//! C  Connect          host\0 family(1) port(2, BE) address
//! D  Macro            stage(1) name\0 value\0 ...
//! E  End of body      raw bytes
//! H  HELO/EHLO        text
//! K  Quit, new conn   (empty)
//! L  Header           name\0 value\0
//! M  MAIL FROM        addr\0 arg\0 ...
//! N  End of headers   (empty)
//! O  Option neg.      version(4) actions(4) protocol(4)
//! Q  Quit             (empty)
//! R  RCPT TO          addr\0 arg\0 ...
//! T  DATA             (empty)
//! U  Unknown command  text
//! ```
//!
//! String fields never rely on a trailing NUL being present. Missing separators
//! end the field at the end of the payload; only truncated fixed-width fields
//! are reported as errors.

use crate::protocol::parser::{ParseError, ParseResult};
use crate::protocol::types::{command, Frame};
use bytes::{Buf, Bytes};
use std::collections::BTreeMap;
use std::fmt;

/// Macro name/value pairs sent with a `D` command
pub type MacroMap = BTreeMap<String, String>;

/// The kinds of command the MTA can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Abort,
    Body,
    Connect,
    Macro,
    BodyEob,
    Helo,
    QuitNewConnection,
    Header,
    Mail,
    EndOfHeaders,
    OptNeg,
    Quit,
    Rcpt,
    Data,
    Unknown,
}

impl CommandKind {
    /// All kinds, in tag order
    pub const ALL: [CommandKind; 15] = [
        CommandKind::Abort,
        CommandKind::Body,
        CommandKind::Connect,
        CommandKind::Macro,
        CommandKind::BodyEob,
        CommandKind::Helo,
        CommandKind::QuitNewConnection,
        CommandKind::Header,
        CommandKind::Mail,
        CommandKind::EndOfHeaders,
        CommandKind::OptNeg,
        CommandKind::Quit,
        CommandKind::Rcpt,
        CommandKind::Data,
        CommandKind::Unknown,
    ];

    /// Looks up the kind for a tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            command::ABORT => CommandKind::Abort,
            command::BODY => CommandKind::Body,
            command::CONNECT => CommandKind::Connect,
            command::MACRO => CommandKind::Macro,
            command::BODY_EOB => CommandKind::BodyEob,
            command::HELO => CommandKind::Helo,
            command::QUIT_NC => CommandKind::QuitNewConnection,
            command::HEADER => CommandKind::Header,
            command::MAIL => CommandKind::Mail,
            command::EOH => CommandKind::EndOfHeaders,
            command::OPTNEG => CommandKind::OptNeg,
            command::QUIT => CommandKind::Quit,
            command::RCPT => CommandKind::Rcpt,
            command::DATA => CommandKind::Data,
            command::UNKNOWN => CommandKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    pub fn tag(&self) -> u8 {
        match self {
            CommandKind::Abort => command::ABORT,
            CommandKind::Body => command::BODY,
            CommandKind::Connect => command::CONNECT,
            CommandKind::Macro => command::MACRO,
            CommandKind::BodyEob => command::BODY_EOB,
            CommandKind::Helo => command::HELO,
            CommandKind::QuitNewConnection => command::QUIT_NC,
            CommandKind::Header => command::HEADER,
            CommandKind::Mail => command::MAIL,
            CommandKind::EndOfHeaders => command::EOH,
            CommandKind::OptNeg => command::OPTNEG,
            CommandKind::Quit => command::QUIT,
            CommandKind::Rcpt => command::RCPT,
            CommandKind::Data => command::DATA,
            CommandKind::Unknown => command::UNKNOWN,
        }
    }

    /// Callback name, used in logs
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Abort => "abort",
            CommandKind::Body => "body",
            CommandKind::Connect => "connect",
            CommandKind::Macro => "macro",
            CommandKind::BodyEob => "end_body",
            CommandKind::Helo => "helo",
            CommandKind::QuitNewConnection => "quit_new_connection",
            CommandKind::Header => "header",
            CommandKind::Mail => "mail_from",
            CommandKind::EndOfHeaders => "end_headers",
            CommandKind::OptNeg => "opt_neg",
            CommandKind::Quit => "quit",
            CommandKind::Rcpt => "rcpt_to",
            CommandKind::Data => "data",
            CommandKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ('{}')", self.name(), self.tag() as char)
    }
}

/// A decoded command from the MTA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Abort,
    /// Body chunk with NUL bytes removed
    Body(Bytes),
    Connect {
        hostname: String,
        family: u8,
        port: u16,
        address: String,
    },
    Macro {
        /// Tag of the command these macros belong to
        stage: u8,
        macros: MacroMap,
    },
    /// Final body chunk, as sent
    BodyEob(Bytes),
    Helo(String),
    QuitNewConnection,
    Header {
        name: String,
        value: String,
    },
    Mail {
        sender: String,
        args: Vec<String>,
    },
    EndOfHeaders,
    OptNeg {
        version: u32,
        actions: u32,
        protocol: u32,
    },
    Quit,
    Rcpt {
        recipient: String,
        args: Vec<String>,
    },
    Data,
    /// An SMTP command the MTA did not recognize
    Unknown(String),
    /// A tag outside the command table
    Unrecognized(u8),
}

impl Command {
    /// Decodes a frame into a command.
    ///
    /// # Example
    ///
    /// ```
    /// use milterkit::protocol::{Command, Frame};
    ///
    /// let frame = Frame::new(b'L', &b"Subject\0hello\0"[..]);
    /// let command = Command::decode(&frame).unwrap();
    /// assert_eq!(
    ///     command,
    ///     Command::Header { name: "Subject".into(), value: "hello".into() }
    /// );
    /// ```
    pub fn decode(frame: &Frame) -> ParseResult<Command> {
        let kind = match CommandKind::from_tag(frame.tag) {
            Some(kind) => kind,
            None => return Ok(Command::Unrecognized(frame.tag)),
        };
        let data = &frame.payload;

        let command = match kind {
            CommandKind::Abort => Command::Abort,
            CommandKind::Body => Command::Body(strip_nul(data)),
            CommandKind::Connect => decode_connect(data)?,
            CommandKind::Macro => decode_macro(data)?,
            CommandKind::BodyEob => Command::BodyEob(data.clone()),
            CommandKind::Helo => Command::Helo(text(trim_nul(data))),
            CommandKind::QuitNewConnection => Command::QuitNewConnection,
            CommandKind::Header => {
                let (name, value) = split_field(data);
                Command::Header {
                    name: text(name),
                    value: text(&strip_nul(&data.slice_ref(value))),
                }
            }
            CommandKind::Mail => {
                let (sender, args) = decode_address(data);
                Command::Mail { sender, args }
            }
            CommandKind::EndOfHeaders => Command::EndOfHeaders,
            CommandKind::OptNeg => decode_opt_neg(data)?,
            CommandKind::Quit => Command::Quit,
            CommandKind::Rcpt => {
                let (recipient, args) = decode_address(data);
                Command::Rcpt { recipient, args }
            }
            CommandKind::Data => Command::Data,
            CommandKind::Unknown => Command::Unknown(text(trim_nul(data))),
        };

        Ok(command)
    }

    /// The kind of this command, `None` for unrecognized tags.
    pub fn kind(&self) -> Option<CommandKind> {
        let kind = match self {
            Command::Abort => CommandKind::Abort,
            Command::Body(_) => CommandKind::Body,
            Command::Connect { .. } => CommandKind::Connect,
            Command::Macro { .. } => CommandKind::Macro,
            Command::BodyEob(_) => CommandKind::BodyEob,
            Command::Helo(_) => CommandKind::Helo,
            Command::QuitNewConnection => CommandKind::QuitNewConnection,
            Command::Header { .. } => CommandKind::Header,
            Command::Mail { .. } => CommandKind::Mail,
            Command::EndOfHeaders => CommandKind::EndOfHeaders,
            Command::OptNeg { .. } => CommandKind::OptNeg,
            Command::Quit => CommandKind::Quit,
            Command::Rcpt { .. } => CommandKind::Rcpt,
            Command::Data => CommandKind::Data,
            Command::Unknown(_) => CommandKind::Unknown,
            Command::Unrecognized(_) => return None,
        };
        Some(kind)
    }
}

/// `host\0 family port address`
fn decode_connect(data: &Bytes) -> ParseResult<Command> {
    let (host, rest) = split_field(data);
    let mut rest = rest;

    if rest.is_empty() {
        return Err(truncated(command::CONNECT, data.len() + 1, data.len()));
    }
    let family = rest.get_u8();

    // Family 'U' (unknown) carries no port or address
    let (port, address) = if rest.len() >= 2 {
        let port = rest.get_u16();
        (port, text(trim_nul(rest)))
    } else {
        (0, String::new())
    };

    Ok(Command::Connect {
        hostname: text(host),
        family,
        port,
        address,
    })
}

/// `stage name\0 value\0 ...`
fn decode_macro(data: &Bytes) -> ParseResult<Command> {
    let (stage, rest) = match data.split_first() {
        Some((stage, rest)) => (*stage, rest),
        None => return Err(truncated(command::MACRO, 1, 0)),
    };

    let fields = split_fields(rest);
    let mut macros = MacroMap::new();
    for pair in fields.chunks(2) {
        let name = text(pair[0]);
        let value = pair.get(1).map(|v| text(v)).unwrap_or_default();
        macros.insert(name, value);
    }

    Ok(Command::Macro { stage, macros })
}

/// Three big-endian u32s
fn decode_opt_neg(data: &Bytes) -> ParseResult<Command> {
    if data.len() < 12 {
        return Err(truncated(command::OPTNEG, 12, data.len()));
    }
    let mut buf = &data[..12];
    Ok(Command::OptNeg {
        version: buf.get_u32(),
        actions: buf.get_u32(),
        protocol: buf.get_u32(),
    })
}

/// `addr\0 arg\0 arg\0 ...`
fn decode_address(data: &[u8]) -> (String, Vec<String>) {
    let (addr, rest) = split_field(data);
    let args = split_fields(rest).into_iter().map(text).collect();
    (text(addr), args)
}

fn truncated(tag: u8, needed: usize, got: usize) -> ParseError {
    ParseError::Truncated {
        command: tag as char,
        needed,
        got,
    }
}

/// Splits at the first NUL. Without one, the whole input is the field.
fn split_field(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&b| b == 0) {
        Some(pos) => (&data[..pos], &data[pos + 1..]),
        None => (data, &[]),
    }
}

/// Splits on every NUL, dropping empty trailing fields.
fn split_fields(data: &[u8]) -> Vec<&[u8]> {
    let mut fields: Vec<&[u8]> = data.split(|&b| b == 0).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// Drops a single trailing NUL terminator if present.
fn trim_nul(data: &[u8]) -> &[u8] {
    data.strip_suffix(&[0]).unwrap_or(data)
}

/// Removes every NUL byte. Without any, the buffer is shared, not copied.
fn strip_nul(data: &Bytes) -> Bytes {
    if !data.contains(&0) {
        return data.clone();
    }
    data.iter().copied().filter(|&b| b != 0).collect()
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(tag: u8, payload: &[u8]) -> Command {
        Command::decode(&Frame::new(tag, Bytes::copy_from_slice(payload))).unwrap()
    }

    #[test]
    fn test_tag_table_roundtrip() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CommandKind::from_tag(b'Z'), None);
    }

    #[test]
    fn test_decode_connect() {
        let command = decode(b'C', b"mail.example.com\0\x02\x00\x1910.0.0.1\0");
        assert_eq!(
            command,
            Command::Connect {
                hostname: "mail.example.com".to_string(),
                family: 2,
                port: 25,
                address: "10.0.0.1".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_connect_without_trailing_nul() {
        let command = decode(b'C', b"mail.example.com\0\x02\x00\x1910.0.0.1");
        assert!(matches!(command, Command::Connect { ref address, port: 25, .. } if address == "10.0.0.1"));
    }

    #[test]
    fn test_decode_connect_unknown_family() {
        let command = decode(b'C', b"localhost\0U");
        assert_eq!(
            command,
            Command::Connect {
                hostname: "localhost".to_string(),
                family: b'U',
                port: 0,
                address: String::new(),
            }
        );
    }

    #[test]
    fn test_decode_connect_truncated() {
        let result = Command::decode(&Frame::new(b'C', &b"localhost"[..]));
        assert!(matches!(result, Err(ParseError::Truncated { command: 'C', .. })));
    }

    #[test]
    fn test_decode_macro() {
        let command = decode(b'D', b"Cj\0mx.example.com\0{daemon_name}\0smtpd\0");
        let mut macros = MacroMap::new();
        macros.insert("j".to_string(), "mx.example.com".to_string());
        macros.insert("{daemon_name}".to_string(), "smtpd".to_string());
        assert_eq!(command, Command::Macro { stage: b'C', macros });
    }

    #[test]
    fn test_decode_macro_odd_fields() {
        let command = decode(b'D', b"Mi\0");
        match command {
            Command::Macro { stage, macros } => {
                assert_eq!(stage, b'M');
                assert_eq!(macros.get("i").map(String::as_str), Some(""));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_macro_empty() {
        let result = Command::decode(&Frame::new(b'D', Bytes::new()));
        assert!(matches!(result, Err(ParseError::Truncated { command: 'D', .. })));
    }

    #[test]
    fn test_decode_body_strips_nul() {
        assert_eq!(
            decode(b'B', b"hel\0lo\0"),
            Command::Body(Bytes::from("hello"))
        );
    }

    #[test]
    fn test_decode_body_without_nul_shares_buffer() {
        let frame = Frame::new(b'B', Bytes::from("plain body chunk"));
        match Command::decode(&frame).unwrap() {
            Command::Body(chunk) => {
                assert_eq!(chunk, frame.payload);
                assert_eq!(chunk.as_ptr(), frame.payload.as_ptr());
            }
            other => panic!("expected body, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_body_eob_raw() {
        assert_eq!(
            decode(b'E', b"tail\0"),
            Command::BodyEob(Bytes::from(&b"tail\0"[..]))
        );
    }

    #[test]
    fn test_decode_header() {
        assert_eq!(
            decode(b'L', b"From\0Ariz <a@b.cd>\0"),
            Command::Header {
                name: "From".to_string(),
                value: "Ariz <a@b.cd>".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_header_value_nul_stripped() {
        assert_eq!(
            decode(b'L', b"X-Odd\0a\0b"),
            Command::Header {
                name: "X-Odd".to_string(),
                value: "ab".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_header_without_separator() {
        assert_eq!(
            decode(b'L', b"Broken"),
            Command::Header {
                name: "Broken".to_string(),
                value: String::new(),
            }
        );
    }

    #[test]
    fn test_decode_mail_from() {
        assert_eq!(
            decode(b'M', b"<a@b.cd>\0SIZE=100\0BODY=8BITMIME\0"),
            Command::Mail {
                sender: "<a@b.cd>".to_string(),
                args: vec!["SIZE=100".to_string(), "BODY=8BITMIME".to_string()],
            }
        );
    }

    #[test]
    fn test_decode_rcpt_to_without_args() {
        assert_eq!(
            decode(b'R', b"<x@y.z>\0"),
            Command::Rcpt {
                recipient: "<x@y.z>".to_string(),
                args: vec![],
            }
        );
        assert_eq!(
            decode(b'R', b"<x@y.z>"),
            Command::Rcpt {
                recipient: "<x@y.z>".to_string(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_decode_opt_neg() {
        assert_eq!(
            decode(b'O', &[0, 0, 0, 6, 0, 0, 1, 0xff, 0, 0x1f, 0xff, 0xff]),
            Command::OptNeg {
                version: 6,
                actions: 0x1ff,
                protocol: 0x1f_ffff,
            }
        );
    }

    #[test]
    fn test_decode_opt_neg_truncated() {
        let result = Command::decode(&Frame::new(b'O', Bytes::from_static(&[0, 0, 0, 6])));
        assert_eq!(
            result,
            Err(ParseError::Truncated {
                command: 'O',
                needed: 12,
                got: 4,
            })
        );
    }

    #[test]
    fn test_decode_helo_and_unknown() {
        assert_eq!(
            decode(b'H', b"client.example.org\0"),
            Command::Helo("client.example.org".to_string())
        );
        assert_eq!(
            decode(b'U', b"XFOO bar"),
            Command::Unknown("XFOO bar".to_string())
        );
    }

    #[test]
    fn test_decode_empty_commands() {
        assert_eq!(decode(b'A', b""), Command::Abort);
        assert_eq!(decode(b'K', b""), Command::QuitNewConnection);
        assert_eq!(decode(b'N', b""), Command::EndOfHeaders);
        assert_eq!(decode(b'Q', b""), Command::Quit);
        assert_eq!(decode(b'T', b""), Command::Data);
    }

    #[test]
    fn test_decode_unrecognized_tag() {
        let command = decode(b'z', b"whatever");
        assert_eq!(command, Command::Unrecognized(b'z'));
        assert_eq!(command.kind(), None);
    }
}
