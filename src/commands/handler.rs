//! Command Dispatcher
//!
//! This module routes decoded milter commands to the connection's filter and
//! decides what goes back to the MTA.
//!
//! ## Rules
//!
//! - Unrecognized tags get a bare `continue`
//! - `D` (macro) never gets an answer
//! - `Q` (quit) closes the connection without an answer
//! - Everything else sends the filter's responses in the order returned
//! - Commands covered by a negotiated "no reply" protocol flag send nothing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Dispatcher                            │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  decode()   │───>│  record()   │───>│  filter.*() │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                        Dispatch outcome     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The dispatcher never checks command order. It decodes and dispatches
//! whatever arrives.

use crate::filter::{Filter, Negotiation, Reply, Session};
use crate::protocol::{protocol_flags, Command, CommandKind, Frame, ParseResult, Response};
use tracing::{debug, trace, warn};

/// What the connection should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send these responses, in order
    Reply(Vec<Response>),
    /// Send nothing and read the next command
    NoReply,
    /// Send nothing and close the connection
    Close,
}

impl Dispatch {
    /// Responses to send, empty for `NoReply` and `Close`
    pub fn responses(&self) -> &[Response] {
        match self {
            Dispatch::Reply(responses) => responses,
            Dispatch::NoReply | Dispatch::Close => &[],
        }
    }
}

/// Dispatches commands for one connection.
///
/// Owns the connection's filter and its [`Session`].
pub struct Dispatcher<M: Filter> {
    filter: M,
    session: Session,
}

impl<M: Filter> Dispatcher<M> {
    /// Creates a dispatcher with a fresh session.
    pub fn new(filter: M) -> Self {
        Self {
            filter,
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn filter(&self) -> &M {
        &self.filter
    }

    /// Decodes a frame and dispatches it.
    pub fn handle_frame(&mut self, frame: &Frame) -> ParseResult<Dispatch> {
        let command = Command::decode(frame)?;
        Ok(self.dispatch(command))
    }

    /// Dispatches one decoded command.
    pub fn dispatch(&mut self, command: Command) -> Dispatch {
        let kind = match command.kind() {
            Some(kind) => kind,
            None => {
                debug!(command = ?command, "Unrecognized command, continuing");
                return Dispatch::Reply(vec![Response::Continue]);
            }
        };
        debug!(command = %kind, "Dispatching");

        let filter = &mut self.filter;
        let session = &mut self.session;

        let reply = match command {
            Command::Abort => {
                let reply = filter.abort(session);
                session.reset_message();
                reply
            }
            Command::Body(chunk) => {
                session.record_body(&chunk);
                filter.body(session, &chunk)
            }
            Command::Connect {
                hostname,
                family,
                port,
                address,
            } => {
                session.record_connect(&hostname, &address);
                filter.connect(session, &hostname, family, port, &address)
            }
            Command::Macro { stage, macros } => {
                session.record_macros(&macros);
                filter.macros(session, stage, &macros);
                return Dispatch::NoReply;
            }
            Command::BodyEob(data) => filter.end_body(session, &data),
            Command::Helo(text) => {
                session.record_helo(&text);
                filter.helo(session, &text)
            }
            Command::QuitNewConnection => {
                let reply = filter.quit_new_connection(session);
                session.reset_connection();
                reply
            }
            Command::Header { name, value } => {
                session.add_header(name.as_str(), value.as_str());
                filter.header(session, &name, &value)
            }
            Command::Mail { sender, args } => {
                session.record_sender(&sender);
                filter.mail_from(session, &sender, &args)
            }
            Command::EndOfHeaders => filter.end_headers(session),
            Command::OptNeg {
                version,
                actions,
                protocol,
            } => {
                let reply = filter.opt_neg(session, version, actions, protocol);
                record_negotiation(session, &reply);
                reply
            }
            Command::Quit => {
                filter.quit(session);
                return Dispatch::Close;
            }
            Command::Rcpt { recipient, args } => {
                session.record_recipient(&recipient);
                filter.rcpt_to(session, &recipient, &args)
            }
            Command::Data => filter.data(session),
            Command::Unknown(text) => filter.unknown(session, &text),
            Command::Unrecognized(_) => return Dispatch::Reply(vec![Response::Continue]),
        };

        if self.reply_suppressed(kind) {
            trace!(command = %kind, "No reply negotiated, dropping responses");
            return Dispatch::NoReply;
        }

        Dispatch::Reply(reply.into_responses())
    }

    /// True when the negotiated protocol flags say the MTA expects no reply.
    fn reply_suppressed(&self, kind: CommandKind) -> bool {
        let flag = match no_reply_flag(kind) {
            Some(flag) => flag,
            None => return false,
        };
        self.session
            .negotiated()
            .is_some_and(|n| n.has_protocol(flag))
    }
}

/// The "no reply" protocol flag covering a command, if any
fn no_reply_flag(kind: CommandKind) -> Option<u32> {
    let flag = match kind {
        CommandKind::Connect => protocol_flags::NR_CONN,
        CommandKind::Helo => protocol_flags::NR_HELO,
        CommandKind::Mail => protocol_flags::NR_MAIL,
        CommandKind::Rcpt => protocol_flags::NR_RCPT,
        CommandKind::Data => protocol_flags::NR_DATA,
        CommandKind::Unknown => protocol_flags::NR_UNKN,
        CommandKind::EndOfHeaders => protocol_flags::NR_EOH,
        CommandKind::Body => protocol_flags::NR_BODY,
        CommandKind::Header => protocol_flags::NR_HDR,
        _ => return None,
    };
    Some(flag)
}

fn record_negotiation(session: &mut Session, reply: &Reply) {
    let negotiation = reply.responses().iter().find_map(|r| match r {
        Response::OptNeg {
            version,
            actions,
            protocol,
        } => Some(Negotiation::new(*version, *actions, *protocol)),
        _ => None,
    });

    match negotiation {
        Some(negotiation) => {
            if session.record_negotiation(negotiation) {
                debug!(
                    version = negotiation.version,
                    actions = format_args!("{:#x}", negotiation.actions),
                    protocol = format_args!("{:#x}", negotiation.protocol),
                    "Negotiated options"
                );
            } else {
                warn!("Repeated option negotiation ignored, keeping the first");
            }
        }
        None => warn!("opt_neg answered without an option negotiation response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{action_flags, MacroMap};
    use bytes::Bytes;

    /// Records callback names and answers with a configurable end-of-body reply.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        protocol: u32,
        end_body: Option<Vec<Response>>,
    }

    impl Filter for Recorder {
        fn opt_neg(&mut self, _: &mut Session, version: u32, _: u32, _: u32) -> Reply {
            self.calls.push("opt_neg".into());
            Negotiation::new(version, action_flags::CURRENT, self.protocol)
                .response()
                .into()
        }

        fn header(&mut self, session: &mut Session, name: &str, value: &str) -> Reply {
            self.calls.push(format!("header {}={}", name, value));
            assert!(session.header_values(name).iter().any(|v| v == value));
            Reply::default()
        }

        fn end_body(&mut self, _: &mut Session, _: &Bytes) -> Reply {
            self.calls.push("end_body".into());
            match &self.end_body {
                Some(responses) => responses.clone().into(),
                None => Reply::default(),
            }
        }

        fn macros(&mut self, _: &mut Session, stage: u8, _: &MacroMap) {
            self.calls.push(format!("macros {}", stage as char));
        }

        fn quit(&mut self, _: &mut Session) {
            self.calls.push("quit".into());
        }
    }

    fn macro_command() -> Command {
        let mut macros = MacroMap::new();
        macros.insert("i".into(), "4Xq1".into());
        Command::Macro {
            stage: b'M',
            macros,
        }
    }

    #[test]
    fn test_macro_never_replies() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        assert_eq!(dispatcher.dispatch(macro_command()), Dispatch::NoReply);
        assert_eq!(dispatcher.filter().calls, vec!["macros M"]);
        assert_eq!(dispatcher.session().macro_value("i"), Some("4Xq1"));
    }

    #[test]
    fn test_macro_default_callback_never_replies() {
        let mut dispatcher = Dispatcher::new(crate::filter::LoggingFilter::new());
        let outcome = dispatcher.dispatch(macro_command());
        assert_eq!(outcome, Dispatch::NoReply);
        assert!(outcome.responses().is_empty());
    }

    #[test]
    fn test_quit_closes_without_reply() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        let outcome = dispatcher.dispatch(Command::Quit);
        assert_eq!(outcome, Dispatch::Close);
        assert!(outcome.responses().is_empty());
        assert_eq!(dispatcher.filter().calls, vec!["quit"]);
    }

    #[test]
    fn test_missing_callback_continues_once() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        for command in [
            Command::Helo("mx".into()),
            Command::Data,
            Command::EndOfHeaders,
            Command::Abort,
            Command::QuitNewConnection,
            Command::Unknown("XFOO".into()),
            Command::Body(Bytes::from("chunk")),
            Command::Unrecognized(b'z'),
        ] {
            let outcome = dispatcher.dispatch(command);
            assert_eq!(outcome, Dispatch::Reply(vec![Response::Continue]));
            assert_eq!(outcome.responses()[0].payload(), Bytes::new());
        }
        assert!(dispatcher.filter().calls.is_empty());
    }

    #[test]
    fn test_end_body_sequence_kept_in_order() {
        let filter = Recorder {
            end_body: Some(vec![Response::replace_body("X"), Response::Continue]),
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(filter);
        let outcome = dispatcher.dispatch(Command::BodyEob(Bytes::new()));

        let frames: Vec<Vec<u8>> = outcome.responses().iter().map(|r| r.serialize().unwrap()).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"\x00\x00\x00\x03bX\x00");
        assert_eq!(frames[1], b"\x00\x00\x00\x01c");
    }

    #[test]
    fn test_session_recorded_before_callback() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.dispatch(Command::Connect {
            hostname: "mail.example.com".into(),
            family: b'4',
            port: 25,
            address: "10.0.0.1".into(),
        });
        dispatcher.dispatch(Command::Mail {
            sender: "<a@b.cd>".into(),
            args: vec![],
        });
        dispatcher.dispatch(Command::Rcpt {
            recipient: "<x@y.z>".into(),
            args: vec![],
        });
        dispatcher.dispatch(Command::Header {
            name: "Subject".into(),
            value: "hi".into(),
        });
        dispatcher.dispatch(Command::Body(Bytes::from("hello ")));
        dispatcher.dispatch(Command::Body(Bytes::from("world")));

        let session = dispatcher.session();
        assert_eq!(session.address(), Some("10.0.0.1"));
        assert_eq!(session.sender(), Some("<a@b.cd>"));
        assert_eq!(session.recipients(), ["<x@y.z>"]);
        assert_eq!(session.header_values("Subject"), ["hi"]);
        assert_eq!(session.body(), b"hello world");
        assert_eq!(dispatcher.filter().calls, vec!["header Subject=hi"]);
    }

    #[test]
    fn test_abort_clears_message() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        dispatcher.dispatch(Command::Mail {
            sender: "<a@b.cd>".into(),
            args: vec![],
        });
        dispatcher.dispatch(Command::Body(Bytes::from("partial")));
        dispatcher.dispatch(Command::Abort);
        assert!(dispatcher.session().sender().is_none());
        assert!(dispatcher.session().body().is_empty());
    }

    #[test]
    fn test_opt_neg_recorded_once() {
        let filter = Recorder {
            protocol: protocol_flags::RCPT_REJ,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(filter);
        let offer = Command::OptNeg {
            version: 6,
            actions: 0x1ff,
            protocol: 0x1f_ffff,
        };

        let outcome = dispatcher.dispatch(offer.clone());
        assert_eq!(
            outcome.responses(),
            [Response::opt_neg(6, action_flags::CURRENT, protocol_flags::RCPT_REJ)]
        );
        let negotiated = *dispatcher.session().negotiated().unwrap();

        dispatcher.filter.protocol = protocol_flags::NR_HDR;
        dispatcher.dispatch(offer);
        assert_eq!(dispatcher.session().negotiated(), Some(&negotiated));
    }

    #[test]
    fn test_no_reply_flags_suppress_responses() {
        let filter = Recorder {
            protocol: protocol_flags::NR_HDR | protocol_flags::NR_BODY,
            ..Default::default()
        };
        let mut dispatcher = Dispatcher::new(filter);
        dispatcher.dispatch(Command::OptNeg {
            version: 6,
            actions: 0x1ff,
            protocol: 0x1f_ffff,
        });

        let header = Command::Header {
            name: "Subject".into(),
            value: "hi".into(),
        };
        assert_eq!(dispatcher.dispatch(header), Dispatch::NoReply);
        assert_eq!(
            dispatcher.dispatch(Command::Body(Bytes::from("x"))),
            Dispatch::NoReply
        );
        assert_eq!(
            dispatcher.dispatch(Command::EndOfHeaders),
            Dispatch::Reply(vec![Response::Continue])
        );
        // Header values are still recorded
        assert_eq!(dispatcher.session().header_values("Subject"), ["hi"]);
    }

    #[test]
    fn test_handle_frame_decodes() {
        let mut dispatcher = Dispatcher::new(Recorder::default());
        let frame = Frame::new(b'L', &b"From\0a@b.cd\0"[..]);
        assert_eq!(
            dispatcher.handle_frame(&frame).unwrap(),
            Dispatch::Reply(vec![Response::Continue])
        );
        assert_eq!(dispatcher.filter().calls, vec!["header From=a@b.cd"]);

        let broken = Frame::new(b'O', &b"\x00\x00"[..]);
        assert!(dispatcher.handle_frame(&broken).is_err());
    }
}
