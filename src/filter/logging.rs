//! Logging Filter
//!
//! A filter that accepts everything and logs each stage of the SMTP session.
//! Useful for checking what an MTA actually sends; the `milterkit` binary
//! serves it by default.

use crate::filter::{Filter, Negotiation, Reply, Session};
use crate::protocol::{action_flags, protocol_flags, MacroMap, PROTOCOL_VERSION};
use bytes::Bytes;
use tracing::info;

/// Logs every callback and answers `continue`.
#[derive(Debug, Default)]
pub struct LoggingFilter;

impl LoggingFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for LoggingFilter {
    fn opt_neg(&mut self, _session: &mut Session, version: u32, actions: u32, protocol: u32) -> Reply {
        info!(
            version,
            actions = format_args!("{:#x}", actions),
            protocol = format_args!("{:#x}", protocol),
            "New milter connection"
        );
        // Also ask for rejected recipients so they show up in the log
        Negotiation::new(
            version.min(PROTOCOL_VERSION),
            action_flags::CURRENT & actions,
            protocol_flags::RCPT_REJ & protocol,
        )
        .response()
        .into()
    }

    fn connect(
        &mut self,
        _session: &mut Session,
        hostname: &str,
        _family: u8,
        port: u16,
        address: &str,
    ) -> Reply {
        info!(hostname, address, port, "connect");
        Reply::default()
    }

    fn helo(&mut self, _session: &mut Session, text: &str) -> Reply {
        info!(helo = text, "helo");
        Reply::default()
    }

    fn mail_from(&mut self, _session: &mut Session, sender: &str, args: &[String]) -> Reply {
        info!(sender, ?args, "mail_from");
        Reply::default()
    }

    fn rcpt_to(&mut self, _session: &mut Session, recipient: &str, args: &[String]) -> Reply {
        info!(recipient, ?args, "rcpt_to");
        Reply::default()
    }

    fn data(&mut self, _session: &mut Session) -> Reply {
        info!("data");
        Reply::default()
    }

    fn unknown(&mut self, _session: &mut Session, command: &str) -> Reply {
        info!(command, "unknown smtp command");
        Reply::default()
    }

    fn header(&mut self, _session: &mut Session, name: &str, value: &str) -> Reply {
        info!(name, value, "header");
        Reply::default()
    }

    fn end_headers(&mut self, session: &mut Session) -> Reply {
        info!(count = session.headers().count(), "end of headers");
        Reply::default()
    }

    fn end_body(&mut self, session: &mut Session, data: &Bytes) -> Reply {
        info!(
            body_bytes = session.body().len(),
            final_chunk = data.len(),
            recipients = ?session.recipients(),
            "end of body"
        );
        Reply::default()
    }

    fn abort(&mut self, _session: &mut Session) -> Reply {
        info!("abort");
        Reply::default()
    }

    fn macros(&mut self, _session: &mut Session, stage: u8, macros: &MacroMap) {
        info!(stage = %(stage as char), ?macros, "macros");
    }

    fn quit(&mut self, _session: &mut Session) {
        info!("quit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;

    #[test]
    fn test_opt_neg_intersects_mta_offer() {
        let mut filter = LoggingFilter::new();
        let reply = filter.opt_neg(&mut Session::new(), 6, 0x1ff, 0x1f_ffff);
        assert_eq!(
            reply.into_responses(),
            vec![Response::opt_neg(6, 0x1ff, protocol_flags::RCPT_REJ)]
        );

        let reply = filter.opt_neg(&mut Session::new(), 2, 0x3f, 0x7f);
        assert_eq!(reply.into_responses(), vec![Response::opt_neg(2, 0x3f, 0)]);
    }

    #[test]
    fn test_everything_continues() {
        let mut filter = LoggingFilter::new();
        let mut session = Session::new();
        assert_eq!(
            filter.connect(&mut session, "mx", b'4', 25, "10.0.0.1"),
            Reply::default()
        );
        assert_eq!(filter.header(&mut session, "Subject", "x"), Reply::default());
    }
}
