//! Per-Connection Session State
//!
//! A [`Session`] is created when the MTA connects and dropped when the
//! connection closes. The dispatcher records what the MTA sends (headers, body
//! chunks, recipients, macros) before invoking the filter, so a filter can
//! override any callback and still see the accumulated state.
//!
//! Message-scoped state (sender, recipients, headers, body) is cleared when a
//! new `MAIL FROM` starts the next message on the same connection, and after an
//! abort.

use crate::protocol::{MacroMap, Response};
use bytes::BytesMut;
use std::collections::HashMap;

/// Flags agreed with the MTA during option negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub version: u32,
    pub actions: u32,
    pub protocol: u32,
}

impl Negotiation {
    pub fn new(version: u32, actions: u32, protocol: u32) -> Self {
        Self {
            version,
            actions,
            protocol,
        }
    }

    /// Returns true if every bit of `flag` is in the negotiated protocol flags.
    pub fn has_protocol(&self, flag: u32) -> bool {
        self.protocol & flag == flag
    }

    pub fn has_action(&self, flag: u32) -> bool {
        self.actions & flag == flag
    }

    /// The option negotiation response announcing these flags
    pub fn response(&self) -> Response {
        Response::opt_neg(self.version, self.actions, self.protocol)
    }
}

/// State accumulated over one MTA connection.
#[derive(Debug, Default, Clone)]
pub struct Session {
    /// Header name → values, in the order names were first seen
    headers: Vec<(String, Vec<String>)>,
    /// Position of each name in `headers`
    header_index: HashMap<String, usize>,
    body: BytesMut,
    recipients: Vec<String>,
    sender: Option<String>,
    macros: MacroMap,
    hostname: Option<String>,
    address: Option<String>,
    helo: Option<String>,
    negotiated: Option<Negotiation>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Headers
    // ========================================================================

    /// Iterates over header names and their values, in arrival order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.headers
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// All values received for `name`, oldest first.
    pub fn header_values(&self, name: &str) -> &[String] {
        match self.header_index.get(name) {
            Some(&pos) => self.headers[pos].1.as_slice(),
            None => &[],
        }
    }

    /// Appends a value under `name`.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.header_index.get(&name) {
            Some(&pos) => self.headers[pos].1.push(value),
            None => {
                self.header_index.insert(name.clone(), self.headers.len());
                self.headers.push((name, vec![value]));
            }
        }
    }

    /// Removes every value for `name`, returning them.
    pub fn remove_header(&mut self, name: &str) -> Option<Vec<String>> {
        let pos = self.header_index.remove(name)?;
        let (_, values) = self.headers.remove(pos);
        // Names after the removed one moved down by one
        for index in self.header_index.values_mut() {
            if *index > pos {
                *index -= 1;
            }
        }
        Some(values)
    }

    // ========================================================================
    // Body
    // ========================================================================

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    // ========================================================================
    // Envelope
    // ========================================================================

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn recipients_mut(&mut self) -> &mut Vec<String> {
        &mut self.recipients
    }

    /// The envelope sender of the current message
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Latest value of a macro sent by the MTA, e.g. `i` (queue id) or `{auth_authen}`.
    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn macros(&self) -> &MacroMap {
        &self.macros
    }

    /// Client hostname from the connect command
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Client address from the connect command
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    pub fn negotiated(&self) -> Option<&Negotiation> {
        self.negotiated.as_ref()
    }

    // ========================================================================
    // Recording (dispatcher only)
    // ========================================================================

    pub(crate) fn record_connect(&mut self, hostname: &str, address: &str) {
        self.hostname = Some(hostname.to_string());
        self.address = Some(address.to_string());
    }

    pub(crate) fn record_helo(&mut self, text: &str) {
        self.helo = Some(text.to_string());
    }

    pub(crate) fn record_sender(&mut self, sender: &str) {
        self.reset_message();
        self.sender = Some(sender.to_string());
    }

    pub(crate) fn record_recipient(&mut self, recipient: &str) {
        self.recipients.push(recipient.to_string());
    }

    pub(crate) fn record_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    pub(crate) fn record_macros(&mut self, macros: &MacroMap) {
        for (name, value) in macros {
            self.macros.insert(name.clone(), value.clone());
        }
    }

    /// Stores the negotiated flags. Only the first negotiation sticks.
    pub(crate) fn record_negotiation(&mut self, negotiation: Negotiation) -> bool {
        if self.negotiated.is_some() {
            return false;
        }
        self.negotiated = Some(negotiation);
        true
    }

    /// Clears sender, recipients, headers and body.
    pub(crate) fn reset_message(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.headers.clear();
        self.header_index.clear();
        self.body.clear();
    }

    /// Clears everything except the negotiated flags.
    pub(crate) fn reset_connection(&mut self) {
        self.reset_message();
        self.macros.clear();
        self.hostname = None;
        self.address = None;
        self.helo = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{action_flags, protocol_flags};

    #[test]
    fn test_headers_keep_order_and_repeats() {
        let mut session = Session::new();
        session.add_header("Received", "from a");
        session.add_header("Subject", "hi");
        session.add_header("Received", "from b");

        let names: Vec<&str> = session.headers().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Received", "Subject"]);
        assert_eq!(session.header_values("Received"), ["from a", "from b"]);
        assert!(session.header_values("Missing").is_empty());

        assert_eq!(session.remove_header("Subject"), Some(vec!["hi".to_string()]));
        assert_eq!(session.headers().count(), 1);
    }

    #[test]
    fn test_header_lookup_after_removal() {
        let mut session = Session::new();
        for i in 0..500 {
            session.add_header(format!("X-Header-{}", i), "a");
        }
        session.add_header("X-Header-250", "b");

        assert_eq!(session.remove_header("X-Header-10"), Some(vec!["a".to_string()]));
        assert!(session.header_values("X-Header-10").is_empty());
        assert_eq!(session.header_values("X-Header-250"), ["a", "b"]);
        assert_eq!(session.header_values("X-Header-499"), ["a"]);

        session.add_header("X-Header-10", "again");
        let last = session.headers().last().unwrap();
        assert_eq!(last, ("X-Header-10", &["again".to_string()][..]));
        assert_eq!(session.headers().count(), 500);
    }

    #[test]
    fn test_headers_cleared_with_message() {
        let mut session = Session::new();
        session.add_header("Subject", "one");
        session.reset_message();
        assert!(session.header_values("Subject").is_empty());

        session.add_header("Subject", "two");
        assert_eq!(session.header_values("Subject"), ["two"]);
    }

    #[test]
    fn test_sender_starts_new_message() {
        let mut session = Session::new();
        session.record_sender("<a@b.cd>");
        session.record_recipient("<x@y.z>");
        session.add_header("Subject", "one");
        session.record_body(b"first");

        session.record_sender("<c@d.ef>");
        assert_eq!(session.sender(), Some("<c@d.ef>"));
        assert!(session.recipients().is_empty());
        assert_eq!(session.headers().count(), 0);
        assert!(session.body().is_empty());
    }

    #[test]
    fn test_negotiation_is_set_once() {
        let mut session = Session::new();
        let first = Negotiation::new(6, action_flags::CHG_BODY, protocol_flags::NR_HDR);
        assert!(session.record_negotiation(first));
        assert!(!session.record_negotiation(Negotiation::new(6, 0, 0)));
        assert_eq!(session.negotiated(), Some(&first));
        assert!(first.has_protocol(protocol_flags::NR_HDR));
        assert!(!first.has_action(action_flags::ADD_HDRS));
    }

    #[test]
    fn test_reset_connection_keeps_negotiation() {
        let mut session = Session::new();
        session.record_negotiation(Negotiation::new(6, 0, 0));
        session.record_connect("mx", "10.0.0.1");
        session.record_helo("mx");

        session.reset_connection();
        assert!(session.hostname().is_none());
        assert!(session.helo().is_none());
        assert!(session.negotiated().is_some());
    }
}
