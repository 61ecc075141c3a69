//! Filter Contract
//!
//! A mail filter is any type implementing [`Filter`]. Every callback has a
//! default that answers `continue`, so a filter only overrides the stages it
//! cares about. The one exception is [`Filter::opt_neg`]: each filter decides
//! which actions and protocol flags to announce to the MTA.
//!
//! One filter instance is created per MTA connection by a [`FilterFactory`],
//! alongside a fresh [`Session`].
//!
//! ## Example
//!
//! ```
//! use milterkit::filter::{Filter, Negotiation, Reply, Session};
//! use milterkit::protocol::{action_flags, Response};
//! use bytes::Bytes;
//!
//! struct Stamp;
//!
//! impl Filter for Stamp {
//!     fn opt_neg(&mut self, _: &mut Session, version: u32, _: u32, _: u32) -> Reply {
//!         Negotiation::new(version.min(6), action_flags::CHG_BODY, 0).response().into()
//!     }
//!
//!     fn end_body(&mut self, session: &mut Session, _data: &Bytes) -> Reply {
//!         let mut body = session.body().to_vec();
//!         body.extend_from_slice(b"\r\n-- scanned\r\n");
//!         vec![Response::replace_body(body), Response::Continue].into()
//!     }
//! }
//! ```

pub mod logging;
pub mod session;

pub use logging::LoggingFilter;
pub use session::{Negotiation, Session};

use crate::protocol::{MacroMap, Response};
use bytes::Bytes;

/// What a callback answers: one response or an ordered sequence of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Single(Response),
    /// Sent in order, e.g. replace body followed by continue
    Sequence(Vec<Response>),
}

impl Reply {
    /// The responses, in sending order
    pub fn responses(&self) -> &[Response] {
        match self {
            Reply::Single(response) => std::slice::from_ref(response),
            Reply::Sequence(responses) => responses,
        }
    }

    pub fn into_responses(self) -> Vec<Response> {
        match self {
            Reply::Single(response) => vec![response],
            Reply::Sequence(responses) => responses,
        }
    }
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Single(Response::Continue)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Single(response)
    }
}

impl From<Vec<Response>> for Reply {
    fn from(responses: Vec<Response>) -> Self {
        Reply::Sequence(responses)
    }
}

/// Callbacks for each milter command.
///
/// Every callback gets the connection's [`Session`], already updated with the
/// data of the current command.
#[allow(unused_variables)]
pub trait Filter: Send + 'static {
    /// Option negotiation. Must answer with [`Response::OptNeg`].
    fn opt_neg(&mut self, session: &mut Session, version: u32, actions: u32, protocol: u32)
        -> Reply;

    fn connect(
        &mut self,
        session: &mut Session,
        hostname: &str,
        family: u8,
        port: u16,
        address: &str,
    ) -> Reply {
        Reply::default()
    }

    fn helo(&mut self, session: &mut Session, text: &str) -> Reply {
        Reply::default()
    }

    fn mail_from(&mut self, session: &mut Session, sender: &str, args: &[String]) -> Reply {
        Reply::default()
    }

    fn rcpt_to(&mut self, session: &mut Session, recipient: &str, args: &[String]) -> Reply {
        Reply::default()
    }

    fn data(&mut self, session: &mut Session) -> Reply {
        Reply::default()
    }

    /// An SMTP command the MTA itself did not recognize
    fn unknown(&mut self, session: &mut Session, command: &str) -> Reply {
        Reply::default()
    }

    fn header(&mut self, session: &mut Session, name: &str, value: &str) -> Reply {
        Reply::default()
    }

    fn end_headers(&mut self, session: &mut Session) -> Reply {
        Reply::default()
    }

    fn body(&mut self, session: &mut Session, chunk: &Bytes) -> Reply {
        Reply::default()
    }

    /// End of message. The place for body replacement and other modifications.
    fn end_body(&mut self, session: &mut Session, data: &Bytes) -> Reply {
        Reply::default()
    }

    fn abort(&mut self, session: &mut Session) -> Reply {
        Reply::default()
    }

    fn quit_new_connection(&mut self, session: &mut Session) -> Reply {
        Reply::default()
    }

    /// Macro definitions. The MTA never expects an answer.
    fn macros(&mut self, session: &mut Session, stage: u8, macros: &MacroMap) {}

    /// The MTA is closing the connection. No answer is sent.
    fn quit(&mut self, session: &mut Session) {}
}

/// Builds one filter per accepted connection.
///
/// Implemented for any `Fn() -> impl Filter` closure or function.
pub trait FilterFactory: Send + Sync + 'static {
    type Filter: Filter;

    fn create(&self) -> Self::Filter;
}

impl<F, M> FilterFactory for F
where
    F: Fn() -> M + Send + Sync + 'static,
    M: Filter,
{
    type Filter = M;

    fn create(&self) -> M {
        self()
    }
}
