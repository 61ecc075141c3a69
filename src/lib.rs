//! # milterkit - Mail Filters over the Milter Protocol
//!
//! milterkit implements the filter side of the milter protocol spoken by
//! Sendmail and Postfix. An MTA opens one connection per SMTP session and
//! streams length-prefixed commands (connect, HELO, MAIL FROM, RCPT TO,
//! headers, body chunks); the filter answers each with responses that tell the
//! MTA to continue, reject, or modify the message.
//!
//! ## Features
//!
//! - **Complete framing**: Frames are reassembled from any chunking of the TCP stream
//! - **Typed commands**: Every command payload is decoded into a `Command` variant
//! - **Filter trait**: Override only the callbacks you need, the rest answer `continue`
//! - **Message modifications**: Replace body, change headers, add/remove recipients
//! - **Async I/O**: Built on Tokio, one task and one filter per MTA connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              milterkit                                  │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│ Dispatcher  │                  │
//! │  │ (Listener)  │    │  Handler    │    │             │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         │ factory          ▼                  ▼                         │
//! │         │           ┌─────────────┐    ┌──────────────────────────────┐ │
//! │         └──────────>│ FrameBuffer │    │  Filter (user code)          │ │
//! │                     │ + Command   │    │  + Session (headers, body,   │ │
//! │                     │   decoder   │    │    recipients, macros)       │ │
//! │                     └─────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use milterkit::connection::{ConnectionConfig, ConnectionStats};
//! use milterkit::filter::{Filter, Negotiation, Reply, Session};
//! use milterkit::protocol::{action_flags, Response};
//! use milterkit::server::serve;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! struct NoSpam;
//!
//! impl Filter for NoSpam {
//!     fn opt_neg(&mut self, _: &mut Session, version: u32, _: u32, _: u32) -> Reply {
//!         Negotiation::new(version.min(6), action_flags::CHG_HDRS, 0).response().into()
//!     }
//!
//!     fn header(&mut self, _: &mut Session, name: &str, value: &str) -> Reply {
//!         if name == "Subject" && value.contains("viagra") {
//!             return Response::Reject.into();
//!         }
//!         Reply::default()
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8888").await.unwrap();
//!     let stats = Arc::new(ConnectionStats::new());
//!     serve(listener, Arc::new(|| NoSpam), stats, ConnectionConfig::default()).await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Framing, command decoding and response encoding
//! - [`filter`]: The `Filter` trait, per-connection `Session`, a logging filter
//! - [`commands`]: The dispatcher routing commands to filter callbacks
//! - [`connection`]: Per-connection read/dispatch/write loop
//! - [`server`]: The accept loop
//!
//! ## Design Highlights
//!
//! ### No Shared State
//!
//! Each connection owns its frame buffer, filter and session. The only value
//! shared between connections is the read-only filter factory.
//!
//! ### Ordered Replies
//!
//! A callback may return several responses (for example replace body, then
//! continue). They are written in that order, in a single write.
//!
//! ### Unbounded Waits by Default
//!
//! An incomplete frame is waited on indefinitely, as the protocol has no
//! timeouts of its own. `ConnectionConfig` can cap frame size and idle time.

pub mod commands;
pub mod connection;
pub mod filter;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use commands::{Dispatch, Dispatcher};
pub use connection::{handle_connection, ConnectionConfig, ConnectionStats};
pub use filter::{Filter, FilterFactory, LoggingFilter, Negotiation, Reply, Session};
pub use protocol::{Command, Frame, FrameBuffer, ParseError, Response};
pub use server::serve;

/// The default port milterkit listens on
pub const DEFAULT_PORT: u16 = 8888;

/// The default host milterkit binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of milterkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
