//! Command Dispatch Module
//!
//! This module sits between the protocol layer and the user's filter. It
//! receives decoded milter commands, records them in the connection's session,
//! calls the matching filter callback and decides what to send back.
//!
//! ## Architecture
//!
//! ```text
//! MTA frame
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command decoder │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! │                 │
//! │  - Record       │
//! │  - Invoke       │
//! │  - Decide       │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │     Filter      │  (filter module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the dispatcher
pub use handler::{Dispatch, Dispatcher};
