//! Connection Handler Module
//!
//! This module handles individual MTA connections. Each connection gets its own
//! handler task that runs in a loop, reading milter frames and sending responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. MTA connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned with a fresh filter
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Extract every ready     │ │
//!    │  │ frame                   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Dispatch to the filter  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send responses          │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Quit / MTA disconnects / error
//!        │
//!        ▼
//! 5. Handler task ends, filter and session are dropped
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes go straight into the connection's [`FrameBuffer`]. TCP is a
//! stream protocol, so a read may hold part of a frame or several frames. All
//! ready frames are dispatched, in order, before the next read.

use crate::commands::{Dispatch, Dispatcher};
use crate::filter::Filter;
use crate::protocol::{FrameBuffer, ParseError, PayloadTooLarge, Response};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Per-connection limits.
///
/// Both are off by default: an incomplete frame is waited on for as long as the
/// MTA keeps the connection open.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Reject frames declaring more than this many bytes
    pub max_frame_size: Option<u32>,
    /// Close the connection when no bytes arrive for this long
    pub idle_timeout: Option<Duration>,
}

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands dispatched
    pub commands_processed: AtomicU64,
    /// Total response frames sent
    pub responses_sent: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn responses_sent(&self, count: usize) {
        self.responses_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single MTA connection.
///
/// Owns the frame buffer, the filter and the session for one connection.
pub struct ConnectionHandler<M: Filter, S = TcpStream> {
    /// The byte stream for this connection
    stream: BufWriter<S>,

    /// Peer address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet dispatched
    frames: FrameBuffer,

    /// The filter and its session
    dispatcher: Dispatcher<M>,

    idle_timeout: Option<Duration>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<M, S> ConnectionHandler<M, S>
where
    M: Filter,
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The MTA's socket address
    /// * `filter` - A fresh filter instance for this connection
    /// * `config` - Per-connection limits
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        filter: M,
        config: &ConnectionConfig,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let frames = match config.max_frame_size {
            Some(max) => FrameBuffer::with_max_frame_size(max),
            None => FrameBuffer::new(),
        };

        Self {
            stream: BufWriter::new(stream),
            addr,
            frames,
            dispatcher: Dispatcher::new(filter),
            idle_timeout: config.idle_timeout,
            stats,
        }
    }

    /// Runs the main connection loop.
    ///
    /// Reads frames, dispatches them and sends back responses until the MTA
    /// quits, disconnects, or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "MTA connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "MTA quit"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "MTA disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by MTA")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-dispatch-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Dispatch everything already buffered before reading again
            while let Some(frame) = self.frames.next_frame()? {
                trace!(
                    client = %self.addr,
                    tag = %(frame.tag as char),
                    len = frame.payload.len(),
                    remaining = self.frames.len(),
                    "Parsed frame"
                );

                let outcome = self.dispatcher.handle_frame(&frame)?;
                self.stats.command_processed();

                match outcome {
                    Dispatch::Reply(responses) => self.send_responses(&responses).await?,
                    Dispatch::NoReply => {}
                    Dispatch::Close => {
                        self.stream.flush().await?;
                        return Ok(());
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Reads more data from the socket into the frame buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let buffer = self.frames.buffer_mut();
        if buffer.capacity() - buffer.len() < 1024 {
            buffer.reserve(4096);
        }

        let read = self.stream.get_mut().read_buf(buffer);
        let n = match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout(limit))??,
            None => read.await?,
        };

        if n == 0 {
            if self.frames.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial frame in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends responses to the MTA, in order, in one write.
    async fn send_responses(&mut self, responses: &[Response]) -> Result<(), ConnectionError> {
        if responses.is_empty() {
            return Ok(());
        }

        let mut bytes = Vec::new();
        for response in responses {
            debug!(client = %self.addr, response = %response, "Sending response");
            response.serialize_into(&mut bytes)?;
        }

        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.responses_sent(responses.len());
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent responses"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Framing or payload decoding error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// A filter response too large to frame
    #[error("Encode error: {0}")]
    EncodeError(#[from] PayloadTooLarge),

    /// MTA disconnected between frames
    #[error("Client disconnected")]
    ClientDisconnected,

    /// End of stream in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// No bytes arrived within the idle timeout
    #[error("Idle for more than {0:?}")]
    IdleTimeout(Duration),
}

/// Handles an MTA connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
pub async fn handle_connection<M: Filter>(
    stream: TcpStream,
    addr: SocketAddr,
    filter: M,
    config: ConnectionConfig,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, filter, &config, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
