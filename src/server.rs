//! Listener
//!
//! Accepts MTA connections and spawns one handler task per connection, each
//! with a fresh filter built by the [`FilterFactory`] given at startup.

use crate::connection::{handle_connection, ConnectionConfig, ConnectionStats};
use crate::filter::FilterFactory;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error};

/// Accepts connections forever.
///
/// A failed accept is logged and the loop keeps going; a failing connection
/// only ends its own task.
///
/// # Example
///
/// ```ignore
/// use milterkit::filter::LoggingFilter;
/// use milterkit::server::serve;
///
/// let listener = TcpListener::bind("127.0.0.1:8888").await?;
/// serve(listener, Arc::new(LoggingFilter::new), stats, ConnectionConfig::default()).await;
/// ```
pub async fn serve<F: FilterFactory>(
    listener: TcpListener,
    factory: Arc<F>,
    stats: Arc<ConnectionStats>,
    config: ConnectionConfig,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(client = %addr, "Accepted connection");

                // Fresh filter for this connection
                let filter = factory.create();
                let stats = Arc::clone(&stats);
                let config = config.clone();

                tokio::spawn(async move {
                    handle_connection(stream, addr, filter, config, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
