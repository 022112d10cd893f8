//! TCP transport to the relay server
//!
//! One reliable, ordered byte stream per session. Connect is bounded by a
//! timeout and the socket runs with `TCP_NODELAY` - tunneled traffic is
//! latency-sensitive, so small frames must not sit in Nagle's buffer.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connect timeout after {0:?}")]
    Timeout(Duration),
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on connection establishment
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Open the session's TCP connection to `addr` (`host:port`).
///
/// Fails hard on timeout or refusal; retry policy belongs to the caller,
/// not to the transport.
pub async fn connect(addr: &str, config: &TransportConfig) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::Timeout(config.connect_timeout))?
        .map_err(TransportError::Io)?;

    stream.set_nodelay(true).ok();
    debug!("connected to {}", addr);

    Ok(stream)
}
