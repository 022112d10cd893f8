//! Tunnel layer - framing and the session engine
//!
//! Provides:
//! - Frame encoding/decoding with the wire byte mask
//! - The single-session forwarding engine and its lifecycle states

mod frame;
mod session;

pub use frame::{decode, encode, mask_in_place, FRAME_MASK, LENGTH_PREFIX_LEN};
pub use session::{SessionConfig, SessionState, TunnelSession};

use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Frame too large: {0} > {1}")]
    FrameTooLarge(usize, usize),

    #[error("Session cannot be restarted once started or stopped")]
    NotRestartable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Adapter error: {0}")]
    Adapter(#[from] crate::adapter::AdapterError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),
}
