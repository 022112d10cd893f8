//! # Tunrelay
//!
//! A client-side IP tunneling engine that relays raw IP packets between a
//! TUN-style virtual adapter and a single TCP connection to a relay server.
//!
//! ## Features
//!
//! - **Length-prefixed framing** with a reversible byte mask on the wire
//! - **Route exclusion planning**: CIDR algebra that routes everything
//!   through the tunnel except the server, DNS resolvers, loopback,
//!   tethering ranges and local subnets
//! - **Pluggable adapter**: the virtual interface is a trait, bound to
//!   whatever native TUN mechanism the platform provides
//! - **Single-session engine** with an explicit cancellation token and
//!   clean teardown on both forwarding paths
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Tunnel Session Engine                 │
//! │    (connect, handshake, route install, loops)        │
//! ├──────────────────────────┬──────────────────────────┤
//! │       Frame Codec        │  Route Exclusion Planner  │
//! │  (length prefix, mask)   │        (gap walk)         │
//! ├──────────────────────────┼──────────────────────────┤
//! │      TCP Transport       │       CIDR Algebra        │
//! ├──────────────────────────┴──────────────────────────┤
//! │            TUN Adapter (platform trait)              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod cidr;
pub mod config;
pub mod protocol;
pub mod routes;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use tunnel::{SessionConfig, SessionState, TunnelSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest IP packet carried through the tunnel, and the MTU programmed
/// into the adapter. A decoded frame length above this is a framing error.
pub const TUNNEL_MTU: usize = 10000;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Adapter error: {0}")]
    Adapter(#[from] adapter::AdapterError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),
}
