//! TUN adapter abstraction
//!
//! The virtual network interface is a platform capability, not something
//! this crate implements: Wintun on Windows, utun on macOS, /dev/net/tun
//! on Linux. The session engine consumes it through [`TunAdapter`], which
//! carries exactly the operations the engine needs - packet I/O, address
//! and MTU management, and route installation bound to the adapter.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cidr::Ipv4Net;

/// Adapter layer errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Adapter closed")]
    Closed,

    #[error("Address operation failed: {0}")]
    Address(String),

    #[error("Route installation failed for {dest}: {reason}")]
    Route { dest: Ipv4Net, reason: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Address family selector for per-family adapter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// An address assigned to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

/// One outcome of a timed adapter read.
///
/// `None` means no packet was available within the timeout; an empty
/// packet is the driver's orderly-shutdown sentinel.
pub type ReadOutcome = Option<Bytes>;

/// Capability set of a TUN-style virtual adapter.
///
/// Implementations are expected to support one reader and one writer
/// concurrently; the session engine never issues two reads or two writes
/// at once. Adapter teardown is the implementor's `Drop`.
#[async_trait]
pub trait TunAdapter: Send + Sync {
    /// Stable identifier used to bind routes to this adapter
    /// (interface name, LUID rendering, or similar).
    fn name(&self) -> &str;

    /// Set the adapter MTU for one address family.
    async fn set_mtu(&self, family: AddressFamily, mtu: u32) -> Result<(), AdapterError>;

    /// Assign an address with the given prefix length.
    async fn assign_ip(&self, addr: IpAddr, prefix_len: u8) -> Result<(), AdapterError>;

    /// Remove a previously assigned address.
    async fn remove_ip(&self, addr: IpAddr) -> Result<(), AdapterError>;

    /// Enumerate addresses currently assigned to this adapter.
    async fn assigned_addresses(
        &self,
        family: AddressFamily,
    ) -> Result<Vec<AdapterAddress>, AdapterError>;

    /// Read one IP packet.
    ///
    /// With a timeout, returns `Ok(None)` when nothing arrived in time.
    /// An empty packet signals that the driver is shutting down.
    async fn read_packet(&self, timeout: Option<Duration>) -> Result<ReadOutcome, AdapterError>;

    /// Write one IP packet.
    async fn write_packet(&self, packet: &[u8]) -> Result<(), AdapterError>;

    /// Install a route for `dest` pointing at this adapter.
    async fn add_route(&self, dest: Ipv4Net) -> Result<(), AdapterError>;
}
