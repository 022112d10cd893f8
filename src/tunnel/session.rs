//! Tunnel session engine
//!
//! Owns the lifecycle of one tunnel session:
//!
//! ```text
//! Idle -> Connecting -> Handshaking -> Forwarding -> Stopping -> Closed
//! ```
//!
//! Setup (adapter preparation, connect, hello, route installation) runs
//! before either forwarding loop starts. The two loops then run as
//! independent tasks - adapter-to-transport and transport-to-adapter -
//! sharing nothing but a cancellation token. Either loop exiting, for any
//! reason, cancels the token so the other winds down within one polling
//! interval. A session never restarts: once stopped, a fresh instance is
//! required.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{frame, TunnelError};
use crate::adapter::{AddressFamily, TunAdapter};
use crate::cidr::Ipv4Net;
use crate::protocol::{self, LocaleInfo};
use crate::routes::ExclusionSet;
use crate::transport::{self, TransportConfig};
use crate::TUNNEL_MTU;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, not yet started
    Idle = 0,
    /// Opening the TCP connection
    Connecting = 1,
    /// Sending the hello
    Handshaking = 2,
    /// Both forwarding loops running
    Forwarding = 3,
    /// Stop requested or a loop failed; winding down
    Stopping = 4,
    /// Both loops exited, resources released
    Closed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Handshaking,
            3 => SessionState::Forwarding,
            4 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay server endpoint (`host:port`)
    pub server: String,
    /// Address assigned to the tunnel adapter
    pub client_addr: Ipv4Addr,
    /// Prefix length for the adapter address
    pub client_prefix_len: u8,
    /// DNS resolvers excluded from the tunnel
    pub dns_resolvers: Vec<Ipv4Addr>,
    /// Subnets of other local interfaces, excluded from the tunnel
    pub local_subnets: Vec<Ipv4Net>,
    /// Opaque configuration passed verbatim in the handshake
    pub config_data: Option<String>,
    /// Transport settings (connect timeout)
    pub transport: TransportConfig,
    /// Adapter read timeout; bounds how long a loop can be blind to the
    /// stop token
    pub read_poll_interval: Duration,
}

impl SessionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            client_addr: Ipv4Addr::new(10, 1, 10, 1),
            client_prefix_len: 24,
            dns_resolvers: Vec::new(),
            local_subnets: Vec::new(),
            config_data: None,
            transport: TransportConfig::default(),
            read_poll_interval: Duration::from_millis(100),
        }
    }
}

/// One tunnel session: connect, handshake, route setup, forward, teardown.
pub struct TunnelSession {
    config: SessionConfig,
    adapter: Arc<dyn TunAdapter>,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    started: AtomicBool,
}

impl TunnelSession {
    pub fn new(config: SessionConfig, adapter: Arc<dyn TunAdapter>) -> Self {
        Self {
            config,
            adapter,
            cancel: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
            started: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Request a stop. Safe to call from any task at any time; both
    /// forwarding loops observe the token at their next iteration.
    pub fn stop(&self) {
        debug!("session stop requested");
        self.cancel.cancel();
        // Stopped before ever starting: go straight to Closed.
        let _ = self.state.compare_exchange(
            SessionState::Idle as u8,
            SessionState::Closed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Run the session to completion.
    ///
    /// Returns when both forwarding loops have exited and resources are
    /// released. Errors during setup abort before forwarding starts. A
    /// transport severed mid-session is normal termination, not an error.
    pub async fn run(&self) -> Result<(), TunnelError> {
        if self.started.swap(true, Ordering::SeqCst) || self.cancel.is_cancelled() {
            return Err(TunnelError::NotRestartable);
        }

        let result = self.run_inner().await;
        self.cancel.cancel();
        self.set_state(SessionState::Closed);
        info!("session closed");
        result
    }

    async fn run_inner(&self) -> Result<(), TunnelError> {
        self.set_state(SessionState::Connecting);
        self.prepare_adapter().await?;

        let stream = transport::connect(&self.config.server, &self.config.transport).await?;
        info!("connected to {}", self.config.server);

        // The resolved peer address is what gets excluded from the tunnel.
        let server_v4 = match stream.peer_addr() {
            Ok(peer) => match peer.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => {
                    warn!("server has an IPv6 address; not excluded from IPv4 tunnel routes");
                    None
                }
            },
            Err(_) => None,
        };

        self.set_state(SessionState::Handshaking);
        let (read_half, mut write_half) = stream.into_split();

        let hello = protocol::encode_hello(
            &LocaleInfo::detect(),
            self.config.config_data.as_deref(),
        )?;
        write_half.write_all(&hello).await?;
        write_half.flush().await?;
        debug!(bytes = hello.len(), "hello sent");

        // No reply is expected; route setup and forwarding begin at once.
        self.install_routes(server_v4).await;
        self.set_state(SessionState::Forwarding);
        info!("forwarding started");

        // Mirror the token into the observable state.
        {
            let state = Arc::clone(&self.state);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = state.compare_exchange(
                    SessionState::Forwarding as u8,
                    SessionState::Stopping as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            });
        }

        let uplink = {
            let adapter = Arc::clone(&self.adapter);
            let cancel = self.cancel.clone();
            let poll = self.config.read_poll_interval;
            tokio::spawn(async move {
                let result = uplink_loop(adapter, write_half, &cancel, poll).await;
                cancel.cancel();
                result
            })
        };
        let downlink = {
            let adapter = Arc::clone(&self.adapter);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let result = downlink_loop(adapter, read_half, &cancel).await;
                cancel.cancel();
                result
            })
        };

        // Both halves of the connection are owned by the loop tasks, so the
        // transport is released as soon as both have exited.
        let (up, down) = tokio::join!(uplink, downlink);
        let mut first_error = None;
        for (direction, joined) in [("adapter->transport", up), ("transport->adapter", down)] {
            match joined {
                Ok(Ok(())) => debug!("{direction} loop exited cleanly"),
                Ok(Err(e)) => {
                    warn!("{direction} loop failed: {e}");
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!("{direction} task aborted: {e}"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Program the adapter for the session: IPv4 MTU, the client address,
    /// and no stray auto-configured IPv6 addresses.
    async fn prepare_adapter(&self) -> Result<(), TunnelError> {
        self.adapter
            .set_mtu(AddressFamily::V4, TUNNEL_MTU as u32)
            .await?;
        self.adapter
            .assign_ip(
                IpAddr::V4(self.config.client_addr),
                self.config.client_prefix_len,
            )
            .await?;
        for assigned in self.adapter.assigned_addresses(AddressFamily::V6).await? {
            self.adapter.remove_ip(assigned.addr).await?;
        }
        debug!(
            adapter = self.adapter.name(),
            addr = %self.config.client_addr,
            "adapter prepared"
        );
        Ok(())
    }

    /// Compute the exclusion set, plan the tunnel routes and install them.
    /// A rejected block is logged and skipped; it never aborts setup.
    async fn install_routes(&self, server: Option<Ipv4Addr>) {
        let exclusions = ExclusionSet::for_session(
            server,
            &self.config.dns_resolvers,
            &self.config.local_subnets,
        );
        let routes = exclusions.tunnel_routes();
        info!(routes = routes.len(), exclusions = exclusions.blocks().len(), "installing tunnel routes");

        let mut failed = 0usize;
        for route in routes {
            if let Err(e) = self.adapter.add_route(route).await {
                warn!("route {route} not installed: {e}");
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(failed, "some tunnel routes were not installed");
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Adapter-to-transport loop: read packets from the adapter, mask and
/// frame them, write them out immediately.
///
/// A timed-out read yields and retries; an empty packet is the adapter's
/// shutdown sentinel and ends the loop without emitting a frame.
async fn uplink_loop<W>(
    adapter: Arc<dyn TunAdapter>,
    mut transport: W,
    cancel: &CancellationToken,
    poll: Duration,
) -> Result<(), TunnelError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = adapter.read_packet(Some(poll)) => read,
        };

        match read? {
            None => {
                // Nothing pending; give the scheduler a chance and retry.
                tokio::task::yield_now().await;
            }
            Some(packet) if packet.is_empty() => {
                debug!("adapter signalled shutdown");
                return Ok(());
            }
            Some(packet) => {
                let wire = frame::encode(&packet)?;
                match write_flush(&mut transport, &wire).await {
                    Ok(()) => trace!(len = packet.len(), "packet relayed to transport"),
                    Err(e) if is_disconnect(&e) => {
                        debug!("transport severed while writing");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

/// Transport-to-adapter loop: decode frames off the stream and hand the
/// unmasked payloads to the adapter in arrival order.
///
/// An oversized declared length is fatal. A zero-length frame is skipped -
/// only the adapter side uses the empty packet as a close signal - and a
/// severed transport ends the loop as normal termination.
async fn downlink_loop<R>(
    adapter: Arc<dyn TunAdapter>,
    mut transport: R,
    cancel: &CancellationToken,
) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(2 * (frame::LENGTH_PREFIX_LEN + TUNNEL_MTU));

    loop {
        while let Some(payload) = frame::decode(&mut buf)? {
            if payload.is_empty() {
                trace!("zero-length frame skipped");
                continue;
            }
            adapter.write_packet(&payload).await?;
            trace!(len = payload.len(), "packet delivered to adapter");
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            read = transport.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("transport closed");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if is_disconnect(&e) => {
                debug!("transport severed while reading");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_flush<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(data).await?;
    writer.flush().await
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Handshaking,
            SessionState::Forwarding,
            SessionState::Stopping,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("192.0.2.1:20240");
        assert_eq!(config.client_addr, Ipv4Addr::new(10, 1, 10, 1));
        assert_eq!(config.client_prefix_len, 24);
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(15));
    }
}
