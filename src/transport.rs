//! Datagram transport adapter.
//!
//! The [`Transport`] trait lets the relay run over any datagram transport,
//! not just UDP. Receiving is async and driven by the pump's event loop.
//! Sending is synchronous and non-blocking because it happens inside the
//! engine's output callback, in the middle of a `flush`.

use crate::metrics::RelayMetrics;

use kcp_core::OutputFn;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use tracing::{trace, warn};

/// Marker trait for address types used by [`Transport`] implementations.
///
/// Any type satisfying the required bounds automatically implements `Addr`
/// via the blanket impl. This keeps bound lists short elsewhere.
pub trait Addr: Clone + Eq + Hash + Send + Sync + Debug + Display + 'static {}

impl<T: Clone + Eq + Hash + Send + Sync + Debug + Display + 'static> Addr for T {}

/// Datagram transport used by [`Relay`](crate::relay::Relay).
pub trait Transport: Send + Sync + 'static {
    /// The address type used to identify endpoints.
    type Addr: Addr;

    /// Write `buf` as one datagram to `target` without waiting.
    ///
    /// Returns `WouldBlock` rather than blocking when the socket is not
    /// writable.
    fn try_send_to(&self, buf: &[u8], target: &Self::Addr) -> io::Result<usize>;

    /// Receive a datagram into `buf`, returning `(bytes_read, source_address)`.
    ///
    /// Must be cancel safe: the pump drops this future whenever another
    /// event source fires first.
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, Self::Addr)>> + Send + 'a;

    /// Return the local address this transport is bound to.
    fn local_addr(&self) -> io::Result<Self::Addr>;
}

// ---------------------------------------------------------------------------
// UdpTransport: default implementation backed by tokio::net::UdpSocket
// ---------------------------------------------------------------------------

mod udp {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    /// Default [`Transport`] implementation wrapping a `tokio::net::UdpSocket`.
    pub struct UdpTransport {
        socket: UdpSocket,
    }

    impl UdpTransport {
        /// Bind a new UDP socket to `addr`.
        pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> io::Result<Self> {
            let socket = UdpSocket::bind(addr).await?;
            Ok(Self { socket })
        }

        /// Wrap an existing `UdpSocket`.
        pub fn new(socket: UdpSocket) -> Self {
            Self { socket }
        }
    }

    impl Transport for UdpTransport {
        type Addr = SocketAddr;

        fn try_send_to(&self, buf: &[u8], target: &SocketAddr) -> io::Result<usize> {
            self.socket.try_send_to(buf, *target)
        }

        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            self.socket.recv_from(buf).await
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            self.socket.local_addr()
        }
    }
}

pub use udp::UdpTransport;

// ---------------------------------------------------------------------------
// DatagramSink: the engine's output callback
// ---------------------------------------------------------------------------

/// Writes every segment the engine emits to the fixed peer.
pub struct DatagramSink<T: Transport> {
    transport: Arc<T>,
    peer: T::Addr,
    metrics: Arc<RelayMetrics>,
}

impl<T: Transport> DatagramSink<T> {
    pub fn new(transport: Arc<T>, peer: T::Addr, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            transport,
            peer,
            metrics,
        }
    }

    /// Send one segment. Failures are logged and counted, never returned:
    /// the engine retransmits on its own schedule.
    pub fn emit(&self, segment: &[u8]) {
        if segment.is_empty() {
            warn!(peer = %self.peer, "Engine emitted a zero-length segment");
            RelayMetrics::incr(&self.metrics.empty_segments);
            return;
        }

        match self.transport.try_send_to(segment, &self.peer) {
            Ok(written) => {
                RelayMetrics::incr(&self.metrics.datagrams_sent);
                if tracing::enabled!(tracing::Level::TRACE) {
                    trace!(
                        peer = %self.peer,
                        bytes = written,
                        payload = %hex::encode(segment),
                        "Wrote datagram"
                    );
                }
            }
            Err(e) => {
                RelayMetrics::incr(&self.metrics.send_errors);
                warn!(peer = %self.peer, bytes = segment.len(), error = %e, "Datagram send failed");
            }
        }
    }

    /// Box this sink as the engine's output callback.
    pub fn into_output(self) -> OutputFn {
        Box::new(move |segment: &[u8]| self.emit(segment))
    }
}
