//! The protocol engine contract the pump is written against.
//!
//! [`kcp_core::KcpEngine`] is the production implementation. Tests swap in
//! instrumented doubles; the pump cannot tell the difference.

use kcp_core::{KcpCoreResult, KcpEngine, Timestamp};

/// Reliable-transport session driven by the pump.
///
/// Implementations are not expected to be reentrant. The pump guarantees no
/// two calls overlap, including calls made from inside an output callback.
pub trait ProtocolEngine {
    /// Decode one inbound datagram. `Err` means it was rejected.
    fn input(&mut self, datagram: &[u8]) -> KcpCoreResult<usize>;

    /// Queue payload for sending. `Err` means the payload was not queued.
    fn send(&mut self, payload: &[u8]) -> KcpCoreResult<usize>;

    /// Copy the next complete message into `buf`. An error for which
    /// [`is_no_data`](kcp_core::KcpCoreError::is_no_data) holds ends a drain.
    fn recv(&mut self, buf: &mut [u8]) -> KcpCoreResult<usize>;

    /// Advance internal timers to `current` milliseconds.
    fn update(&mut self, current: Timestamp);

    /// Emit anything pending through the output callback.
    fn flush(&mut self);

    /// Segments the peer has not acknowledged yet.
    fn waiting_send(&self) -> usize {
        0
    }
}

impl ProtocolEngine for KcpEngine {
    fn input(&mut self, datagram: &[u8]) -> KcpCoreResult<usize> {
        KcpEngine::input(self, datagram)
    }

    fn send(&mut self, payload: &[u8]) -> KcpCoreResult<usize> {
        KcpEngine::send(self, payload)
    }

    fn recv(&mut self, buf: &mut [u8]) -> KcpCoreResult<usize> {
        KcpEngine::recv(self, buf)
    }

    fn update(&mut self, current: Timestamp) {
        KcpEngine::update(self, current)
    }

    fn flush(&mut self) {
        KcpEngine::flush(self)
    }

    fn waiting_send(&self) -> usize {
        KcpEngine::waiting_send(self)
    }
}
