//! The pump: the single execution context that owns the engine.
//!
//! Every engine call goes through a `&mut Pump`, so the borrow checker is
//! what keeps `input`, `send`, `recv`, `update` and `flush` from ever
//! overlapping. The output callback runs inside `flush` and never calls
//! back into the engine.

use crate::bridge::LocalBridge;
use crate::engine::ProtocolEngine;
use crate::metrics::RelayMetrics;
use crate::tick::TickDriver;
use crate::transport::Transport;

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{debug, trace, warn};

pub struct Pump<E, T: Transport, W> {
    engine: E,
    bridge: LocalBridge<W>,
    ticker: TickDriver,
    peer: T::Addr,
    strict_peer: bool,
    metrics: Arc<RelayMetrics>,
}

impl<E, T, W> Pump<E, T, W>
where
    E: ProtocolEngine,
    T: Transport,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        engine: E,
        bridge: LocalBridge<W>,
        ticker: TickDriver,
        peer: T::Addr,
        strict_peer: bool,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            engine,
            bridge,
            ticker,
            peer,
            strict_peer,
            metrics,
        }
    }

    /// Feed one datagram from `from` to the engine.
    ///
    /// Rejected datagrams are logged and dropped; maintenance only follows a
    /// datagram the engine accepted.
    pub async fn handle_datagram(&mut self, datagram: &[u8], from: &T::Addr) {
        RelayMetrics::incr(&self.metrics.datagrams_received);
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(
                %from,
                bytes = datagram.len(),
                payload = %hex::encode(datagram),
                "Read datagram"
            );
        }

        if self.strict_peer && *from != self.peer {
            RelayMetrics::incr(&self.metrics.datagrams_foreign);
            debug!(%from, peer = %self.peer, "Ignoring datagram from unexpected source");
            return;
        }

        if let Err(e) = self.engine.input(datagram) {
            RelayMetrics::incr(&self.metrics.datagrams_rejected);
            warn!(%from, bytes = datagram.len(), error = %e, "Discarding malformed datagram");
            return;
        }

        self.maintain().await;
    }

    /// Queue one local input chunk, then run maintenance if anything went in.
    pub async fn handle_local_input(&mut self, chunk: Bytes) {
        if self.bridge.submit(&mut self.engine, chunk) > 0 {
            self.maintain().await;
        }
    }

    /// Periodic tick.
    pub async fn handle_tick(&mut self) {
        self.maintain().await;
    }

    /// Retry deferred input, run `update` + `flush`, then drain `recv`.
    pub async fn maintain(&mut self) {
        self.bridge.flush_pending(&mut self.engine);
        self.ticker.maintain(&mut self.engine);
        RelayMetrics::incr(&self.metrics.ticks);
        self.bridge.drain(&mut self.engine).await;
    }

    pub fn ticker_mut(&mut self) -> &mut TickDriver {
        &mut self.ticker
    }

    /// Whether the pump wants more local input right now.
    pub fn accepting_input(&self) -> bool {
        self.bridge.accepting()
    }

    /// Local input not yet handed to the engine or not yet acknowledged.
    pub fn has_unsent(&self) -> bool {
        self.bridge.pending_len() > 0 || self.engine.waiting_send() > 0
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn bridge(&self) -> &LocalBridge<W> {
        &self.bridge
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    pub fn into_parts(self) -> (E, LocalBridge<W>) {
        (self.engine, self.bridge)
    }
}
