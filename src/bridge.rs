//! Local stream bridge.
//!
//! Moves bytes between the local byte streams and the engine: input chunks
//! go into `send`, reassembled messages come out of `recv` and are written
//! to local output in the order the engine yields them.

use crate::config::SendFullPolicy;
use crate::engine::ProtocolEngine;
use crate::metrics::RelayMetrics;

use bytes::{Bytes, BytesMut};
use kcp_core::KcpCoreError;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Owns local output and the chunks still waiting for room in the engine.
pub struct LocalBridge<W> {
    output: W,
    transfer: Vec<u8>,
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    max_pending_bytes: usize,
    policy: SendFullPolicy,
    metrics: Arc<RelayMetrics>,
}

impl<W: AsyncWrite + Unpin> LocalBridge<W> {
    pub fn new(
        output: W,
        transfer_buffer_size: usize,
        max_pending_bytes: usize,
        policy: SendFullPolicy,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            output,
            transfer: vec![0u8; transfer_buffer_size],
            pending: VecDeque::new(),
            pending_bytes: 0,
            max_pending_bytes,
            policy,
            metrics,
        }
    }

    /// Hand one local input chunk to the engine.
    ///
    /// Returns the number of chunks the engine accepted, which can exceed
    /// one when earlier deferred chunks go through first.
    pub fn submit<E: ProtocolEngine + ?Sized>(&mut self, engine: &mut E, chunk: Bytes) -> usize {
        if chunk.is_empty() {
            return 0;
        }

        self.pending_bytes += chunk.len();
        self.pending.push_back(chunk);
        let queued = self.flush_pending(engine);

        // Whatever is left includes the chunk just pushed
        if !self.pending.is_empty() {
            RelayMetrics::incr(&self.metrics.chunks_deferred);
            debug!(
                pending_chunks = self.pending.len(),
                pending_bytes = self.pending_bytes,
                "Send queue full, deferring local input"
            );
        }
        queued
    }

    /// Retry deferred chunks in arrival order until the engine pushes back.
    pub fn flush_pending<E: ProtocolEngine + ?Sized>(&mut self, engine: &mut E) -> usize {
        let mut queued = 0;
        while let Some(chunk) = self.pending.front() {
            match engine.send(chunk) {
                Ok(_) => {
                    RelayMetrics::add(&self.metrics.input_bytes, chunk.len());
                    trace!(bytes = chunk.len(), "Queued local input");
                    self.pop_pending();
                    queued += 1;
                }
                Err(e) if e.is_send_full() && self.policy == SendFullPolicy::Backpressure => {
                    break;
                }
                Err(e) => {
                    warn!(bytes = chunk.len(), error = %e, "Engine refused local input, dropping chunk");
                    RelayMetrics::incr(&self.metrics.chunks_dropped);
                    self.pop_pending();
                }
            }
        }
        queued
    }

    fn pop_pending(&mut self) {
        if let Some(chunk) = self.pending.pop_front() {
            self.pending_bytes -= chunk.len();
        }
    }

    /// Whether another local chunk may be read.
    pub fn accepting(&self) -> bool {
        self.pending_bytes < self.max_pending_bytes
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Move every complete message out of the engine into local output.
    ///
    /// Returns the number of messages delivered.
    pub async fn drain<E: ProtocolEngine + ?Sized>(&mut self, engine: &mut E) -> usize {
        let mut delivered = 0;
        loop {
            match engine.recv(&mut self.transfer) {
                Ok(0) => continue,
                Ok(n) => {
                    delivered += 1;
                    self.deliver(n).await;
                }
                Err(KcpCoreError::BufferTooSmall { needed, available })
                    if needed > self.transfer.len() =>
                {
                    debug!(needed, available, "Growing transfer buffer");
                    self.transfer.resize(needed, 0);
                }
                Err(e) if e.is_no_data() => break,
                Err(e) => {
                    warn!(error = %e, "Engine recv failed");
                    break;
                }
            }
        }
        delivered
    }

    async fn deliver(&mut self, len: usize) {
        let message = &self.transfer[..len];
        let result = match self.output.write_all(message).await {
            Ok(()) => self.output.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                RelayMetrics::incr(&self.metrics.messages_delivered);
                RelayMetrics::add(&self.metrics.output_bytes, len);
                trace!(bytes = len, "Delivered message to local output");
            }
            Err(e) => {
                RelayMetrics::incr(&self.metrics.output_errors);
                warn!(bytes = len, error = %e, "Local output write failed");
            }
        }
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut W {
        &mut self.output
    }

    pub fn transfer_capacity(&self) -> usize {
        self.transfer.len()
    }
}

/// Read local input in chunks of up to `chunk_size` bytes and forward them.
///
/// Returns at end of input, on a read error, or once the receiving side is
/// gone. End of input only stops this reader; the relay keeps running.
pub async fn read_local_input<R>(mut reader: R, tx: mpsc::Sender<Bytes>, chunk_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk_size);
    loop {
        buf.reserve(chunk_size);
        let mut limited = (&mut reader).take(chunk_size as u64);
        match limited.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("Local input reached end of stream");
                return;
            }
            Ok(n) => {
                trace!(bytes = n, "Read local input");
                if tx.send(buf.split().freeze()).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Local input read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcp_core::{KcpCoreResult, Timestamp};

    /// Hands out scripted messages and accepts a fixed number of sends.
    struct Scripted {
        inbox: VecDeque<Vec<u8>>,
        accepted: Vec<Vec<u8>>,
        room: usize,
    }

    impl Scripted {
        fn new(room: usize) -> Self {
            Self {
                inbox: VecDeque::new(),
                accepted: Vec::new(),
                room,
            }
        }
    }

    impl ProtocolEngine for Scripted {
        fn input(&mut self, datagram: &[u8]) -> KcpCoreResult<usize> {
            Ok(datagram.len())
        }

        fn send(&mut self, payload: &[u8]) -> KcpCoreResult<usize> {
            if self.accepted.len() >= self.room {
                return Err(KcpCoreError::SendQueueFull { limit: self.room });
            }
            self.accepted.push(payload.to_vec());
            Ok(payload.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> KcpCoreResult<usize> {
            let next = self.inbox.front().ok_or(KcpCoreError::RecvQueueEmpty)?;
            if next.len() > buf.len() {
                return Err(KcpCoreError::BufferTooSmall {
                    needed: next.len(),
                    available: buf.len(),
                });
            }
            let next = self.inbox.pop_front().unwrap_or_default();
            buf[..next.len()].copy_from_slice(&next);
            Ok(next.len())
        }

        fn update(&mut self, _current: Timestamp) {}

        fn flush(&mut self) {}
    }

    fn bridge(policy: SendFullPolicy) -> LocalBridge<Vec<u8>> {
        LocalBridge::new(Vec::new(), 8, 1024, policy, Arc::new(RelayMetrics::default()))
    }

    #[tokio::test]
    async fn test_drain_grows_transfer_buffer() {
        let mut engine = Scripted::new(0);
        engine.inbox.push_back(b"short".to_vec());
        engine.inbox.push_back(b"a message longer than eight bytes".to_vec());

        let mut bridge = bridge(SendFullPolicy::Backpressure);
        assert_eq!(bridge.drain(&mut engine).await, 2);
        assert_eq!(
            bridge.output().as_slice(),
            b"shorta message longer than eight bytes"
        );
        assert!(bridge.transfer_capacity() >= 33);
    }

    #[test]
    fn test_backpressure_keeps_order() {
        let mut engine = Scripted::new(1);
        let mut bridge = bridge(SendFullPolicy::Backpressure);

        assert_eq!(bridge.submit(&mut engine, Bytes::from_static(b"one")), 1);
        assert_eq!(bridge.submit(&mut engine, Bytes::from_static(b"two")), 0);
        assert_eq!(bridge.submit(&mut engine, Bytes::from_static(b"three")), 0);
        assert_eq!(bridge.pending_len(), 2);

        engine.room = 3;
        assert_eq!(bridge.flush_pending(&mut engine), 2);
        assert_eq!(bridge.pending_len(), 0);
        assert_eq!(
            engine.accepted,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn test_drop_policy_discards_refused_chunks() {
        let mut engine = Scripted::new(1);
        let mut bridge = bridge(SendFullPolicy::Drop);

        bridge.submit(&mut engine, Bytes::from_static(b"kept"));
        bridge.submit(&mut engine, Bytes::from_static(b"lost"));

        assert_eq!(bridge.pending_len(), 0);
        assert!(bridge.accepting());
        assert_eq!(bridge.metrics.snapshot().chunks_dropped, 1);
        assert_eq!(engine.accepted, vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_pending_limit_stops_accepting() {
        let mut engine = Scripted::new(0);
        let mut bridge = LocalBridge::new(
            Vec::new(),
            8,
            4,
            SendFullPolicy::Backpressure,
            Arc::new(RelayMetrics::default()),
        );

        assert!(bridge.accepting());
        bridge.submit(&mut engine, Bytes::from_static(b"12345"));
        assert!(!bridge.accepting());
    }

    #[tokio::test]
    async fn test_reader_splits_into_chunks() {
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = b"abcdefghij";
        read_local_input(input, tx, 4).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks.concat(), b"abcdefghij");
        assert!(chunks.iter().all(|c| c.len() <= 4));
    }
}
