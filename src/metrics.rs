//! Per-session counters.
//!
//! The counters are atomics because the engine's output callback, which
//! owns a handle to them, is a separate closure from the pump. Both still
//! run on the pump task.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one relay session
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Datagrams read from the socket
    pub datagrams_received: AtomicU64,
    /// Datagrams the engine refused to decode
    pub datagrams_rejected: AtomicU64,
    /// Datagrams discarded because they did not come from the peer
    pub datagrams_foreign: AtomicU64,
    /// Datagrams written to the socket
    pub datagrams_sent: AtomicU64,
    /// Failed socket writes
    pub send_errors: AtomicU64,
    /// Zero-length segments handed to the output callback
    pub empty_segments: AtomicU64,
    /// Local input bytes accepted by the engine
    pub input_bytes: AtomicU64,
    /// Local input chunks held back because the send queue was full
    pub chunks_deferred: AtomicU64,
    /// Local input chunks discarded
    pub chunks_dropped: AtomicU64,
    /// Messages written to local output
    pub messages_delivered: AtomicU64,
    /// Bytes written to local output
    pub output_bytes: AtomicU64,
    /// Failed local output writes
    pub output_errors: AtomicU64,
    /// Maintenance passes (update + flush)
    pub ticks: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            datagrams_received: load(&self.datagrams_received),
            datagrams_rejected: load(&self.datagrams_rejected),
            datagrams_foreign: load(&self.datagrams_foreign),
            datagrams_sent: load(&self.datagrams_sent),
            send_errors: load(&self.send_errors),
            empty_segments: load(&self.empty_segments),
            input_bytes: load(&self.input_bytes),
            chunks_deferred: load(&self.chunks_deferred),
            chunks_dropped: load(&self.chunks_dropped),
            messages_delivered: load(&self.messages_delivered),
            output_bytes: load(&self.output_bytes),
            output_errors: load(&self.output_errors),
            ticks: load(&self.ticks),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub datagrams_rejected: u64,
    pub datagrams_foreign: u64,
    pub datagrams_sent: u64,
    pub send_errors: u64,
    pub empty_segments: u64,
    pub input_bytes: u64,
    pub chunks_deferred: u64,
    pub chunks_dropped: u64,
    pub messages_delivered: u64,
    pub output_bytes: u64,
    pub output_errors: u64,
    pub ticks: u64,
}

/// Format metrics for human-readable display
pub fn format_metrics(snapshot: &MetricsSnapshot) -> String {
    format!(
        "Relay Metrics:\n\
         Datagrams: {} received ({} rejected, {} foreign), {} sent ({} failed)\n\
         Local input: {} bytes queued, {} chunks deferred, {} dropped\n\
         Local output: {} messages, {} bytes ({} failed writes)\n\
         Ticks: {}",
        snapshot.datagrams_received,
        snapshot.datagrams_rejected,
        snapshot.datagrams_foreign,
        snapshot.datagrams_sent,
        snapshot.send_errors,
        snapshot.input_bytes,
        snapshot.chunks_deferred,
        snapshot.chunks_dropped,
        snapshot.messages_delivered,
        snapshot.output_bytes,
        snapshot.output_errors,
        snapshot.ticks,
    )
}
