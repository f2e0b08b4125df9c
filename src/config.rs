//! Configuration types for the relay.
//!
//! [`RelayConfig`] wraps the engine's [`KcpCoreConfig`] with the session
//! identity, socket addresses and pump settings. It is built with chained
//! setters, or read from `KCP_*` environment variables by
//! [`RelayConfig::from_env`].

use crate::error::{RelayError, Result};
use kcp_core::{ConvId, KcpCoreConfig};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub use kcp_core::config::NodeDelayConfig;

/// What the bridge does when the engine refuses local input because its
/// send queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFullPolicy {
    /// Hold the chunk, stop reading local input, retry on every tick.
    #[default]
    Backpressure,
    /// Log and discard the chunk.
    Drop,
}

impl FromStr for SendFullPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "backpressure" => Ok(Self::Backpressure),
            "drop" => Ok(Self::Drop),
            other => Err(RelayError::config(format!(
                "unknown send-full policy '{other}', expected 'backpressure' or 'drop'"
            ))),
        }
    }
}

// ── RelayConfig ─────────────────────────────────────────────────────────

/// Full relay configuration: session identity, addresses, pump tuning and
/// the protocol settings forwarded to the engine.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // Session
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub conv: ConvId,
    pub token: u32,

    // Pump
    pub tick_interval: Duration,
    pub transfer_buffer_size: usize,
    pub datagram_buffer_size: usize,
    pub read_chunk_size: usize,
    pub input_channel_capacity: usize,
    pub max_pending_bytes: usize,
    pub send_full_policy: SendFullPolicy,
    pub strict_peer: bool,
    pub linger: Duration,

    // Protocol settings (forwarded to kcp-core engine)
    pub kcp: KcpCoreConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::from(([127, 0, 0, 1], 6800)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 6801)),
            conv: 69,
            token: 420,
            tick_interval: Duration::from_millis(100),
            transfer_buffer_size: 0x20000,
            datagram_buffer_size: 0x20000,
            read_chunk_size: 16 * 1024,
            input_channel_capacity: 16,
            max_pending_bytes: 1024 * 1024,
            send_full_policy: SendFullPolicy::Backpressure,
            strict_peer: false,
            linger: Duration::ZERO,
            kcp: KcpCoreConfig::default(),
        }
    }
}

// ── Builder methods ─────────────────────────────────────────────────────

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Session --

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = addr;
        self
    }

    pub fn conv(mut self, conv: ConvId) -> Self {
        self.conv = conv;
        self
    }

    pub fn token(mut self, token: u32) -> Self {
        self.token = token;
        self
    }

    // -- Pump tuning --

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn transfer_buffer_size(mut self, size: usize) -> Self {
        self.transfer_buffer_size = size;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn max_pending_bytes(mut self, bytes: usize) -> Self {
        self.max_pending_bytes = bytes;
        self
    }

    pub fn send_full_policy(mut self, policy: SendFullPolicy) -> Self {
        self.send_full_policy = policy;
        self
    }

    pub fn strict_peer(mut self, enabled: bool) -> Self {
        self.strict_peer = enabled;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    // -- Protocol tuning --

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.kcp.mtu = mtu;
        self
    }

    pub fn window_size(mut self, snd_wnd: u32, rcv_wnd: u32) -> Self {
        self.kcp.snd_wnd = snd_wnd;
        self.kcp.rcv_wnd = rcv_wnd;
        self
    }

    pub fn normal_mode(mut self) -> Self {
        self.kcp.nodelay = NodeDelayConfig::normal();
        self
    }

    pub fn fast_mode(mut self) -> Self {
        self.kcp.nodelay = NodeDelayConfig::fast();
        self
    }

    pub fn turbo_mode(mut self) -> Self {
        self.kcp.nodelay = NodeDelayConfig::turbo();
        self
    }

    pub fn stream_mode(mut self, enabled: bool) -> Self {
        self.kcp.stream_mode = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.kcp.max_retries = retries;
        self
    }

    pub fn send_queue_limit(mut self, segments: usize) -> Self {
        self.kcp.send_queue_limit = segments;
        self
    }

    // -- Validation --

    pub fn validate(&self) -> Result<()> {
        if self.kcp.mtu < 64 || self.kcp.mtu > 65535 {
            return Err(RelayError::config("MTU must be between 64 and 65535"));
        }
        if self.kcp.snd_wnd == 0 || self.kcp.rcv_wnd == 0 {
            return Err(RelayError::config("Window sizes must be greater than 0"));
        }
        if self.kcp.snd_wnd > u16::MAX as u32 || self.kcp.rcv_wnd > u16::MAX as u32 {
            return Err(RelayError::config("Window sizes must fit the 16-bit wire field"));
        }
        if self.kcp.nodelay.interval == 0 {
            return Err(RelayError::config("Update interval must be greater than 0"));
        }
        if self.kcp.max_retries == 0 {
            return Err(RelayError::config("Max retries must be greater than 0"));
        }
        if self.kcp.send_queue_limit == 0 {
            return Err(RelayError::config("Send queue limit must be greater than 0"));
        }
        if self.tick_interval.is_zero() {
            return Err(RelayError::config("Tick interval must be greater than 0"));
        }
        if self.read_chunk_size == 0 || self.transfer_buffer_size == 0 || self.datagram_buffer_size == 0 {
            return Err(RelayError::config("Buffer sizes must be greater than 0"));
        }
        if self.datagram_buffer_size < self.kcp.mtu as usize {
            return Err(RelayError::config("Datagram buffer must hold at least one MTU"));
        }
        if !self.kcp.stream_mode && self.read_chunk_size > self.kcp.max_message_size() {
            return Err(RelayError::config(format!(
                "Read chunk size {} exceeds the largest message ({} bytes) at MTU {}",
                self.read_chunk_size,
                self.kcp.max_message_size(),
                self.kcp.mtu
            )));
        }
        let chunk_segments = self.read_chunk_size.div_ceil(self.kcp.mss().max(1) as usize);
        if chunk_segments > self.kcp.send_queue_limit {
            return Err(RelayError::config(format!(
                "Read chunk size {} needs {} segments but the send queue holds {}",
                self.read_chunk_size, chunk_segments, self.kcp.send_queue_limit
            )));
        }
        if self.input_channel_capacity == 0 {
            return Err(RelayError::config("Input channel capacity must be greater than 0"));
        }
        if self.send_full_policy == SendFullPolicy::Backpressure && self.max_pending_bytes == 0 {
            return Err(RelayError::config(
                "Backpressure needs a non-zero pending byte limit",
            ));
        }
        Ok(())
    }
}

// ── Environment ─────────────────────────────────────────────────────────

impl RelayConfig {
    /// Defaults overridden by `KCP_*` environment variables.
    ///
    /// `KCP_SRC` and `KCP_DST` are the local and peer addresses; see the
    /// crate docs for the full list.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "KCP_SRC")? {
            config.local_addr = addr;
        }
        if let Some(addr) = parse_var(&lookup, "KCP_DST")? {
            config.peer_addr = addr;
        }
        if let Some(conv) = parse_var(&lookup, "KCP_CONV")? {
            config.conv = conv;
        }
        if let Some(token) = parse_var(&lookup, "KCP_TOKEN")? {
            config.token = token;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "KCP_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(mode) = lookup("KCP_MODE") {
            config = match mode.to_ascii_lowercase().as_str() {
                "normal" => config.normal_mode(),
                "fast" => config.fast_mode(),
                "turbo" => config.turbo_mode(),
                other => {
                    return Err(RelayError::config(format!(
                        "unknown KCP_MODE '{other}', expected normal, fast or turbo"
                    )))
                }
            };
        }
        if let Some(stream) = parse_var(&lookup, "KCP_STREAM")? {
            config.kcp.stream_mode = stream;
        }
        if let Some(strict) = parse_var(&lookup, "KCP_STRICT_PEER")? {
            config.strict_peer = strict;
        }
        if let Some(policy) = parse_var(&lookup, "KCP_SEND_FULL")? {
            config.send_full_policy = policy;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "KCP_LINGER_MS")? {
            config.linger = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RelayError::config(format!("invalid {key}='{raw}': {e}"))),
    }
}
