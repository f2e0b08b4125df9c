//! Configuration types for the KCP core protocol engine

use crate::protocol::constants;

/// Node delay configuration for different performance modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelayConfig {
    /// Enable no-delay mode
    pub nodelay: bool,
    /// Internal update interval in milliseconds
    pub interval: u32,
    /// Fast resend threshold (duplicate acks), 0 disables fast resend
    pub resend: u32,
    /// Disable congestion control
    pub no_congestion_control: bool,
}

impl NodeDelayConfig {
    /// Defaults of the reference implementation.
    pub fn normal() -> Self {
        Self {
            nodelay: false,
            interval: constants::IKCP_INTERVAL,
            resend: 0,
            no_congestion_control: false,
        }
    }

    /// Fast mode - optimized for low latency
    pub fn fast() -> Self {
        Self {
            nodelay: true,
            interval: 20,
            resend: 2,
            no_congestion_control: false,
        }
    }

    /// Turbo mode - maximum performance, minimum latency
    pub fn turbo() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            resend: 2,
            no_congestion_control: true,
        }
    }

    pub fn custom(nodelay: bool, interval: u32, resend: u32, no_congestion_control: bool) -> Self {
        Self {
            nodelay,
            interval,
            resend,
            no_congestion_control,
        }
    }
}

impl Default for NodeDelayConfig {
    fn default() -> Self {
        Self::normal()
    }
}

/// Protocol-only configuration for the KCP engine.
///
/// Contains only the fields the engine reads, no transport or I/O settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcpCoreConfig {
    /// Maximum transmission unit, i.e. the largest datagram handed to output
    pub mtu: u32,
    /// Send window size
    pub snd_wnd: u32,
    /// Receive window size
    pub rcv_wnd: u32,
    /// Node delay configuration
    pub nodelay: NodeDelayConfig,
    /// Transmissions of a single segment before the link is declared dead
    pub max_retries: u32,
    /// Enable stream mode (no message boundaries)
    pub stream_mode: bool,
    /// Segments `send` may queue before refusing with `SendQueueFull`
    pub send_queue_limit: usize,
}

impl Default for KcpCoreConfig {
    fn default() -> Self {
        Self {
            mtu: constants::IKCP_MTU_DEF,
            snd_wnd: constants::IKCP_WND_SND,
            rcv_wnd: constants::IKCP_WND_RCV,
            nodelay: NodeDelayConfig::normal(),
            max_retries: constants::IKCP_DEADLINK,
            stream_mode: false,
            send_queue_limit: 1024,
        }
    }
}

impl KcpCoreConfig {
    /// Maximum payload bytes per segment.
    pub fn mss(&self) -> u32 {
        self.mtu.saturating_sub(constants::IKCP_OVERHEAD)
    }

    /// Largest payload a single `send` may carry in message mode.
    ///
    /// A message is split into at most `IKCP_WND_RCV - 1` fragments because
    /// the fragment counter must fit the peer's default receive window.
    pub fn max_message_size(&self) -> usize {
        self.mss() as usize * (constants::IKCP_WND_RCV as usize - 1)
    }
}
