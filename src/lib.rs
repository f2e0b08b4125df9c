//! # kcp-relay
//!
//! Relays a byte stream (normally this process's stdin and stdout) to one
//! remote peer over UDP, with KCP providing ordering, retransmission and
//! flow control.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kcp_relay::{Relay, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::new()
//!         .local_addr("127.0.0.1:6800".parse()?)
//!         .peer_addr("127.0.0.1:6801".parse()?)
//!         .fast_mode();
//!
//!     let relay = Relay::bind_stdio(config).await?;
//!     let metrics = relay.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await?;
//!     eprintln!("{}", kcp_relay::metrics::format_metrics(&metrics));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   stdin ──► reader task ──(mpsc)──┐
//!                                   ▼
//!   ┌────────────────────────────────────────────┐
//!   │  Pump (one task, owns the engine)          │
//!   │                                            │
//!   │  bridge  ← send / recv, transfer buffer    │
//!   │  tick    ← update + flush every interval   │
//!   │  engine  ← kcp_core::KcpEngine             │
//!   └────────────────────────────────────────────┘
//!          │ output callback        ▲ recv_from
//!          ▼                        │
//!   ┌────────────────────────────────────────────┐
//!   │  Transport (UdpTransport)                  │
//!   └────────────────────────────────────────────┘
//! ```
//!
//! ## Environment
//!
//! The binary reads its configuration from `KCP_*` variables:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `KCP_SRC` | `127.0.0.1:6800` | local bind address |
//! | `KCP_DST` | `127.0.0.1:6801` | peer address |
//! | `KCP_CONV` | `69` | conversation id |
//! | `KCP_TOKEN` | `420` | session token, logged only |
//! | `KCP_TICK_MS` | `100` | maintenance period |
//! | `KCP_MODE` | `normal` | `normal`, `fast` or `turbo` |
//! | `KCP_STREAM` | `false` | stream mode |
//! | `KCP_STRICT_PEER` | `false` | drop datagrams not from `KCP_DST` |
//! | `KCP_SEND_FULL` | `backpressure` | `backpressure` or `drop` |
//! | `KCP_LINGER_MS` | `0` | wait for acks on shutdown |
//!
//! Logging goes to stderr and is filtered with `RUST_LOG`.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pump;
pub mod relay;
pub mod tick;
pub mod transport;

pub use kcp_core;

pub use config::{RelayConfig, SendFullPolicy};
pub use engine::ProtocolEngine;
pub use error::{RelayError, Result};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use pump::Pump;
pub use relay::Relay;
pub use transport::{DatagramSink, Transport, UdpTransport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
