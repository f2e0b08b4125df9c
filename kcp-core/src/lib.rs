//! Pure synchronous KCP protocol engine.
//!
//! This crate implements the core KCP ARQ protocol with no runtime
//! dependencies: no tokio, no async, no I/O, no wall clock. The caller feeds
//! datagrams in with [`KcpEngine::input`], drives timers with
//! [`KcpEngine::update`], and receives outbound datagrams through the output
//! callback registered at construction.
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  kcp-core                   │
//! │                             │
//! │  protocol  ← wire types     │
//! │  config    ← tuning         │
//! │  error     ← error variants │
//! │  engine    ← state machine  │
//! └─────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;

pub use config::{KcpCoreConfig, NodeDelayConfig};
pub use engine::{KcpEngine, OutputFn};
pub use error::{KcpCoreError, KcpCoreResult};
pub use protocol::*;
