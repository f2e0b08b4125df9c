//! Session bootstrap and the event loop.
//!
//! A [`Relay`] owns one [`Pump`] and runs it on the calling task. Local
//! input is read on a separate spawned task and reaches the pump over a
//! bounded channel, so the engine itself is only ever touched here.

use crate::bridge::{read_local_input, LocalBridge};
use crate::config::RelayConfig;
use crate::engine::ProtocolEngine;
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::pump::Pump;
use crate::tick::TickDriver;
use crate::transport::{DatagramSink, Transport, UdpTransport};

use bytes::Bytes;
use kcp_core::KcpEngine;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct Relay<E, T: Transport, R, W> {
    pump: Pump<E, T, W>,
    transport: Arc<T>,
    input: R,
    config: RelayConfig,
    metrics: Arc<RelayMetrics>,
}

impl Relay<KcpEngine, UdpTransport, Stdin, Stdout> {
    /// Bind `config.local_addr` and relay this process's stdin and stdout
    /// to `config.peer_addr`.
    pub async fn bind_stdio(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(UdpTransport::bind(config.local_addr).await?);
        let peer = config.peer_addr;
        Ok(Self::kcp_session(
            config,
            transport,
            peer,
            tokio::io::stdin(),
            tokio::io::stdout(),
        ))
    }
}

impl<T, R, W> Relay<KcpEngine, T, R, W>
where
    T: Transport,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    /// Relay `input` and `output` to `peer` over `transport` with a KCP session.
    pub fn new(
        config: RelayConfig,
        transport: Arc<T>,
        peer: T::Addr,
        input: R,
        output: W,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::kcp_session(config, transport, peer, input, output))
    }

    fn kcp_session(
        config: RelayConfig,
        transport: Arc<T>,
        peer: T::Addr,
        input: R,
        output: W,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::default());
        let sink = DatagramSink::new(transport.clone(), peer.clone(), metrics.clone());
        let engine = KcpEngine::new(
            config.conv,
            config.token,
            config.kcp.clone(),
            sink.into_output(),
        );
        Self::assemble(config, engine, transport, peer, input, output, metrics)
    }
}

impl<E, T, R, W> Relay<E, T, R, W>
where
    E: ProtocolEngine,
    T: Transport,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    /// Relay with a caller-built engine.
    ///
    /// The engine's output callback should write to `transport`, usually
    /// through a [`DatagramSink`] sharing `metrics`.
    pub fn with_engine(
        config: RelayConfig,
        engine: E,
        transport: Arc<T>,
        peer: T::Addr,
        input: R,
        output: W,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, engine, transport, peer, input, output, metrics))
    }

    /// Wire up an already validated configuration.
    fn assemble(
        config: RelayConfig,
        engine: E,
        transport: Arc<T>,
        peer: T::Addr,
        input: R,
        output: W,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let bridge = LocalBridge::new(
            output,
            config.transfer_buffer_size,
            config.max_pending_bytes,
            config.send_full_policy,
            metrics.clone(),
        );
        let pump = Pump::new(
            engine,
            bridge,
            TickDriver::new(config.tick_interval),
            peer,
            config.strict_peer,
            metrics.clone(),
        );
        Self {
            pump,
            transport,
            input,
            config,
            metrics,
        }
    }

    pub fn local_addr(&self) -> Result<T::Addr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<MetricsSnapshot> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then linger up to `config.linger`
    /// while sent data is still unacknowledged.
    pub async fn run_until<F>(self, shutdown: F) -> Result<MetricsSnapshot>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut pump,
            transport,
            input,
            config,
            metrics,
        } = self;

        info!(
            local = %transport.local_addr()?,
            conv = config.conv,
            token = config.token,
            tick_ms = config.tick_interval.as_millis() as u64,
            "Relay started"
        );

        let (input_tx, mut input_rx) = mpsc::channel(config.input_channel_capacity);
        let reader = tokio::spawn(read_local_input(input, input_tx, config.read_chunk_size));

        let mut datagram = vec![0u8; config.datagram_buffer_size];
        let mut input_open = true;
        let mut input_first = true;
        let mut linger_until: Option<Instant> = None;
        tokio::pin!(shutdown);

        loop {
            if linger_until.is_some() && !pump.has_unsent() {
                debug!("Unsent data flushed, stopping");
                break;
            }

            let input_ready = input_open && linger_until.is_none() && pump.accepting_input();

            tokio::select! {
                biased;

                _ = &mut shutdown, if linger_until.is_none() => {
                    if config.linger.is_zero() || !pump.has_unsent() {
                        info!("Shutdown requested");
                        break;
                    }
                    info!(
                        linger_ms = config.linger.as_millis() as u64,
                        "Shutdown requested, waiting for unacknowledged data"
                    );
                    linger_until = Some(Instant::now() + config.linger);
                }

                _ = tokio::time::sleep_until(linger_until.unwrap_or_else(Instant::now)),
                    if linger_until.is_some() =>
                {
                    warn!(
                        waiting = pump.engine().waiting_send(),
                        pending = pump.bridge().pending_len(),
                        "Linger expired with data still unacknowledged"
                    );
                    break;
                }

                _ = pump.ticker_mut().tick() => {
                    pump.handle_tick().await;
                }

                wake = next_io(
                    transport.as_ref(),
                    &mut datagram,
                    &mut input_rx,
                    input_ready,
                    input_first,
                ) => match wake {
                    Wake::Datagram(result) => {
                        input_first = true;
                        match result {
                            Ok((n, from)) => pump.handle_datagram(&datagram[..n], &from).await,
                            Err(e) => warn!(error = %e, "Datagram receive failed"),
                        }
                    }
                    Wake::Input(chunk) => {
                        input_first = false;
                        match chunk {
                            Some(chunk) => pump.handle_local_input(chunk).await,
                            None => {
                                info!("Local input closed, still relaying from peer");
                                input_open = false;
                            }
                        }
                    }
                },
            }
        }

        reader.abort();
        let snapshot = metrics.snapshot();
        info!(
            received = snapshot.datagrams_received,
            sent = snapshot.datagrams_sent,
            delivered = snapshot.messages_delivered,
            "Relay stopped"
        );
        Ok(snapshot)
    }
}

/// Which of the two traffic sources woke the loop.
enum Wake<A> {
    Datagram(io::Result<(usize, A)>),
    Input(Option<Bytes>),
}

/// Wait for the next datagram or local chunk.
///
/// When both are ready, `input_first` picks the winner. The caller flips it
/// after every wake so neither source can starve the other.
async fn next_io<T: Transport>(
    transport: &T,
    datagram: &mut [u8],
    input: &mut mpsc::Receiver<Bytes>,
    input_ready: bool,
    input_first: bool,
) -> Wake<T::Addr> {
    if input_first {
        tokio::select! {
            biased;
            chunk = input.recv(), if input_ready => Wake::Input(chunk),
            result = transport.recv_from(datagram) => Wake::Datagram(result),
        }
    } else {
        tokio::select! {
            biased;
            result = transport.recv_from(datagram) => Wake::Datagram(result),
            chunk = input.recv(), if input_ready => Wake::Input(chunk),
        }
    }
}
