//! Shared helpers for relay integration tests.

#![allow(dead_code)]

use kcp_core::{KcpCoreError, KcpCoreResult, Timestamp};
use kcp_relay::{ProtocolEngine, Transport};

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

// ── Instrumented engine ────────────────────────────────────────────────

/// Counters shared between a test and an [`Instrumented`] engine.
#[derive(Debug, Default)]
pub struct Probe {
    in_call: AtomicBool,
    pub overlaps: AtomicUsize,
    pub inputs: AtomicUsize,
    pub sends: AtomicUsize,
    pub recvs: AtomicUsize,
    pub updates: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl Probe {
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn enter(&self, counter: &AtomicUsize) -> CallGuard<'_> {
        if self.in_call.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        counter.fetch_add(1, Ordering::SeqCst);
        CallGuard(self)
    }
}

struct CallGuard<'a>(&'a Probe);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.in_call.store(false, Ordering::SeqCst);
    }
}

/// Wraps an engine and records every call, flagging any that overlap.
pub struct Instrumented<E> {
    inner: E,
    probe: Arc<Probe>,
}

impl<E> Instrumented<E> {
    pub fn new(inner: E) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                inner,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl<E: ProtocolEngine> ProtocolEngine for Instrumented<E> {
    fn input(&mut self, datagram: &[u8]) -> KcpCoreResult<usize> {
        let _guard = self.probe.enter(&self.probe.inputs);
        self.inner.input(datagram)
    }

    fn send(&mut self, payload: &[u8]) -> KcpCoreResult<usize> {
        let _guard = self.probe.enter(&self.probe.sends);
        self.inner.send(payload)
    }

    fn recv(&mut self, buf: &mut [u8]) -> KcpCoreResult<usize> {
        let _guard = self.probe.enter(&self.probe.recvs);
        self.inner.recv(buf)
    }

    fn update(&mut self, current: Timestamp) {
        let _guard = self.probe.enter(&self.probe.updates);
        self.inner.update(current)
    }

    fn flush(&mut self) {
        let _guard = self.probe.enter(&self.probe.flushes);
        self.inner.flush()
    }

    fn waiting_send(&self) -> usize {
        self.inner.waiting_send()
    }
}

// ── Scripted engine ────────────────────────────────────────────────────

/// Engine double with a scripted receive queue.
///
/// Datagrams starting with `0xFF` are rejected; everything else is accepted.
#[derive(Debug, Default)]
pub struct Scripted {
    pub inbox: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
    pub inputs: Vec<Vec<u8>>,
    pub updates: usize,
    /// When set, every `send` fails with this error.
    pub refuse: Option<KcpCoreError>,
}

impl Scripted {
    pub fn with_messages<I, M>(messages: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Vec<u8>>,
    {
        Self {
            inbox: messages.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

impl ProtocolEngine for Scripted {
    fn input(&mut self, datagram: &[u8]) -> KcpCoreResult<usize> {
        if datagram.first() == Some(&0xFF) {
            return Err(KcpCoreError::protocol("scripted rejection"));
        }
        self.inputs.push(datagram.to_vec());
        Ok(datagram.len())
    }

    fn send(&mut self, payload: &[u8]) -> KcpCoreResult<usize> {
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        self.sent.push(payload.to_vec());
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
        let next = self.inbox.pop_front().unwrap();
        buf[..next.len()].copy_from_slice(&next);
        Ok(next.len())
    }

    fn update(&mut self, _current: Timestamp) {
        self.updates += 1;
    }

    fn flush(&mut self) {}
}

// ── Output collection ──────────────────────────────────────────────────

/// Datagrams captured from a `KcpEngine` output callback.
pub type Outbox = Arc<Mutex<Vec<Vec<u8>>>>;

pub fn collecting_output() -> (kcp_core::OutputFn, Outbox) {
    let outbox: Outbox = Arc::new(Mutex::new(Vec::new()));
    let sink = outbox.clone();
    let output: kcp_core::OutputFn = Box::new(move |data: &[u8]| {
        sink.lock().unwrap().push(data.to_vec());
    });
    (output, outbox)
}

pub fn take_output(outbox: &Outbox) -> Vec<Vec<u8>> {
    std::mem::take(&mut *outbox.lock().unwrap())
}

// ── In-memory transport ────────────────────────────────────────────────

type Datagram = (Vec<u8>, SocketAddr);

/// Lossless in-memory datagram transport.
pub struct MemoryTransport {
    addr: SocketAddr,
    peer_inbox: mpsc::UnboundedSender<Datagram>,
    own_inbox: mpsc::UnboundedSender<Datagram>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    pub sent: AtomicUsize,
    /// When set, `try_send_to` fails as if the socket refused the write.
    pub fail_sends: AtomicBool,
}

impl MemoryTransport {
    /// Two transports wired to each other.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let left = Self {
            addr: a,
            peer_inbox: b_tx.clone(),
            own_inbox: a_tx.clone(),
            inbox: tokio::sync::Mutex::new(a_rx),
            sent: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        };
        let right = Self {
            addr: b,
            peer_inbox: a_tx,
            own_inbox: b_tx,
            inbox: tokio::sync::Mutex::new(b_rx),
            sent: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        };
        (left, right)
    }

    /// Deliver `datagram` to this transport as if sent from `from`.
    pub fn inject(&self, datagram: &[u8], from: SocketAddr) {
        let _ = self.own_inbox.send((datagram.to_vec(), from));
    }
}

impl Transport for MemoryTransport {
    type Addr = SocketAddr;

    fn try_send_to(&self, buf: &[u8], _target: &SocketAddr) -> io::Result<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        self.peer_inbox
            .send((buf.to_vec(), self.addr))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

// ── Failing local output ───────────────────────────────────────────────

/// Local output whose first `failures` writes fail; later writes succeed.
#[derive(Debug, Default)]
pub struct FlakyWriter {
    pub failures: usize,
    pub written: Vec<u8>,
}

impl AsyncWrite for FlakyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.failures > 0 {
            self.failures -= 1;
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
