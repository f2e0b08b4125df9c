//! Synchronous KCP state machine.
//!
//! The engine never reads a clock and never touches a socket. Time arrives
//! through [`KcpEngine::update`], inbound datagrams through
//! [`KcpEngine::input`], and every outbound datagram leaves through the
//! [`OutputFn`] given to [`KcpEngine::new`], invoked synchronously from
//! inside [`KcpEngine::flush`]. The engine is not reentrant: the caller owns
//! it exclusively and must not call back into it from the output callback.

use crate::config::KcpCoreConfig;
use crate::error::{KcpCoreError, KcpCoreResult};
use crate::protocol::*;

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Output callback receiving each encoded datagram.
pub type OutputFn = Box<dyn FnMut(&[u8]) + Send>;

/// RTT calculation state
#[derive(Debug)]
struct RttState {
    srtt: u32,
    rttval: u32,
    rto: u32,
    min_rto: u32,
}

/// Window control state
#[derive(Debug)]
struct WindowState {
    snd: u32,      // Send window size
    rcv: u32,      // Receive window size
    rmt: u32,      // Remote window size
    cwnd: u32,     // Congestion window
    ssthresh: u32, // Slow start threshold
    incr: u32,     // Increment for congestion avoidance
}

/// Probe state for window probing
#[derive(Debug, Default)]
struct ProbeState {
    flags: u32,
    wait: u32,
    ts: Timestamp,
}

/// Batches encoded segments into datagrams no larger than the MTU.
struct OutputBuffer {
    buf: BytesMut,
    mtu: usize,
    output: OutputFn,
    packets: u64,
}

impl OutputBuffer {
    fn new(mtu: usize, output: OutputFn) -> Self {
        Self {
            buf: BytesMut::with_capacity(mtu * 3),
            mtu,
            output,
            packets: 0,
        }
    }

    fn push(&mut self, segment: &KcpSegment) {
        if !self.buf.is_empty() && self.buf.len() + segment.size() > self.mtu {
            self.emit();
        }
        segment.encode(&mut self.buf);
    }

    fn emit(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        (self.output)(&self.buf);
        self.buf.clear();
        self.packets += 1;
    }
}

/// KCP engine implementing the core protocol logic
pub struct KcpEngine {
    conv: ConvId,
    token: u32,
    config: KcpCoreConfig,
    mss: u32,

    // Sequence numbers
    snd_una: SeqNum,
    snd_nxt: SeqNum,
    rcv_nxt: SeqNum,

    // Clock
    current: Timestamp,
    ts_flush: Timestamp,
    updated: bool,

    rtt: RttState,
    wnd: WindowState,
    probe: ProbeState,

    // Buffers
    snd_queue: VecDeque<KcpSegment>,
    rcv_queue: VecDeque<KcpSegment>,
    snd_buf: VecDeque<KcpSegment>,
    rcv_buf: VecDeque<KcpSegment>,
    ack_list: Vec<(SeqNum, Timestamp)>,

    out: OutputBuffer,
    stats: KcpStats,
    dead: bool,
}

impl KcpEngine {
    /// Create an engine for conversation `conv`.
    ///
    /// `token` is an opaque caller context carried for diagnostics. `output`
    /// receives every datagram the engine emits.
    pub fn new(conv: ConvId, token: u32, config: KcpCoreConfig, output: OutputFn) -> Self {
        let min_rto = if config.nodelay.nodelay {
            constants::IKCP_RTO_NDL
        } else {
            constants::IKCP_RTO_MIN
        };
        let mss = config.mss();

        Self {
            conv,
            token,
            mss,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,

            current: 0,
            ts_flush: 0,
            updated: false,

            rtt: RttState {
                srtt: 0,
                rttval: 0,
                rto: constants::IKCP_RTO_DEF,
                min_rto,
            },

            wnd: WindowState {
                snd: config.snd_wnd,
                rcv: config.rcv_wnd,
                rmt: constants::IKCP_WND_RCV,
                cwnd: 1,
                ssthresh: constants::IKCP_THRESH_INIT,
                incr: mss,
            },

            probe: ProbeState::default(),

            snd_queue: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            ack_list: Vec::new(),

            out: OutputBuffer::new(config.mtu as usize, output),
            stats: KcpStats::default(),
            dead: false,

            config,
        }
    }

    pub fn conv(&self) -> ConvId {
        self.conv
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    pub fn config(&self) -> &KcpCoreConfig {
        &self.config
    }

    /// True once a segment has been transmitted `max_retries` times.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Segments queued or in flight that the peer has not acknowledged.
    pub fn waiting_send(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    /// Snapshot of the counters, with live window and RTT values filled in.
    pub fn stats(&self) -> KcpStats {
        KcpStats {
            packets_sent: self.out.packets,
            rtt: self.rtt.srtt,
            rtt_var: self.rtt.rttval,
            rto: self.rtt.rto,
            cwnd: self.wnd.cwnd,
            snd_buf_size: self.snd_buf.len() as u32,
            rcv_buf_size: self.rcv_buf.len() as u32,
            ..self.stats
        }
    }

    /// Queue `data` for sending. Returns the number of bytes accepted.
    ///
    /// In message mode `data` becomes one message, split into fragments of at
    /// most one MSS. In stream mode it may be appended to the last queued
    /// segment instead.
    pub fn send(&mut self, data: &[u8]) -> KcpCoreResult<usize> {
        if self.dead {
            return Err(KcpCoreError::ConnectionLost);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mss = self.mss as usize;
        let room = if self.config.stream_mode {
            self.snd_queue
                .back()
                .map(|last| mss.saturating_sub(last.data.len()))
                .unwrap_or(0)
                .min(data.len())
        } else {
            0
        };

        let count = (data.len() - room).div_ceil(mss);
        if !self.config.stream_mode && count >= constants::IKCP_WND_RCV as usize {
            return Err(KcpCoreError::buffer(format!(
                "message of {} bytes needs {} fragments",
                data.len(),
                count
            )));
        }
        if self.snd_queue.len() + count > self.config.send_queue_limit {
            return Err(KcpCoreError::SendQueueFull {
                limit: self.config.send_queue_limit,
            });
        }

        if room > 0 {
            if let Some(last) = self.snd_queue.back_mut() {
                let mut merged = BytesMut::with_capacity(last.data.len() + room);
                merged.extend_from_slice(&last.data);
                merged.extend_from_slice(&data[..room]);
                last.data = merged.freeze();
            }
        }

        let payload = Bytes::copy_from_slice(&data[room..]);
        for i in 0..count {
            let start = i * mss;
            let end = (start + mss).min(payload.len());
            let frg = if self.config.stream_mode {
                0
            } else {
                (count - i - 1) as u8
            };
            self.snd_queue
                .push_back(KcpSegment::push(self.conv, frg, payload.slice(start..end)));
        }

        self.stats.bytes_sent += data.len() as u64;

        trace!(
            conv = %self.conv,
            bytes = data.len(),
            fragments = count,
            "Data queued for sending"
        );

        Ok(data.len())
    }

    /// Copy the next complete message into `buf`, returning its length.
    ///
    /// Fails with [`KcpCoreError::RecvQueueEmpty`] or
    /// [`KcpCoreError::ExpectingFragment`] when no whole message is ready.
    pub fn recv(&mut self, buf: &mut [u8]) -> KcpCoreResult<usize> {
        if self.rcv_queue.is_empty() {
            return Err(KcpCoreError::RecvQueueEmpty);
        }

        let size = self.peek_size().ok_or(KcpCoreError::ExpectingFragment)?;
        if size > buf.len() {
            return Err(KcpCoreError::BufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }

        let recover = self.rcv_queue.len() >= self.wnd.rcv as usize;

        let mut len = 0;
        while let Some(segment) = self.rcv_queue.pop_front() {
            buf[len..len + segment.data.len()].copy_from_slice(&segment.data);
            len += segment.data.len();
            if segment.header.frg == 0 {
                break;
            }
        }

        self.move_to_recv_queue();

        // Tell the peer the window reopened
        if recover && self.rcv_queue.len() < self.wnd.rcv as usize {
            self.probe.flags |= constants::IKCP_ASK_TELL;
        }

        self.stats.bytes_received += len as u64;
        Ok(len)
    }

    /// Size of the next complete message, if one is ready.
    pub fn peek_size(&self) -> Option<usize> {
        let head = self.rcv_queue.front()?;
        if head.header.frg == 0 {
            return Some(head.data.len());
        }

        if self.rcv_queue.len() < head.header.frg as usize + 1 {
            return None;
        }

        let mut length = 0;
        for segment in &self.rcv_queue {
            length += segment.data.len();
            if segment.header.frg == 0 {
                break;
            }
        }
        Some(length)
    }

    /// Decode one datagram, which may carry several segments.
    ///
    /// Returns the number of bytes consumed. Segments decoded before an
    /// error is found have already been applied.
    pub fn input(&mut self, data: &[u8]) -> KcpCoreResult<usize> {
        if data.len() < KcpHeader::SIZE {
            return Err(KcpCoreError::protocol(format!(
                "datagram of {} bytes is shorter than a header",
                data.len()
            )));
        }

        let prev_una = self.snd_una;
        let mut buf = Bytes::copy_from_slice(data);
        let mut max_ack: Option<SeqNum> = None;

        while let Some(header) = KcpHeader::decode(&mut buf) {
            if header.conv != self.conv {
                return Err(KcpCoreError::ConvMismatch {
                    expected: self.conv,
                    actual: header.conv,
                });
            }
            if buf.len() < header.len as usize {
                return Err(KcpCoreError::protocol(format!(
                    "segment declares {} bytes but {} remain",
                    header.len,
                    buf.len()
                )));
            }
            if !header.has_known_cmd() {
                return Err(KcpCoreError::protocol(format!(
                    "unknown command {}",
                    header.cmd
                )));
            }

            let payload = buf.split_to(header.len as usize);

            self.wnd.rmt = header.wnd as u32;
            self.parse_una(header.una);
            self.shrink_buf();

            let cmd = header.cmd;
            match cmd {
                constants::IKCP_CMD_ACK => {
                    let rtt = time_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.update_ack(rtt as u32);
                    }
                    self.parse_ack(header.sn);
                    self.shrink_buf();

                    max_ack = match max_ack {
                        Some(max) if !seq_after(header.sn, max) => Some(max),
                        _ => Some(header.sn),
                    };
                }
                constants::IKCP_CMD_PUSH => {
                    if seq_before(header.sn, self.rcv_nxt.wrapping_add(self.wnd.rcv)) {
                        self.ack_list.push((header.sn, header.ts));
                        if !seq_before(header.sn, self.rcv_nxt) {
                            let mut segment = KcpSegment::new(self.conv, cmd, payload);
                            segment.header = header;
                            self.parse_data(segment);
                        }
                    }
                }
                constants::IKCP_CMD_WASK => {
                    self.probe.flags |= constants::IKCP_ASK_TELL;
                }
                // WINS only carries the remote window, recorded above
                _ => {}
            }
        }

        if let Some(sn) = max_ack {
            self.parse_fastack(sn);
        }

        if seq_after(self.snd_una, prev_una) {
            self.grow_cwnd();
        }

        self.stats.packets_received += 1;

        trace!(
            conv = %self.conv,
            size = data.len(),
            "Packet processed"
        );

        Ok(data.len())
    }

    /// Advance the engine clock to `current` and flush when the internal
    /// interval has elapsed.
    pub fn update(&mut self, current: Timestamp) {
        self.current = current;

        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut slap = time_diff(current, self.ts_flush);
        if !(-10000..10000).contains(&slap) {
            self.ts_flush = current;
            slap = 0;
        }

        if slap >= 0 {
            let interval = self.config.nodelay.interval;
            self.ts_flush = self.ts_flush.wrapping_add(interval);
            if time_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(interval);
            }
            self.flush();
        }
    }

    /// Emit pending ACKs, window probes, new data and due retransmissions.
    ///
    /// Does nothing until [`update`](Self::update) has been called once.
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }

        let current = self.current;
        let wnd = self.wnd_unused() as u16;
        let una = self.rcv_nxt;

        for &(sn, ts) in &self.ack_list {
            let mut ack = control_segment(self.conv, constants::IKCP_CMD_ACK, wnd, una);
            ack.header.sn = sn;
            ack.header.ts = ts;
            self.out.push(&ack);
        }
        self.ack_list.clear();

        self.schedule_window_probe(current);

        if self.probe.flags & constants::IKCP_ASK_SEND != 0 {
            self.out
                .push(&control_segment(self.conv, constants::IKCP_CMD_WASK, wnd, una));
        }
        if self.probe.flags & constants::IKCP_ASK_TELL != 0 {
            self.out
                .push(&control_segment(self.conv, constants::IKCP_CMD_WINS, wnd, una));
        }
        self.probe.flags = 0;

        self.move_to_send_buf(current, wnd);

        let resent = if self.config.nodelay.resend > 0 {
            self.config.nodelay.resend
        } else {
            u32::MAX
        };
        let rtomin = if self.config.nodelay.nodelay {
            0
        } else {
            self.rtt.rto >> 3
        };

        let mut lost = false;
        let mut change = false;

        for segment in self.snd_buf.iter_mut() {
            let mut needsend = false;

            if segment.xmit == 0 {
                needsend = true;
                segment.xmit = 1;
                segment.rto = self.rtt.rto;
                segment.resendts = current.wrapping_add(segment.rto + rtomin);
            } else if time_diff(current, segment.resendts) >= 0 {
                needsend = true;
                segment.xmit += 1;
                self.stats.retransmissions += 1;
                if self.config.nodelay.nodelay {
                    segment.rto = segment.rto.saturating_add(segment.rto / 2);
                } else {
                    segment.rto = segment.rto.saturating_add(segment.rto.max(self.rtt.rto));
                }
                segment.resendts = current.wrapping_add(segment.rto);
                lost = true;
            } else if segment.fastack >= resent && segment.xmit <= constants::IKCP_FASTACK_LIMIT {
                needsend = true;
                segment.xmit += 1;
                segment.fastack = 0;
                segment.resendts = current.wrapping_add(segment.rto);
                self.stats.fast_retransmissions += 1;
                change = true;
            }

            if needsend {
                segment.header.ts = current;
                segment.header.wnd = wnd;
                segment.header.una = una;
                self.out.push(segment);

                if segment.xmit >= self.config.max_retries && !self.dead {
                    warn!(
                        conv = %self.conv,
                        sn = segment.header.sn,
                        xmit = segment.xmit,
                        "Segment exceeded retransmission limit, link is dead"
                    );
                    self.dead = true;
                }
            }
        }

        self.out.emit();

        if change {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.wnd.ssthresh = (inflight / 2).max(constants::IKCP_THRESH_MIN);
            self.wnd.cwnd = self.wnd.ssthresh.saturating_add(resent);
            self.wnd.incr = self.wnd.cwnd.saturating_mul(self.mss);
        }

        if lost {
            self.wnd.ssthresh = (self.wnd.cwnd / 2).max(constants::IKCP_THRESH_MIN);
            self.reset_cwnd();
        }

        if self.wnd.cwnd < 1 {
            self.reset_cwnd();
        }
    }

    // Private helper methods

    fn schedule_window_probe(&mut self, current: Timestamp) {
        if self.wnd.rmt != 0 {
            self.probe.ts = 0;
            self.probe.wait = 0;
            return;
        }

        if self.probe.wait == 0 {
            self.probe.wait = constants::IKCP_PROBE_INIT;
            self.probe.ts = current.wrapping_add(self.probe.wait);
        } else if time_diff(current, self.probe.ts) >= 0 {
            self.probe.wait = self.probe.wait.max(constants::IKCP_PROBE_INIT);
            self.probe.wait += self.probe.wait / 2;
            self.probe.wait = self.probe.wait.min(constants::IKCP_PROBE_LIMIT);
            self.probe.ts = current.wrapping_add(self.probe.wait);
            self.probe.flags |= constants::IKCP_ASK_SEND;
        }
    }

    fn move_to_send_buf(&mut self, current: Timestamp, wnd: u16) {
        let mut cwnd = self.wnd.snd.min(self.wnd.rmt);
        if !self.config.nodelay.no_congestion_control {
            cwnd = cwnd.min(self.wnd.cwnd);
        }

        while seq_before(self.snd_nxt, self.snd_una.wrapping_add(cwnd)) {
            let Some(mut segment) = self.snd_queue.pop_front() else {
                break;
            };

            segment.header.conv = self.conv;
            segment.header.cmd = constants::IKCP_CMD_PUSH;
            segment.header.wnd = wnd;
            segment.header.ts = current;
            segment.header.sn = self.snd_nxt;
            segment.header.una = self.rcv_nxt;
            segment.resendts = current;
            segment.rto = self.rtt.rto;
            segment.fastack = 0;
            segment.xmit = 0;

            self.snd_buf.push_back(segment);
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
        }
    }

    fn parse_una(&mut self, una: SeqNum) {
        while let Some(segment) = self.snd_buf.front() {
            if seq_before(segment.header.sn, una) {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    fn parse_ack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        if let Some(pos) = self.snd_buf.iter().position(|seg| seg.header.sn == sn) {
            self.snd_buf.remove(pos);
        }
    }

    fn parse_fastack(&mut self, sn: SeqNum) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }

        for segment in &mut self.snd_buf {
            if seq_before(sn, segment.header.sn) {
                break;
            } else if segment.header.sn != sn {
                segment.fastack += 1;
            }
        }
    }

    fn parse_data(&mut self, newseg: KcpSegment) {
        let sn = newseg.header.sn;

        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.wnd.rcv)) || seq_before(sn, self.rcv_nxt) {
            return;
        }

        let mut insert_at = 0;
        let mut repeat = false;
        for (i, segment) in self.rcv_buf.iter().enumerate().rev() {
            if segment.header.sn == sn {
                repeat = true;
                break;
            }
            if seq_after(sn, segment.header.sn) {
                insert_at = i + 1;
                break;
            }
        }

        if !repeat {
            self.rcv_buf.insert(insert_at, newseg);
        }

        self.move_to_recv_queue();
    }

    fn move_to_recv_queue(&mut self) {
        while let Some(segment) = self.rcv_buf.front() {
            if segment.header.sn != self.rcv_nxt || self.rcv_queue.len() >= self.wnd.rcv as usize {
                break;
            }
            if let Some(segment) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(segment);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    fn update_ack(&mut self, rtt: u32) {
        let rtt = rtt.min(constants::IKCP_RTO_MAX);

        if self.rtt.srtt == 0 {
            self.rtt.srtt = rtt;
            self.rtt.rttval = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.rtt.srtt);
            self.rtt.rttval = (3 * self.rtt.rttval + delta) / 4;
            self.rtt.srtt = ((7 * self.rtt.srtt + rtt) / 8).max(1);
        }

        let rto = self.rtt.srtt + self.config.nodelay.interval.max(4 * self.rtt.rttval);
        self.rtt.rto = rto.clamp(self.rtt.min_rto, constants::IKCP_RTO_MAX);
    }

    fn grow_cwnd(&mut self) {
        if self.wnd.cwnd >= self.wnd.rmt {
            return;
        }

        let mss = self.mss.max(1);
        if self.wnd.cwnd < self.wnd.ssthresh {
            self.wnd.cwnd += 1;
            self.wnd.incr += mss;
        } else {
            if self.wnd.incr < mss {
                self.wnd.incr = mss;
            }
            self.wnd.incr += (mss * mss) / self.wnd.incr + (mss / 16);
            if (self.wnd.cwnd + 1) * mss <= self.wnd.incr {
                self.wnd.cwnd = self.wnd.incr.div_ceil(mss);
            }
        }

        if self.wnd.cwnd > self.wnd.rmt {
            self.wnd.cwnd = self.wnd.rmt;
            self.wnd.incr = self.wnd.rmt * mss;
        }
    }

    fn shrink_buf(&mut self) {
        self.snd_una = match self.snd_buf.front() {
            Some(segment) => segment.header.sn,
            None => self.snd_nxt,
        };
    }

    fn wnd_unused(&self) -> u32 {
        (self.wnd.rcv as usize).saturating_sub(self.rcv_queue.len()) as u32
    }

    #[inline]
    fn reset_cwnd(&mut self) {
        self.wnd.cwnd = 1;
        self.wnd.incr = self.mss;
    }
}

/// ACK and probe segments share everything but the command.
fn control_segment(conv: ConvId, cmd: u8, wnd: u16, una: SeqNum) -> KcpSegment {
    let mut segment = KcpSegment::new(conv, cmd, Bytes::new());
    segment.header.wnd = wnd;
    segment.header.una = una;
    segment
}
