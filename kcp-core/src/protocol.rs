//! KCP wire format: constants, segment header, and sequence arithmetic.
//!
//! The layout matches the reference C implementation, so a relay built on
//! this crate interoperates with any other KCP peer using the same
//! conversation id.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// KCP protocol constants
pub mod constants {
    pub const IKCP_RTO_NDL: u32 = 30; // no delay min rto
    pub const IKCP_RTO_MIN: u32 = 100; // normal min rto
    pub const IKCP_RTO_DEF: u32 = 200; // default rto
    pub const IKCP_RTO_MAX: u32 = 60000; // max rto
    pub const IKCP_CMD_PUSH: u8 = 81; // cmd: push data
    pub const IKCP_CMD_ACK: u8 = 82; // cmd: ack
    pub const IKCP_CMD_WASK: u8 = 83; // cmd: window probe (ask)
    pub const IKCP_CMD_WINS: u8 = 84; // cmd: window size (tell)
    pub const IKCP_ASK_SEND: u32 = 1; // need to send IKCP_CMD_WASK
    pub const IKCP_ASK_TELL: u32 = 2; // need to send IKCP_CMD_WINS
    pub const IKCP_WND_SND: u32 = 32; // default send window
    pub const IKCP_WND_RCV: u32 = 128; // default receive window
    pub const IKCP_MTU_DEF: u32 = 1400; // default mtu
    pub const IKCP_INTERVAL: u32 = 100; // default update interval
    pub const IKCP_OVERHEAD: u32 = 24; // kcp header overhead
    pub const IKCP_DEADLINK: u32 = 20; // max dead link count
    pub const IKCP_THRESH_INIT: u32 = 2; // initial slow start threshold
    pub const IKCP_THRESH_MIN: u32 = 2; // min slow start threshold
    pub const IKCP_PROBE_INIT: u32 = 7000; // 7 secs to probe window size
    pub const IKCP_PROBE_LIMIT: u32 = 120000; // up to 120 secs to probe window
    pub const IKCP_FASTACK_LIMIT: u32 = 5; // max times to trigger fastack
}

/// Conversation ID type
pub type ConvId = u32;

/// Sequence number type
pub type SeqNum = u32;

/// Timestamp type (milliseconds on the caller's clock)
pub type Timestamp = u32;

/// KCP segment header structure
#[derive(Debug, Clone, PartialEq)]
pub struct KcpHeader {
    pub conv: ConvId,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: Timestamp,
    pub sn: SeqNum,
    pub una: SeqNum,
    pub len: u32,
}

impl KcpHeader {
    /// Size of KCP header in bytes
    pub const SIZE: usize = 24;

    pub fn new(conv: ConvId, cmd: u8) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            len: 0,
        }
    }

    /// Encode header into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode a header from the front of `buf`, advancing it past the header.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            conv: buf.get_u32_le(),
            cmd: buf.get_u8(),
            frg: buf.get_u8(),
            wnd: buf.get_u16_le(),
            ts: buf.get_u32_le(),
            sn: buf.get_u32_le(),
            una: buf.get_u32_le(),
            len: buf.get_u32_le(),
        })
    }

    /// Whether `cmd` is one of the four commands the protocol defines.
    pub fn has_known_cmd(&self) -> bool {
        matches!(
            self.cmd,
            constants::IKCP_CMD_PUSH
                | constants::IKCP_CMD_ACK
                | constants::IKCP_CMD_WASK
                | constants::IKCP_CMD_WINS
        )
    }

    /// Get command type as string for debugging
    pub fn cmd_str(&self) -> &'static str {
        match self.cmd {
            constants::IKCP_CMD_PUSH => "PUSH",
            constants::IKCP_CMD_ACK => "ACK",
            constants::IKCP_CMD_WASK => "WASK",
            constants::IKCP_CMD_WINS => "WINS",
            _ => "UNKNOWN",
        }
    }
}

/// KCP segment: header, payload, and the sender-side retransmission state.
#[derive(Debug, Clone)]
pub struct KcpSegment {
    pub header: KcpHeader,
    pub data: Bytes,

    pub resendts: Timestamp,
    pub rto: u32,
    pub fastack: u32,
    pub xmit: u32,
}

impl KcpSegment {
    pub fn new(conv: ConvId, cmd: u8, data: Bytes) -> Self {
        let mut header = KcpHeader::new(conv, cmd);
        header.len = data.len() as u32;

        Self {
            header,
            data,
            resendts: 0,
            rto: constants::IKCP_RTO_DEF,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Create a PUSH segment carrying one fragment of a message.
    pub fn push(conv: ConvId, frg: u8, data: Bytes) -> Self {
        let mut seg = Self::new(conv, constants::IKCP_CMD_PUSH, data);
        seg.header.frg = frg;
        seg
    }

    /// Encode header and payload into buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut header = self.header.clone();
        header.len = self.data.len() as u32;
        header.encode(buf);
        buf.extend_from_slice(&self.data);
    }

    /// Get total encoded size
    pub fn size(&self) -> usize {
        KcpHeader::SIZE + self.data.len()
    }
}

/// Counters maintained by [`KcpEngine`](crate::KcpEngine).
#[derive(Debug, Default, Clone, Copy)]
pub struct KcpStats {
    /// Payload bytes accepted by `send`
    pub bytes_sent: u64,
    /// Payload bytes returned by `recv`
    pub bytes_received: u64,
    /// Datagrams handed to the output callback
    pub packets_sent: u64,
    /// Datagrams accepted by `input`
    pub packets_received: u64,
    /// Timeout retransmissions
    pub retransmissions: u64,
    /// Fast retransmissions
    pub fast_retransmissions: u64,
    /// Smoothed RTT in milliseconds
    pub rtt: u32,
    /// RTT variance
    pub rtt_var: u32,
    /// Current RTO
    pub rto: u32,
    /// Congestion window size
    pub cwnd: u32,
    /// Segments in flight
    pub snd_buf_size: u32,
    /// Out-of-order segments held for reassembly
    pub rcv_buf_size: u32,
}

/// Signed difference between two wrapping timestamps.
#[inline]
pub fn time_diff(later: Timestamp, earlier: Timestamp) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Check if a sequence number is before another (handling wrapping)
#[inline]
pub fn seq_before(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Check if a sequence number is after another (handling wrapping)
#[inline]
pub fn seq_after(seq1: SeqNum, seq2: SeqNum) -> bool {
    (seq1.wrapping_sub(seq2) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut header = KcpHeader::new(0x0102_0304, constants::IKCP_CMD_PUSH);
        header.sn = 7;
        header.len = 0;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), KcpHeader::SIZE);
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf[4], constants::IKCP_CMD_PUSH);
        assert_eq!(&buf[12..16], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_decode_rejects_short_input() {
        let mut short = Bytes::from_static(&[0u8; 10]);
        assert!(KcpHeader::decode(&mut short).is_none());
    }

    #[test]
    fn test_sequence_comparison_wraps() {
        assert!(seq_before(u32::MAX, 0));
        assert!(seq_after(0, u32::MAX));
        assert_eq!(time_diff(5, u32::MAX - 4), 10);
    }
}
