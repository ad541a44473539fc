//! Wire segment and codec.
//!
//! A segment is one unit on the wire: a fixed 24-byte little-endian header
//! followed by the payload. Several segments may be coalesced into a single
//! datagram, so [`Segment::decode`] returns the unconsumed remainder.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{CMD_ACK, CMD_DATA, CMD_WND_ASK, CMD_WND_TELL, HEADER_LEN};
use crate::error::SegmentError;

/// Segment command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Carries application payload.
    Data,
    /// Acknowledges one sequence number; `ts` echoes the sender's timestamp.
    Ack,
    /// Asks the peer to report its receive window.
    WindowAsk,
    /// Reports the receive window (the header `wnd` field carries it).
    WindowTell,
}

impl Command {
    fn from_wire(byte: u8) -> Result<Self, SegmentError> {
        match byte {
            CMD_DATA => Ok(Command::Data),
            CMD_ACK => Ok(Command::Ack),
            CMD_WND_ASK => Ok(Command::WindowAsk),
            CMD_WND_TELL => Ok(Command::WindowTell),
            other => Err(SegmentError::UnknownCommand(other)),
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Command::Data => CMD_DATA,
            Command::Ack => CMD_ACK,
            Command::WindowAsk => CMD_WND_ASK,
            Command::WindowTell => CMD_WND_TELL,
        }
    }
}

/// One wire segment plus sender-side retransmit bookkeeping.
///
/// The bookkeeping fields (`resend_at`, `rto`, `fast_acks`, `transmits`) are
/// never serialized; they only exist while the segment sits in the send
/// window.
#[derive(Debug, Clone)]
pub struct Segment {
    pub conv: u32,
    pub cmd: Command,
    /// Fragment index, counting down to 0 for the final fragment.
    pub frg: u8,
    /// Receive window advertised by the sender.
    pub wnd: u16,
    /// Sender clock at transmit time; echoed back in ACKs for RTT sampling.
    pub ts: u32,
    pub sn: u32,
    /// Cumulative-ack watermark: all sequence numbers below are acked.
    pub una: u32,
    pub payload: Bytes,

    // Send-window state, host only.
    pub resend_at: u32,
    pub rto: u32,
    pub fast_acks: u32,
    pub transmits: u32,
}

impl Segment {
    /// New segment with zeroed bookkeeping.
    pub fn new(conv: u32, cmd: Command) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            payload: Bytes::new(),
            resend_at: 0,
            rto: 0,
            fast_acks: 0,
            transmits: 0,
        }
    }

    /// Bytes this segment occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Appends the encoded segment to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_u32_le(self.conv);
        dst.put_u8(self.cmd.to_wire());
        dst.put_u8(self.frg);
        dst.put_u16_le(self.wnd);
        dst.put_u32_le(self.ts);
        dst.put_u32_le(self.sn);
        dst.put_u32_le(self.una);
        dst.put_u32_le(self.payload.len() as u32);
        dst.put_slice(&self.payload);
    }

    /// Parses one segment from the front of `buf`, returning it together
    /// with the remaining bytes.
    pub fn decode(buf: &[u8]) -> Result<(Segment, &[u8]), SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated);
        }

        let mut header = &buf[..HEADER_LEN];
        let conv = header.get_u32_le();
        let cmd = Command::from_wire(header.get_u8())?;
        let frg = header.get_u8();
        let wnd = header.get_u16_le();
        let ts = header.get_u32_le();
        let sn = header.get_u32_le();
        let una = header.get_u32_le();
        let len = header.get_u32_le() as usize;

        let rest = &buf[HEADER_LEN..];
        if rest.len() < len {
            return Err(SegmentError::PayloadTruncated);
        }

        let mut seg = Segment::new(conv, cmd);
        seg.frg = frg;
        seg.wnd = wnd;
        seg.ts = ts;
        seg.sn = sn;
        seg.una = una;
        seg.payload = Bytes::copy_from_slice(&rest[..len]);

        Ok((seg, &rest[len..]))
    }
}

/// Wrap-safe comparison of 32-bit sequence numbers and timestamps: the
/// signed difference is correct across wraparound as long as the two values
/// are within 2^31 of each other.
#[inline]
pub fn seq_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}
