//! The ARQ session engine.
//!
//! One [`ArqSession`] per logical connection. The session does no I/O and
//! never reads a clock: the caller feeds inbound datagrams to [`input`],
//! drives timers through [`update`] with its own notion of `now`
//! (milliseconds, wrap-safe), and receives outbound datagrams through the
//! [`SegmentSink`] it supplied at construction.
//!
//! [`input`]: ArqSession::input
//! [`update`]: ArqSession::update

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::congestion::Congestion;
use crate::constants::{
    DEAD_LINK, DEFAULT_INTERVAL, DEFAULT_MTU, DEFAULT_RCV_WND, DEFAULT_SND_WND, FAST_RESEND_LIMIT,
    FRAGMENT_LIMIT, HEADER_LEN, MAX_INTERVAL, MAX_MTU, MIN_INTERVAL, PROBE_ASK, PROBE_INIT,
    PROBE_LIMIT, PROBE_TELL, RTO_MAX, RTO_MIN, RTO_NODELAY_MIN,
};
use crate::error::{ArqError, Result};
use crate::queue::SegmentBuf;
use crate::rtt::RttEstimator;
use crate::segment::{seq_diff, Command, Segment};

/// Receiver of transmit-ready datagrams.
///
/// Invoked synchronously from [`ArqSession::update`] and must not call back
/// into the same session. Each call carries one datagram of at most the
/// session MTU, possibly holding several coalesced segments.
pub trait SegmentSink {
    /// Hand one datagram to the transport.
    fn emit(&mut self, datagram: &[u8]);
}

impl<F: FnMut(&[u8])> SegmentSink for F {
    fn emit(&mut self, datagram: &[u8]) {
        self(datagram)
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub segments_in: u64,
    pub segments_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub retransmits: u64,
    pub malformed_dropped: u64,
    pub duplicates_dropped: u64,
}

/// A reliable, ordered session over an unreliable datagram transport.
pub struct ArqSession<S: SegmentSink> {
    conv: u32,
    sink: S,

    mtu: usize,
    /// Payload capacity per segment: `mtu - HEADER_LEN`.
    mss: usize,

    snd_wnd: u16,
    rcv_wnd: u16,
    /// Peer's advertised receive window, learned from inbound headers.
    rmt_wnd: u16,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    /// Fragments accepted by `send`, not yet assigned a sequence number.
    snd_queue: VecDeque<Segment>,
    /// In-flight segments awaiting acknowledgment.
    snd_buf: SegmentBuf,
    /// Out-of-order segments awaiting their missing predecessors.
    rcv_buf: SegmentBuf,
    /// Contiguous segments ready for reassembly.
    rcv_queue: VecDeque<Segment>,
    /// (sn, ts) acknowledgments pending transmission.
    ack_queue: Vec<(u32, u32)>,

    rtt: RttEstimator,
    congestion: Congestion,

    interval: u32,
    nodelay: bool,
    fast_resend: u32,
    dead_link: u32,
    dead: bool,

    updated: bool,
    next_flush: u32,

    probe_flags: u32,
    probe_wait: u32,
    probe_at: u32,

    /// Datagram assembly buffer reused across flushes.
    scratch: BytesMut,

    stats: SessionStats,
}

impl<S: SegmentSink> ArqSession<S> {
    /// Creates a session for conversation `conv`. Both peers must use the
    /// same conversation id; segments with any other id are dropped.
    pub fn new(conv: u32, sink: S) -> Self {
        Self {
            conv,
            sink,
            mtu: DEFAULT_MTU,
            mss: DEFAULT_MTU - HEADER_LEN,
            snd_wnd: DEFAULT_SND_WND,
            rcv_wnd: DEFAULT_RCV_WND,
            rmt_wnd: DEFAULT_RCV_WND,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            snd_queue: VecDeque::new(),
            snd_buf: SegmentBuf::new(),
            rcv_buf: SegmentBuf::new(),
            rcv_queue: VecDeque::new(),
            ack_queue: Vec::new(),
            rtt: RttEstimator::default(),
            congestion: Congestion::default(),
            interval: DEFAULT_INTERVAL,
            nodelay: false,
            fast_resend: 0,
            dead_link: DEAD_LINK,
            dead: false,
            updated: false,
            next_flush: 0,
            probe_flags: 0,
            probe_wait: 0,
            probe_at: 0,
            scratch: BytesMut::with_capacity(DEFAULT_MTU),
            stats: SessionStats::default(),
        }
    }

    // ---- configuration ------------------------------------------------

    /// Retransmission aggressiveness. `nodelay` lowers the RTO floor to
    /// 30ms and switches to gentler RTO backoff; `interval_ms` is the flush
    /// cadence; `fast_resend` the duplicate-ack threshold for fast
    /// retransmission (0 disables); `no_cwnd` disables congestion control,
    /// leaving only flow control.
    pub fn set_nodelay(
        &mut self,
        nodelay: bool,
        interval_ms: u32,
        fast_resend: u32,
        no_cwnd: bool,
    ) -> Result<()> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval_ms) {
            return Err(ArqError::InvalidConfig("interval out of range"));
        }
        self.nodelay = nodelay;
        self.interval = interval_ms;
        self.fast_resend = fast_resend;
        self.congestion.set_disabled(no_cwnd);
        self.rtt
            .set_min_rto(if nodelay { RTO_NODELAY_MIN } else { RTO_MIN });
        Ok(())
    }

    /// Send and receive window sizes, in segments.
    pub fn set_window(&mut self, snd_wnd: u16, rcv_wnd: u16) -> Result<()> {
        if snd_wnd == 0 || rcv_wnd == 0 {
            return Err(ArqError::InvalidConfig("window sizes must be non-zero"));
        }
        self.snd_wnd = snd_wnd;
        self.rcv_wnd = rcv_wnd;
        Ok(())
    }

    /// Maximum datagram size, header included.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<()> {
        if mtu <= HEADER_LEN || mtu > MAX_MTU {
            return Err(ArqError::InvalidConfig("mtu out of range"));
        }
        self.mtu = mtu;
        self.mss = mtu - HEADER_LEN;
        Ok(())
    }

    /// RTO floor in milliseconds. Independent of [`set_fast_resend`]; the
    /// two knobs share nothing.
    ///
    /// [`set_fast_resend`]: ArqSession::set_fast_resend
    pub fn set_min_rto(&mut self, min_rto_ms: u32) -> Result<()> {
        if min_rto_ms == 0 || min_rto_ms > RTO_MAX {
            return Err(ArqError::InvalidConfig("min rto out of range"));
        }
        self.rtt.set_min_rto(min_rto_ms);
        Ok(())
    }

    /// Duplicate-ack threshold for fast retransmission; 0 disables.
    pub fn set_fast_resend(&mut self, threshold: u32) {
        self.fast_resend = threshold;
    }

    /// Transmission-count ceiling after which the session reports
    /// [`ArqError::DeadLink`].
    pub fn set_dead_link(&mut self, ceiling: u32) -> Result<()> {
        if ceiling == 0 {
            return Err(ArqError::InvalidConfig("dead link ceiling must be non-zero"));
        }
        self.dead_link = ceiling;
        Ok(())
    }

    // ---- accessors ----------------------------------------------------

    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// True once a segment has exhausted its retransmission budget. The
    /// session is not torn down; the caller is expected to release it.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Segments waiting to be sent or still in flight. Useful for caller
    /// side backpressure.
    pub fn pending_send(&self) -> usize {
        self.snd_queue.len() + self.snd_buf.len()
    }

    /// Largest message `send` currently accepts.
    pub fn max_message_size(&self) -> usize {
        FRAGMENT_LIMIT * self.mss
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Size of the next complete message, without consuming it.
    pub fn peek_size(&self) -> Option<usize> {
        let first = self.rcv_queue.front()?;
        if first.frg == 0 {
            return Some(first.payload.len());
        }
        if self.rcv_queue.len() < first.frg as usize + 1 {
            return None;
        }
        let mut total = 0;
        for seg in &self.rcv_queue {
            total += seg.payload.len();
            if seg.frg == 0 {
                break;
            }
        }
        Some(total)
    }

    // ---- send pipeline ------------------------------------------------

    /// Queues one application message for delivery. The message is
    /// fragmented to the session MSS; nothing is transmitted until the next
    /// [`update`].
    ///
    /// [`update`]: ArqSession::update
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(ArqError::EmptyMessage);
        }
        let count = data.len().div_ceil(self.mss);
        if count > FRAGMENT_LIMIT {
            return Err(ArqError::MessageTooLarge {
                size: data.len(),
                limit: self.max_message_size(),
            });
        }

        for (i, chunk) in data.chunks(self.mss).enumerate() {
            let mut seg = Segment::new(self.conv, Command::Data);
            seg.frg = (count - 1 - i) as u8;
            seg.payload = Bytes::copy_from_slice(chunk);
            self.snd_queue.push_back(seg);
        }
        Ok(())
    }

    /// Removes one acknowledged segment from the send window.
    fn acknowledge(&mut self, sn: u32) {
        if seq_diff(sn, self.snd_una) < 0 || seq_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        self.snd_buf.remove(sn);
        self.shrink_snd_buf();
    }

    /// Drops everything below the peer's cumulative-ack watermark.
    fn handle_una(&mut self, una: u32) {
        self.snd_buf.drop_before(una);
        self.shrink_snd_buf();
    }

    fn shrink_snd_buf(&mut self) {
        self.snd_una = self.snd_buf.first_sn().unwrap_or(self.snd_nxt);
    }

    /// Counts, for every in-flight segment, acks of later sequence numbers.
    fn count_fast_acks(&mut self, max_acked: u32) {
        for seg in self.snd_buf.iter_mut() {
            if seq_diff(seg.sn, max_acked) < 0 {
                seg.fast_acks += 1;
            }
        }
    }

    // ---- receive pipeline ---------------------------------------------

    /// Feeds raw bytes received from the transport. `data` may hold several
    /// coalesced segments; malformed framing or a foreign conversation id
    /// drops the rest of the buffer silently.
    pub fn input(&mut self, data: &[u8], now: u32) {
        let prev_una = self.snd_una;
        let mut max_acked: Option<u32> = None;

        let mut rest = data;
        while !rest.is_empty() {
            let (seg, remainder) = match Segment::decode(rest) {
                Ok(parsed) => parsed,
                Err(err) => {
                    trace!(conv = self.conv, %err, "dropping malformed input");
                    self.stats.malformed_dropped += 1;
                    return;
                }
            };
            if seg.conv != self.conv {
                trace!(conv = self.conv, got = seg.conv, "dropping foreign conversation");
                self.stats.malformed_dropped += 1;
                return;
            }
            self.stats.segments_in += 1;
            self.stats.bytes_in += seg.wire_len() as u64;
            rest = remainder;

            self.rmt_wnd = seg.wnd;
            self.handle_una(seg.una);

            match seg.cmd {
                Command::Ack => {
                    let rtt = seq_diff(now, seg.ts);
                    if rtt >= 0 {
                        self.rtt.sample(rtt as u32);
                    }
                    self.acknowledge(seg.sn);
                    max_acked = Some(match max_acked {
                        Some(prev) if seq_diff(seg.sn, prev) <= 0 => prev,
                        _ => seg.sn,
                    });
                }
                Command::Data => self.accept_data(seg),
                Command::WindowAsk => {
                    self.probe_flags |= PROBE_TELL;
                }
                // The header's wnd field was already consumed above.
                Command::WindowTell => {}
            }
        }

        if let Some(max_acked) = max_acked {
            self.count_fast_acks(max_acked);
        }
        if seq_diff(self.snd_una, prev_una) > 0 {
            self.congestion
                .on_advance(self.mss as u32, self.rmt_wnd as u32);
        }
    }

    /// Accepts one DATA segment into the receive window.
    fn accept_data(&mut self, seg: Segment) {
        let window_end = self.rcv_nxt.wrapping_add(self.rcv_wnd as u32);
        if seq_diff(seg.sn, window_end) >= 0 {
            // Beyond what we can buffer; the peer outran our advertisements.
            self.stats.duplicates_dropped += 1;
            return;
        }
        // Ack even stale segments so a lost ack does not stall the peer.
        self.ack_queue.push((seg.sn, seg.ts));

        if seq_diff(seg.sn, self.rcv_nxt) < 0 {
            self.stats.duplicates_dropped += 1;
            return;
        }
        if !self.rcv_buf.insert(seg) {
            self.stats.duplicates_dropped += 1;
            return;
        }
        self.migrate_contiguous();
    }

    /// Moves segments from the out-of-order window into the ordered queue
    /// while they are contiguous with `rcv_nxt`.
    fn migrate_contiguous(&mut self) {
        while let Some(front) = self.rcv_buf.front() {
            if front.sn != self.rcv_nxt || self.rcv_queue.len() >= self.rcv_wnd as usize {
                break;
            }
            let seg = self.rcv_buf.pop_front().unwrap();
            self.rcv_queue.push_back(seg);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        }
    }

    /// Reassembles and returns the next complete message, or `None` when no
    /// complete fragment run is buffered. Call in a loop to drain.
    pub fn recv(&mut self) -> Option<Bytes> {
        let size = self.peek_size()?;
        let was_full = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut message = BytesMut::with_capacity(size);
        while let Some(seg) = self.rcv_queue.pop_front() {
            message.put_slice(&seg.payload);
            if seg.frg == 0 {
                break;
            }
        }
        debug_assert_eq!(message.len(), size);

        self.migrate_contiguous();
        // Tell the peer the window reopened, without waiting to be asked.
        if was_full && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe_flags |= PROBE_TELL;
        }
        Some(message.freeze())
    }

    /// Receive window left to advertise.
    fn wnd_unused(&self) -> u16 {
        (self.rcv_wnd as usize).saturating_sub(self.rcv_queue.len() + self.rcv_buf.len()) as u16
    }

    // ---- clock-driven controller --------------------------------------

    /// Advances timers and transmits whatever is due: pending acks, window
    /// probes, new segments, retransmissions. Call repeatedly with a
    /// monotonic millisecond clock; the first call establishes the flush
    /// cadence. Returns `Err(DeadLink)` once the session is dead.
    pub fn update(&mut self, now: u32) -> Result<()> {
        if !self.updated {
            self.updated = true;
            self.next_flush = now;
        }

        let mut slap = seq_diff(now, self.next_flush);
        // Re-sync after a clock jump in either direction.
        if !(-10_000..10_000).contains(&slap) {
            self.next_flush = now;
            slap = 0;
        }
        if slap >= 0 {
            self.next_flush = self.next_flush.wrapping_add(self.interval);
            if seq_diff(now, self.next_flush) >= 0 {
                self.next_flush = now.wrapping_add(self.interval);
            }
            self.flush(now);
        }

        if self.dead {
            Err(ArqError::DeadLink(self.dead_link))
        } else {
            Ok(())
        }
    }

    /// Milliseconds until [`update`] next has work to do: the minimum over
    /// the flush cadence and all retransmission deadlines, capped at the
    /// configured interval. Returns 0 when something is already due.
    ///
    /// [`update`]: ArqSession::update
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated {
            return 0;
        }

        let mut next_flush = self.next_flush;
        if !(-10_000..10_000).contains(&seq_diff(now, next_flush)) {
            next_flush = now;
        }
        if seq_diff(now, next_flush) >= 0 {
            return 0;
        }
        let mut wait = seq_diff(next_flush, now) as u32;

        for seg in self.snd_buf.iter() {
            let until_resend = seq_diff(seg.resend_at, now);
            if until_resend <= 0 {
                return 0;
            }
            wait = wait.min(until_resend as u32);
        }
        wait.min(self.interval)
    }

    /// Transmits everything currently due. Only called from `update`.
    fn flush(&mut self, now: u32) {
        let wnd = self.wnd_unused();

        // Pending acknowledgments, batched into MTU-sized datagrams.
        let mut ack = Segment::new(self.conv, Command::Ack);
        ack.wnd = wnd;
        ack.una = self.rcv_nxt;
        for (sn, ts) in std::mem::take(&mut self.ack_queue) {
            ack.sn = sn;
            ack.ts = ts;
            Self::pack(
                &mut self.scratch,
                &mut self.sink,
                &mut self.stats,
                self.mtu,
                &ack,
            );
        }

        self.schedule_probe(now);
        if self.probe_flags & PROBE_ASK != 0 {
            let mut probe = Segment::new(self.conv, Command::WindowAsk);
            probe.wnd = wnd;
            probe.una = self.rcv_nxt;
            Self::pack(
                &mut self.scratch,
                &mut self.sink,
                &mut self.stats,
                self.mtu,
                &probe,
            );
        }
        if self.probe_flags & PROBE_TELL != 0 {
            let mut probe = Segment::new(self.conv, Command::WindowTell);
            probe.wnd = wnd;
            probe.una = self.rcv_nxt;
            Self::pack(
                &mut self.scratch,
                &mut self.sink,
                &mut self.stats,
                self.mtu,
                &probe,
            );
        }
        self.probe_flags = 0;

        // Effective window: flow control always, congestion control unless
        // disabled.
        let mut window = (self.snd_wnd as u32).min(self.rmt_wnd as u32);
        if let Some(cwnd) = self.congestion.window() {
            window = window.min(cwnd);
        }

        // Promote queued fragments into the send window.
        while seq_diff(self.snd_nxt, self.snd_una.wrapping_add(window)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            seg.rto = self.rtt.rto();
            seg.resend_at = now;
            self.snd_buf.push_back(seg);
        }

        let resend_threshold = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        // Conservative grace period on the first transmission.
        let rto_grace = if self.nodelay { 0 } else { self.rtt.rto() >> 3 };
        let base_rto = self.rtt.rto();
        let nodelay = self.nodelay;
        let dead_link = self.dead_link;
        let rcv_nxt = self.rcv_nxt;

        let mut timeout_loss = false;
        let mut fast_retransmitted = false;

        for seg in self.snd_buf.iter_mut() {
            let mut needs_send = false;
            if seg.transmits == 0 {
                needs_send = true;
                seg.transmits = 1;
                seg.resend_at = now.wrapping_add(seg.rto + rto_grace);
            } else if seq_diff(now, seg.resend_at) >= 0 {
                needs_send = true;
                seg.transmits += 1;
                // Backoff: doubling normally, 1.5x in nodelay mode.
                let step = if nodelay { seg.rto / 2 } else { seg.rto.max(base_rto) };
                seg.rto = (seg.rto + step).min(RTO_MAX);
                seg.resend_at = now.wrapping_add(seg.rto);
                timeout_loss = true;
                self.stats.retransmits += 1;
                trace!(sn = seg.sn, transmits = seg.transmits, rto = seg.rto, "rto retransmit");
            } else if seg.fast_acks >= resend_threshold && seg.transmits <= FAST_RESEND_LIMIT {
                needs_send = true;
                seg.transmits += 1;
                seg.fast_acks = 0;
                seg.resend_at = now.wrapping_add(seg.rto);
                fast_retransmitted = true;
                self.stats.retransmits += 1;
                trace!(sn = seg.sn, "fast retransmit");
            }

            if needs_send {
                seg.ts = now;
                seg.wnd = wnd;
                seg.una = rcv_nxt;
                Self::pack(
                    &mut self.scratch,
                    &mut self.sink,
                    &mut self.stats,
                    self.mtu,
                    seg,
                );
                if seg.transmits >= dead_link {
                    self.dead = true;
                    debug!(conv = self.conv, sn = seg.sn, "dead link");
                }
            }
        }
        Self::drain(&mut self.scratch, &mut self.sink, &mut self.stats);

        if fast_retransmitted {
            let inflight = seq_diff(self.snd_nxt, self.snd_una).max(0) as u32;
            self.congestion
                .on_fast_resend(inflight, self.fast_resend, self.mss as u32);
        }
        if timeout_loss {
            self.congestion.on_loss(self.mss as u32);
        }
    }

    /// Zero-remote-window probing with exponential backoff.
    fn schedule_probe(&mut self, now: u32) {
        if self.rmt_wnd != 0 {
            self.probe_wait = 0;
            self.probe_at = 0;
            return;
        }
        if self.probe_wait == 0 {
            self.probe_wait = PROBE_INIT;
            self.probe_at = now.wrapping_add(self.probe_wait);
        } else if seq_diff(now, self.probe_at) >= 0 {
            self.probe_wait = self.probe_wait.max(PROBE_INIT);
            self.probe_wait += self.probe_wait / 2;
            self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
            self.probe_at = now.wrapping_add(self.probe_wait);
            self.probe_flags |= PROBE_ASK;
        }
    }

    // Associated functions rather than methods so `flush` can emit while
    // iterating the send window.

    fn pack(scratch: &mut BytesMut, sink: &mut S, stats: &mut SessionStats, mtu: usize, seg: &Segment) {
        if !scratch.is_empty() && scratch.len() + seg.wire_len() > mtu {
            Self::drain(scratch, sink, stats);
        }
        seg.encode(scratch);
        stats.segments_out += 1;
    }

    fn drain(scratch: &mut BytesMut, sink: &mut S, stats: &mut SessionStats) {
        if scratch.is_empty() {
            return;
        }
        stats.bytes_out += scratch.len() as u64;
        sink.emit(scratch);
        scratch.clear();
    }
}

impl<S: SegmentSink> std::fmt::Debug for ArqSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArqSession")
            .field("conv", &self.conv)
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("pending_send", &self.pending_send())
            .field("dead", &self.dead)
            .finish()
    }
}
