//! Protocol constants shared by the codec and the session engine.

/// Wire header size in bytes: conv(4) cmd(1) frg(1) wnd(2) ts(4) sn(4) una(4) len(4).
pub const HEADER_LEN: usize = 24;

// Command bytes
pub const CMD_DATA: u8 = 81;
pub const CMD_ACK: u8 = 82;
pub const CMD_WND_ASK: u8 = 83;
pub const CMD_WND_TELL: u8 = 84;

// Probe request flags
pub const PROBE_ASK: u32 = 1;
pub const PROBE_TELL: u32 = 2;

pub const DEFAULT_SND_WND: u16 = 32;
pub const DEFAULT_RCV_WND: u16 = 128;

/// Hard ceiling on fragments per message. A message needing more fragments
/// than the default receive window could never be reassembled by a default
/// peer, so it is rejected at submission.
pub const FRAGMENT_LIMIT: usize = DEFAULT_RCV_WND as usize;

pub const DEFAULT_MTU: usize = 1400;
pub const MAX_MTU: usize = 65535;

// Retransmission timeout bounds, milliseconds
pub const RTO_NODELAY_MIN: u32 = 30;
pub const RTO_MIN: u32 = 100;
pub const RTO_DEFAULT: u32 = 200;
pub const RTO_MAX: u32 = 60_000;

/// Flush cadence, milliseconds
pub const DEFAULT_INTERVAL: u32 = 100;
pub const MIN_INTERVAL: u32 = 10;
pub const MAX_INTERVAL: u32 = 5_000;

// Congestion control
pub const SSTHRESH_INIT: u32 = 2;
pub const SSTHRESH_MIN: u32 = 2;

// Zero-window probing, milliseconds
pub const PROBE_INIT: u32 = 7_000;
pub const PROBE_LIMIT: u32 = 120_000;

/// Transmit count at which a segment is considered undeliverable and the
/// session is reported dead.
pub const DEAD_LINK: u32 = 20;

/// Upper bound on back-to-back fast retransmissions of one segment.
pub const FAST_RESEND_LIMIT: u32 = 5;
