/// Errors surfaced by the session engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArqError {
    /// The message would need more fragments than the peer can reassemble.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Submitted message size.
        size: usize,
        /// Largest accepted message size under the current MTU.
        limit: usize,
    },

    /// Zero-length messages cannot be framed.
    #[error("empty message")]
    EmptyMessage,

    /// A segment exhausted its retransmission budget; the session is unusable.
    #[error("dead link: a segment exceeded {0} transmissions without an ack")]
    DeadLink(u32),

    /// A configuration setter was called with an out-of-range value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Decode failures. Never surfaced past the receive pipeline: malformed
/// input from the transport is dropped and counted, not reported.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    #[error("buffer shorter than segment header")]
    Truncated,

    #[error("declared payload length exceeds buffer")]
    PayloadTruncated,

    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
}

pub type Result<T> = std::result::Result<T, ArqError>;
