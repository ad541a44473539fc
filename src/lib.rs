//! arqx: reliable, ordered, congestion controlled message delivery over
//! unreliable transports.
//!
//! The crate is built around a transport-agnostic ARQ engine,
//! [`ArqSession`], that trades bandwidth for latency: retransmission is
//! driven by an adaptive RTO with tunable aggressiveness (`nodelay` mode,
//! fast retransmit on duplicate acks) rather than TCP's conservative
//! timers. The engine performs no I/O and reads no clocks — the caller
//! feeds it inbound datagrams ([`ArqSession::input`]), drives it with a
//! millisecond tick ([`ArqSession::update`]) and receives outbound
//! datagrams through a [`SegmentSink`] it supplies.
//!
//! ```no_run
//! use arqx::ArqSession;
//!
//! let mut session = ArqSession::new(0x11223344, |datagram: &[u8]| {
//!     // hand the datagram to the transport, e.g. a UDP socket
//!     let _ = datagram;
//! });
//! session.send(b"hello").unwrap();
//! session.update(0).unwrap();               // emits the segment via the sink
//! session.input(b"...datagram bytes...", 5); // feed peer traffic back in
//! while let Some(message) = session.recv() {
//!     println!("got {} bytes", message.len());
//! }
//! ```
//!
//! For callers on tokio, [`ArqSocket`] wraps one session around a connected
//! UDP socket and drives it from a background task.
#![warn(
    missing_debug_implementations,
    redundant_lifetimes,
    non_local_definitions,
    unsafe_code
)]

pub mod congestion;
pub mod constants;
pub mod error;
pub mod queue;
pub mod rtt;
pub mod segment;
pub mod session;
pub mod socket;

pub use error::{ArqError, Result, SegmentError};
pub use segment::{Command, Segment};
pub use session::{ArqSession, SegmentSink, SessionStats};
pub use socket::ArqSocket;
