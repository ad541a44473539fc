//! Tokio UDP driver for a single session.
//!
//! [`ArqSocket`] owns one [`ArqSession`] bound to a connected UDP socket and
//! runs a background task that feeds inbound datagrams to the session,
//! schedules `update` from `check`, and surfaces reassembled messages on a
//! channel. The engine itself stays synchronous; all I/O and time live here.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::Result;
use crate::session::{ArqSession, SegmentSink, SessionStats};

/// Forwards engine output to a connected UDP socket. A datagram the socket
/// cannot take right now is dropped; the protocol retransmits.
struct UdpSink {
    socket: Arc<UdpSocket>,
}

impl SegmentSink for UdpSink {
    fn emit(&mut self, datagram: &[u8]) {
        if let Err(err) = self.socket.try_send(datagram) {
            trace!(%err, "dropping outbound datagram");
        }
    }
}

/// One ARQ session over UDP.
pub struct ArqSocket {
    socket: Arc<UdpSocket>,
    session: Arc<Mutex<ArqSession<UdpSink>>>,
    messages: mpsc::Receiver<Bytes>,
    wake: Arc<Notify>,
    driver: JoinHandle<()>,
}

impl ArqSocket {
    /// Binds `bind`, connects to `peer` and starts the driver task.
    pub async fn connect(bind: SocketAddr, peer: SocketAddr, conv: u32) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind).await?;
        Self::from_socket(socket, peer, conv).await
    }

    /// Wraps an already-bound socket. Useful when the caller picks ports
    /// before either peer exists.
    pub async fn from_socket(socket: UdpSocket, peer: SocketAddr, conv: u32) -> io::Result<Self> {
        socket.connect(peer).await?;
        let socket = Arc::new(socket);

        let sink = UdpSink {
            socket: socket.clone(),
        };
        let session = Arc::new(Mutex::new(ArqSession::new(conv, sink)));
        let (tx, rx) = mpsc::channel(64);
        let wake = Arc::new(Notify::new());
        let driver = tokio::spawn(drive(
            socket.clone(),
            session.clone(),
            tx,
            wake.clone(),
            Instant::now(),
        ));

        Ok(Self {
            socket,
            session,
            messages: rx,
            wake,
            driver,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Queues one message for reliable delivery and wakes the driver so the
    /// next flush is scheduled promptly.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.session.lock().await.send(data)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Next reassembled message from the peer. `None` once the driver has
    /// stopped (dead link or socket failure).
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.messages.recv().await
    }

    /// See [`ArqSession::set_nodelay`].
    pub async fn set_nodelay(
        &self,
        nodelay: bool,
        interval_ms: u32,
        fast_resend: u32,
        no_cwnd: bool,
    ) -> Result<()> {
        self.session
            .lock()
            .await
            .set_nodelay(nodelay, interval_ms, fast_resend, no_cwnd)
    }

    /// See [`ArqSession::set_window`].
    pub async fn set_window(&self, snd_wnd: u16, rcv_wnd: u16) -> Result<()> {
        self.session.lock().await.set_window(snd_wnd, rcv_wnd)
    }

    pub async fn is_dead(&self) -> bool {
        self.session.lock().await.is_dead()
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.lock().await.stats().clone()
    }
}

impl Drop for ArqSocket {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl std::fmt::Debug for ArqSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArqSocket")
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

fn now_ms(epoch: Instant) -> u32 {
    epoch.elapsed().as_millis() as u32
}

async fn drive(
    socket: Arc<UdpSocket>,
    session: Arc<Mutex<ArqSession<UdpSink>>>,
    tx: mpsc::Sender<Bytes>,
    wake: Arc<Notify>,
    epoch: Instant,
) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut ready = Vec::new();
    loop {
        // Collect under the lock, deliver after releasing it.
        let wait = {
            let mut s = session.lock().await;
            if s.update(now_ms(epoch)).is_err() {
                debug!(conv = s.conv(), "dead link, driver stopping");
                return;
            }
            while let Some(message) = s.recv() {
                ready.push(message);
            }
            s.check(now_ms(epoch))
        };
        for message in ready.drain(..) {
            if tx.send(message).await.is_err() {
                // Receiver gone; nobody is reading this session anymore.
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait.max(1) as u64)) => {}
            _ = wake.notified() => {}
            received = socket.recv(&mut buf) => {
                match received {
                    Ok(n) => session.lock().await.input(&buf[..n], now_ms(epoch)),
                    Err(err) => trace!(%err, "udp recv failed"),
                }
            }
        }
    }
}
