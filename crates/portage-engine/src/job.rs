//! Job configuration, variant selection, and the shared shutdown signal.
//!
//! The (communication type, cardinality) pair resolves to an exhaustive
//! [`SendVariant`] tagged union. Unhandled combinations fail to compile in
//! the dispatch match rather than silently no-op.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use portage_core::config::PortageConfig;
use portage_core::crypto::{Cipher, SecurityMode};

use crate::error::EngineError;

// ── Variant selection ────────────────────────────────────────────────────────

/// How a job talks to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommType {
    UdpSend,
    UdpSendWithAck,
    TcpSend,
    TcpSendWithAnswer,
    TcpBidirectional,
}

/// How MessageBoxes map onto the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    BidirectionalEqual,
}

/// The resolved send-side behavior. One tick executes one variant arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVariant {
    UdpSend,
    UdpSendWithAck,
    /// TCP, one message per wire write.
    TcpSendSingle,
    /// TCP, gather a whole transmission before one wire write.
    TcpSendTransmission,
    TcpSendWithAnswer,
    /// Interleaved send/receive on one stream.
    TcpDuplex,
}

impl SendVariant {
    /// Total over (comm, cardinality) — every combination resolves.
    pub fn select(comm: CommType, cardinality: Cardinality) -> Self {
        match (comm, cardinality) {
            (CommType::UdpSend, _) => SendVariant::UdpSend,
            (CommType::UdpSendWithAck, _) => SendVariant::UdpSendWithAck,
            (CommType::TcpBidirectional, _) => SendVariant::TcpDuplex,
            (CommType::TcpSend, Cardinality::BidirectionalEqual) => SendVariant::TcpDuplex,
            (CommType::TcpSend, Cardinality::OneToOne) => SendVariant::TcpSendSingle,
            (CommType::TcpSend, Cardinality::ManyToOne) => SendVariant::TcpSendTransmission,
            (CommType::TcpSendWithAnswer, _) => SendVariant::TcpSendWithAnswer,
        }
    }

    pub fn is_udp(self) -> bool {
        matches!(self, SendVariant::UdpSend | SendVariant::UdpSendWithAck)
    }
}

// ── Job configuration ────────────────────────────────────────────────────────

/// Immutable per-job configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub comm: CommType,
    pub cardinality: Cardinality,
    pub security: SecurityMode,
    pub passphrase: String,
    /// Per-frame block length the peers agreed on.
    pub block_len: u32,
    /// Transfer chunk size for buffered read/write loops.
    pub buffer_len: usize,
    /// Largest transfer a peer may declare in its length prefix.
    pub max_transfer_len: usize,
    /// Idle wait between ticks; also the answer-enqueue retry bound.
    pub queue_wait: Duration,
    /// Wait per dequeue attempt while gathering fragments.
    pub gather_interval: Duration,
    /// Total fragment-gathering retry budget.
    pub gather_budget: Duration,
    /// How long a UDP sender waits for the ACK token.
    pub ack_timeout: Duration,
}

impl JobConfig {
    /// Assemble a job config from the ambient [`PortageConfig`].
    pub fn new(comm: CommType, cardinality: Cardinality, block_len: u32, ambient: &PortageConfig) -> Self {
        Self {
            comm,
            cardinality,
            security: ambient.security.mode,
            passphrase: ambient.security.passphrase.clone(),
            block_len,
            buffer_len: ambient.engine.buffer_len,
            max_transfer_len: ambient.engine.max_transfer_len,
            queue_wait: ambient.queue_wait(),
            gather_interval: ambient.gather_interval(),
            gather_budget: ambient.gather_budget(),
            ack_timeout: ambient.ack_timeout(),
        }
    }

    pub fn variant(&self) -> SendVariant {
        SendVariant::select(self.comm, self.cardinality)
    }

    pub fn cipher(&self) -> Cipher {
        Cipher::new(self.security, &self.passphrase)
    }

    /// Expected per-frame share of a ciphertext: block length minus the
    /// mode's fixed overhead. The reply length must be a multiple of this.
    pub fn frame_len(&self) -> Result<usize, EngineError> {
        let overhead = self.security.overhead();
        if self.block_len as usize <= overhead {
            return Err(EngineError::BlockTooSmall {
                block_len: self.block_len,
                overhead,
            });
        }
        Ok(self.block_len as usize - overhead)
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// The live socket-level endpoint a job owns. Exclusively owned by one job;
/// the UDP handle may be rebound during the ACK hand-off.
pub enum Transport<S> {
    Stream(S),
    Datagram(UdpLink),
}

/// A connected UDP endpoint with enough bookkeeping to survive the ACK
/// socket swap: the send socket is dropped, a receive socket is bound to
/// the same local endpoint for the ACK wait, then a fresh send socket is
/// bound. The Option doubles as the re-entry guard on the hand-off.
pub struct UdpLink {
    socket: Option<UdpSocket>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl UdpLink {
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> std::io::Result<Self> {
        let local = socket.local_addr()?;
        Ok(Self {
            socket: Some(socket),
            local,
            peer,
        })
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The live socket. A failed post-ack rebind leaves the link dormant;
    /// the next call rebinds here, so a bind failure surfaces as a
    /// retryable transport error rather than ending the job.
    async fn socket(&mut self) -> Result<&UdpSocket, EngineError> {
        if self.socket.is_none() {
            tracing::debug!(local = %self.local, "rebinding dormant send socket");
            self.socket = Some(UdpSocket::bind(self.local).await?);
        }
        self.socket.as_ref().ok_or(EngineError::TransportMismatch)
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        let peer = self.peer;
        let socket = self.socket().await?;
        Ok(socket.send_to(data, peer).await?)
    }

    pub async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), EngineError> {
        let socket = self.socket().await?;
        Ok(socket.recv_from(buf).await?)
    }

    /// The Sending → AwaitingAck → Idle hand-off.
    ///
    /// Sequenced strictly after the send completes: drop the send socket,
    /// bind a receive socket on the same local endpoint, wait for the ACK
    /// token, then restore a fresh send socket. All failures downgrade to
    /// `false` — a missed ACK is a valid, weaker outcome.
    pub async fn await_ack(&mut self, wait: Duration) -> bool {
        let Some(socket) = self.socket.take() else {
            tracing::warn!("ack hand-off re-entered, ignoring");
            return false;
        };
        drop(socket);

        let acked = crate::protocol::await_ack(self.local, wait).await;

        match UdpSocket::bind(self.local).await {
            Ok(fresh) => self.socket = Some(fresh),
            Err(e) => {
                tracing::warn!(local = %self.local, error = %e, "failed to rebind send socket after ack wait");
            }
        }
        acked
    }
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

/// Shared cancellation signal. Every suspension point in a job observes it.
///
/// Firing the signal (or dropping the sender) aborts in-flight waits and
/// unwinds the current tick without completing a partial transmission.
pub struct Shutdown {
    rx: broadcast::Receiver<()>,
}

/// Create a shutdown signal pair. Keep the sender alive for the job's
/// lifetime; `send(())` or dropping it cancels.
pub fn shutdown_channel() -> (broadcast::Sender<()>, Shutdown) {
    let (tx, rx) = broadcast::channel(1);
    (tx, Shutdown { rx })
}

impl Shutdown {
    /// Resolves when the signal fires. Cancel-safe.
    pub async fn fired(&mut self) {
        // Any outcome other than a live, silent channel counts as fired.
        let _ = self.rx.recv().await;
    }

    /// Non-blocking probe.
    pub fn is_fired(&mut self) -> bool {
        !matches!(self.rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.resubscribe(),
        }
    }
}

// ── Tick outcome ─────────────────────────────────────────────────────────────

/// What one scheduler tick accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One unit of work sent (and acknowledged, where applicable).
    Sent,
    /// Datagram sent but the ACK never arrived — retry next tick.
    SentUnacked,
    /// Answer received and routed into `n` answer-box messages.
    AnswerDelivered(usize),
    /// Inbound transmission routed into `n` box messages.
    Received(usize),
    /// No box had pending work. Normal backpressure, not an error.
    Idle,
}

// ── Tests ────────────────────────────────────────────────────────────────────
