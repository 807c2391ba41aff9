//! SendJob — the send-side state machine over an exhaustive variant union.
//!
//! One tick performs one unit of send work for the resolved
//! [`SendVariant`]: a single datagram, one framed message, one gathered
//! transmission, or a transmission plus its routed answer. The dispatch
//! match is total, so adding a variant without handling it here fails to
//! compile.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use portage_core::crypto::Cipher;

use crate::duplex;
use crate::error::EngineError;
use crate::job::{Cardinality, JobConfig, SendVariant, Shutdown, TickOutcome, Transport, UdpLink};
use crate::mailbox::{BoxSet, MessageBox};
use crate::observer::{JobEvent, Observer};
use crate::protocol;
use crate::recv_job;

/// One send-side unit of work per live socket.
pub struct SendJob<S> {
    config: JobConfig,
    variant: SendVariant,
    cipher: Cipher,
    boxes: Arc<BoxSet>,
    answer_boxes: Arc<BoxSet>,
    transport: Transport<S>,
    shutdown: Shutdown,
    observer: Observer,
}

impl<S> SendJob<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// A TCP send job over an established stream. `answer_boxes` only
    /// matters for the with-answer and duplex variants; pass an empty set
    /// otherwise.
    pub fn tcp(
        config: JobConfig,
        stream: S,
        boxes: Arc<BoxSet>,
        answer_boxes: Arc<BoxSet>,
        shutdown: Shutdown,
    ) -> Result<Self, EngineError> {
        let variant = config.variant();
        if variant.is_udp() {
            return Err(EngineError::TransportMismatch);
        }
        Ok(Self {
            cipher: config.cipher(),
            variant,
            config,
            boxes,
            answer_boxes,
            transport: Transport::Stream(stream),
            shutdown,
            observer: Observer::disabled(),
        })
    }

    /// A UDP send job over a connected link.
    pub fn udp(
        config: JobConfig,
        link: UdpLink,
        boxes: Arc<BoxSet>,
        shutdown: Shutdown,
    ) -> Result<Self, EngineError> {
        let variant = config.variant();
        if !variant.is_udp() {
            return Err(EngineError::TransportMismatch);
        }
        Ok(Self {
            cipher: config.cipher(),
            variant,
            config,
            boxes,
            answer_boxes: BoxSet::new(),
            transport: Transport::Datagram(link),
            shutdown,
            observer: Observer::disabled(),
        })
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn variant(&self) -> SendVariant {
        self.variant
    }

    /// One scheduler tick. Sequential within the tick; no box means an
    /// idle outcome, never an error.
    pub async fn tick(&mut self) -> Result<TickOutcome, EngineError> {
        match self.variant {
            SendVariant::UdpSend => self.udp_tick(false).await,
            SendVariant::UdpSendWithAck => self.udp_tick(true).await,
            SendVariant::TcpSendSingle => self.tcp_single_tick().await,
            SendVariant::TcpSendTransmission => self.tcp_transmission_tick().await,
            SendVariant::TcpSendWithAnswer => self.tcp_answer_tick().await,
            SendVariant::TcpDuplex => self.tcp_duplex_tick().await,
        }
    }

    async fn udp_tick(&mut self, with_ack: bool) -> Result<TickOutcome, EngineError> {
        let Transport::Datagram(link) = &mut self.transport else {
            return Err(EngineError::TransportMismatch);
        };
        let Some(mailbox) = self.boxes.first_with_work().await else {
            return Ok(TickOutcome::Idle);
        };
        let msg = mailbox.dequeue().await.ok_or(EngineError::EmptyDequeue {
            box_id: mailbox.id(),
        })?;

        // Many-to-one datagrams carry a leading box id so the receive side
        // can route without connection state.
        let mut plain = Vec::with_capacity(msg.payload.len() + 4);
        if self.config.cardinality == Cardinality::ManyToOne {
            plain.extend_from_slice(&msg.box_id.to_le_bytes());
        }
        plain.extend_from_slice(&msg.payload);

        let ciphertext = self.cipher.encrypt(&plain)?;
        let sent = link.send(&ciphertext).await?;
        self.observer.emit(JobEvent::MessageSent {
            box_id: mailbox.id(),
            bytes: sent,
        });

        if !with_ack {
            return Ok(TickOutcome::Sent);
        }
        if link.await_ack(self.config.ack_timeout).await {
            self.observer.emit(JobEvent::AckReceived);
            Ok(TickOutcome::Sent)
        } else {
            tracing::warn!(
                box_id = mailbox.id(),
                peer = %link.peer(),
                "datagram sent but not acknowledged"
            );
            self.observer.emit(JobEvent::AckMissed);
            Ok(TickOutcome::SentUnacked)
        }
    }

    async fn tcp_single_tick(&mut self) -> Result<TickOutcome, EngineError> {
        let Some(mailbox) = self.boxes.first_with_work().await else {
            return Ok(TickOutcome::Idle);
        };
        let msg = mailbox.dequeue().await.ok_or(EngineError::EmptyDequeue {
            box_id: mailbox.id(),
        })?;

        let Transport::Stream(stream) = &mut self.transport else {
            return Err(EngineError::TransportMismatch);
        };
        let bytes = send_framed(
            stream,
            &msg.payload,
            &self.cipher,
            self.config.buffer_len,
            &mut self.shutdown,
        )
        .await?;
        self.observer.emit(JobEvent::MessageSent {
            box_id: mailbox.id(),
            bytes,
        });
        Ok(TickOutcome::Sent)
    }

    async fn tcp_transmission_tick(&mut self) -> Result<TickOutcome, EngineError> {
        let Some(mailbox) = self.boxes.first_with_work().await else {
            return Ok(TickOutcome::Idle);
        };
        let (frames, payload) = gather_transmission(
            &mailbox,
            self.config.gather_interval,
            self.config.gather_budget,
            &mut self.shutdown,
        )
        .await?;

        let Transport::Stream(stream) = &mut self.transport else {
            return Err(EngineError::TransportMismatch);
        };
        let bytes = send_framed(
            stream,
            &payload,
            &self.cipher,
            self.config.buffer_len,
            &mut self.shutdown,
        )
        .await?;
        self.observer.emit(JobEvent::TransmissionSent { frames, bytes });
        Ok(TickOutcome::Sent)
    }

    /// Send a gathered transmission, then block on the peer's framed reply
    /// and route it into the answer boxes.
    async fn tcp_answer_tick(&mut self) -> Result<TickOutcome, EngineError> {
        let Some(mailbox) = self.boxes.first_with_work().await else {
            return Ok(TickOutcome::Idle);
        };
        let (frames, payload) = gather_transmission(
            &mailbox,
            self.config.gather_interval,
            self.config.gather_budget,
            &mut self.shutdown,
        )
        .await?;

        let Transport::Stream(stream) = &mut self.transport else {
            return Err(EngineError::TransportMismatch);
        };
        let bytes = send_framed(
            stream,
            &payload,
            &self.cipher,
            self.config.buffer_len,
            &mut self.shutdown,
        )
        .await?;
        self.observer.emit(JobEvent::TransmissionSent { frames, bytes });

        // The peer may never answer; the wait must yield to shutdown.
        let reply_len =
            protocol::read_length_prefix_or_cancel(stream, &mut self.shutdown).await?;
        let delivered = recv_job::receive_body(
            stream,
            reply_len as usize,
            recv_job::ReplyShape::for_variant(self.variant, self.config.cardinality),
            &self.config,
            &self.cipher,
            &self.answer_boxes,
            &mut self.shutdown,
        )
        .await?;
        self.observer.emit(JobEvent::AnswerDelivered { frames: delivered });
        Ok(TickOutcome::AnswerDelivered(delivered))
    }

    async fn tcp_duplex_tick(&mut self) -> Result<TickOutcome, EngineError> {
        let Transport::Stream(stream) = &mut self.transport else {
            return Err(EngineError::TransportMismatch);
        };
        duplex::tick(
            stream,
            &self.config,
            &self.cipher,
            &self.boxes,
            &self.answer_boxes,
            &mut self.shutdown,
            &self.observer,
        )
        .await
    }

    /// Default scheduler loop. Idle ticks sleep for the queue wait;
    /// transport errors are retried; protocol violations stop the job.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            if self.shutdown.is_fired() {
                tracing::info!(variant = ?self.variant, "send job shutting down");
                return Ok(());
            }
            match self.tick().await {
                Ok(TickOutcome::Idle) => {
                    self.observer.emit(JobEvent::Idle);
                    tokio::select! {
                        _ = self.shutdown.fired() => {
                            tracing::info!(variant = ?self.variant, "send job shutting down");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(self.config.queue_wait) => {}
                    }
                }
                Ok(outcome) => tracing::trace!(?outcome, "send tick complete"),
                Err(EngineError::Cancelled) => {
                    tracing::info!(variant = ?self.variant, "send job cancelled mid-tick");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    return Err(e).context("fatal protocol error in send job");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport error, tick abandoned");
                }
            }
        }
    }
}

// ── Shared send-path helpers ─────────────────────────────────────────────────

/// Encrypt once and perform the framed write: length prefix announcing the
/// post-encryption byte count, then the buffered transfer. Returns the wire
/// byte count (prefix excluded).
pub(crate) async fn send_framed<W>(
    stream: &mut W,
    plaintext: &[u8],
    cipher: &Cipher,
    buffer_len: usize,
    shutdown: &mut Shutdown,
) -> Result<usize, EngineError>
where
    W: AsyncWrite + Unpin,
{
    let ciphertext = cipher.encrypt(plaintext)?;
    protocol::write_length_prefix(stream, ciphertext.len() as u32).await?;
    protocol::buffered_write(stream, &ciphertext, buffer_len, shutdown).await?;
    Ok(ciphertext.len())
}

/// Drain one complete transmission from a box, concatenating fragment
/// payloads in sequence order.
///
/// The head fragment's `amount` sets the target. Later fragments may still
/// be in flight from the producer, so each missing fragment is waited for
/// on the gather interval, bounded overall by the gather budget. A sequence
/// gap is fatal: with a single consumer per box it means the producer broke
/// the fragmentation contract. Shutdown firing mid-gather abandons the
/// transmission — it is not resumable, the application refragments.
async fn gather_transmission(
    mailbox: &MessageBox,
    gather_interval: Duration,
    gather_budget: Duration,
    shutdown: &mut Shutdown,
) -> Result<(u32, Vec<u8>), EngineError> {
    let first = mailbox.dequeue().await.ok_or(EngineError::EmptyDequeue {
        box_id: mailbox.id(),
    })?;
    if first.number != 1 {
        return Err(EngineError::BadFragmentOrder {
            expected: 1,
            got: first.number,
        });
    }

    let amount = first.amount;
    let mut payload = first.payload.to_vec();
    let deadline = Instant::now() + gather_budget;

    for expected in 2..=amount {
        let msg = loop {
            tokio::select! {
                _ = shutdown.fired() => return Err(EngineError::Cancelled),
                dequeued = mailbox.dequeue_timeout(gather_interval) => {
                    if let Some(msg) = dequeued {
                        break msg;
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(EngineError::GatherBudgetExhausted {
                    box_id: mailbox.id(),
                    budget_ms: gather_budget.as_millis() as u64,
                });
            }
            tracing::debug!(
                box_id = mailbox.id(),
                expected,
                amount,
                "fragment not yet enqueued, waiting"
            );
        };
        if msg.number != expected {
            return Err(EngineError::BadFragmentOrder {
                expected,
                got: msg.number,
            });
        }
        payload.extend_from_slice(&msg.payload);
    }
    Ok((amount, payload))
}

// ── Tests ────────────────────────────────────────────────────────────────────
