//! ReceiveJob — the mirror of the send-side protocol.
//!
//! Framing is identical to the send path by construction: the same length
//! prefix, the same buffered transfer, the same decrypt-once rule. What a
//! framed payload *means* depends on the variant that produced it: a
//! single-message write delivers whole, a gathered transmission splits
//! into numbered frames. The send-with-answer variant reuses the helpers
//! here for its reply half.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;

use portage_core::crypto::Cipher;
use portage_core::frame::Message;

use crate::error::EngineError;
use crate::job::{Cardinality, CommType, JobConfig, SendVariant, Shutdown, TickOutcome};
use crate::mailbox::BoxSet;
use crate::observer::{JobEvent, Observer};
use crate::protocol;

// ── Reply interpretation ─────────────────────────────────────────────────────

/// How one framed inbound payload is turned into Messages.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReplyShape {
    /// The whole decrypted payload is one message.
    Single,
    /// The decrypted payload is a run of fixed-length frames; its length
    /// must divide evenly, anything else is fatal.
    Frames(FrameRouting),
}

/// Where split frames land.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FrameRouting {
    /// Every frame into the earliest-registered box.
    SingleBox,
    /// Each frame carries a leading 4-byte little-endian box id.
    LeadingBoxId,
}

impl ReplyShape {
    /// The shape a peer running `variant` puts on the wire per write.
    pub(crate) fn for_variant(variant: SendVariant, cardinality: Cardinality) -> Self {
        match variant {
            SendVariant::TcpSendSingle | SendVariant::TcpDuplex => ReplyShape::Single,
            SendVariant::TcpSendTransmission => ReplyShape::Frames(FrameRouting::SingleBox),
            SendVariant::TcpSendWithAnswer => match cardinality {
                Cardinality::ManyToOne => ReplyShape::Frames(FrameRouting::LeadingBoxId),
                _ => ReplyShape::Frames(FrameRouting::SingleBox),
            },
            // Datagram receive routes inline, one message per datagram.
            SendVariant::UdpSend | SendVariant::UdpSendWithAck => ReplyShape::Single,
        }
    }
}

// ── Shared receive-path helpers ──────────────────────────────────────────────

/// Reject a payload length that is not an exact multiple of the per-frame
/// length. A violation is a fatal protocol error, never retried.
pub(crate) fn validate_reply_len(len: usize, frame_len: usize) -> Result<(), EngineError> {
    if len % frame_len != 0 {
        return Err(EngineError::InvalidReplyLength { len, frame_len });
    }
    Ok(())
}

fn first_box_id(boxes: &BoxSet) -> Result<u32, EngineError> {
    boxes
        .ids()
        .first()
        .copied()
        .ok_or(EngineError::AnswerBoxOutOfRange { box_id: 0, boxes: 0 })
}

/// Split a decrypted payload into discrete Messages and pick each one's
/// target box. With leading-id routing every frame must name a configured
/// box; anything else is fatal.
pub(crate) fn split_frames(
    plaintext: &[u8],
    frame_len: usize,
    block_len: u32,
    routing: FrameRouting,
    boxes: &BoxSet,
) -> Result<Vec<Message>, EngineError> {
    if plaintext.is_empty() {
        return Ok(Vec::new());
    }

    let chunks: Vec<&[u8]> = plaintext.chunks(frame_len).collect();
    let amount = chunks.len() as u32;
    let mut frames = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let (box_id, payload) = match routing {
            FrameRouting::LeadingBoxId => {
                if chunk.len() < 4 {
                    return Err(EngineError::InvalidReplyLength {
                        len: chunk.len(),
                        frame_len,
                    });
                }
                let id = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if !boxes.contains(id) {
                    return Err(EngineError::AnswerBoxOutOfRange {
                        box_id: id,
                        boxes: boxes.len(),
                    });
                }
                (id, &chunk[4..])
            }
            FrameRouting::SingleBox => (first_box_id(boxes)?, &chunk[..]),
        };

        frames.push(Message {
            number: i as u32 + 1,
            amount,
            block_len,
            box_id,
            payload: Bytes::copy_from_slice(payload),
        });
    }
    Ok(frames)
}

/// Enqueue routed frames, retrying each bounded by the queue-wait timeout.
/// A box that stays full past the bound is fatal for the transmission.
pub(crate) async fn deliver_frames(
    frames: Vec<Message>,
    boxes: &BoxSet,
    queue_wait: Duration,
) -> Result<usize, EngineError> {
    let delivered = frames.len();
    for msg in frames {
        let box_id = msg.box_id;
        let target = boxes.get(box_id).ok_or(EngineError::AnswerBoxOutOfRange {
            box_id,
            boxes: boxes.len(),
        })?;
        if target.enqueue_timeout(msg, queue_wait).await.is_err() {
            return Err(EngineError::AnswerBoxFull { box_id });
        }
    }
    Ok(delivered)
}

/// The receiving half of a framed exchange, after the length prefix is
/// known: buffered read, single decrypt, interpret per shape, deliver.
pub(crate) async fn receive_body<S>(
    stream: &mut S,
    reply_len: usize,
    shape: ReplyShape,
    config: &JobConfig,
    cipher: &Cipher,
    boxes: &BoxSet,
    shutdown: &mut Shutdown,
) -> Result<usize, EngineError>
where
    S: AsyncRead + Unpin,
{
    if reply_len == 0 {
        return Ok(0);
    }
    // The prefix is peer-controlled; cap it before sizing any buffer.
    if reply_len > config.max_transfer_len {
        return Err(EngineError::TransferTooLarge {
            len: reply_len,
            max: config.max_transfer_len,
        });
    }

    let ciphertext =
        protocol::buffered_read(stream, reply_len, config.buffer_len, shutdown).await?;
    let plaintext = cipher.decrypt(&ciphertext)?;

    let frames = match shape {
        ReplyShape::Single => {
            let box_id = first_box_id(boxes)?;
            vec![Message::single(
                Bytes::from(plaintext),
                config.block_len,
                box_id,
            )?]
        }
        ReplyShape::Frames(routing) => {
            // The multiple-of-frame-length rule applies to the decrypted
            // payload; the wire length additionally carries the mode's
            // one-time overhead.
            let frame_len = config.frame_len()?;
            validate_reply_len(plaintext.len(), frame_len)?;
            split_frames(&plaintext, frame_len, config.block_len, routing, boxes)?
        }
    };
    deliver_frames(frames, boxes, config.queue_wait).await
}

// ── ReceiveJob ───────────────────────────────────────────────────────────────

enum RecvTransport<S> {
    Stream(S),
    Datagram(UdpSocket),
}

/// One receive-side unit of work per live socket.
pub struct ReceiveJob<S> {
    config: JobConfig,
    cipher: Cipher,
    shape: ReplyShape,
    boxes: Arc<BoxSet>,
    transport: RecvTransport<S>,
    shutdown: Shutdown,
    observer: Observer,
}

impl<S> ReceiveJob<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// A TCP receive job mirroring a peer's TCP send job with the same
    /// configuration.
    pub fn tcp(
        config: JobConfig,
        stream: S,
        boxes: Arc<BoxSet>,
        shutdown: Shutdown,
    ) -> Result<Self, EngineError> {
        let variant = config.variant();
        if variant.is_udp() {
            return Err(EngineError::TransportMismatch);
        }
        Ok(Self {
            cipher: config.cipher(),
            shape: ReplyShape::for_variant(variant, config.cardinality),
            config,
            boxes,
            transport: RecvTransport::Stream(stream),
            shutdown,
            observer: Observer::disabled(),
        })
    }

    /// A UDP receive job. With-ack configurations confirm each accepted
    /// datagram back to its sender.
    pub fn udp(
        config: JobConfig,
        socket: UdpSocket,
        boxes: Arc<BoxSet>,
        shutdown: Shutdown,
    ) -> Result<Self, EngineError> {
        if !config.variant().is_udp() {
            return Err(EngineError::TransportMismatch);
        }
        Ok(Self {
            cipher: config.cipher(),
            shape: ReplyShape::Single,
            config,
            boxes,
            transport: RecvTransport::Datagram(socket),
            shutdown,
            observer: Observer::disabled(),
        })
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    /// One scheduler tick. A quiet wire is an idle tick, not an error.
    pub async fn tick(&mut self) -> Result<TickOutcome, EngineError> {
        match &mut self.transport {
            RecvTransport::Stream(stream) => {
                let Some(len) =
                    protocol::read_length_prefix_timed(stream, self.config.queue_wait).await?
                else {
                    return Ok(TickOutcome::Idle);
                };
                let delivered = receive_body(
                    stream,
                    len as usize,
                    self.shape,
                    &self.config,
                    &self.cipher,
                    &self.boxes,
                    &mut self.shutdown,
                )
                .await?;
                self.observer.emit(JobEvent::Received { frames: delivered });
                Ok(TickOutcome::Received(delivered))
            }
            RecvTransport::Datagram(socket) => {
                let overhead = self.config.security.overhead();
                let mut buf = vec![0u8; self.config.block_len as usize + overhead + 8];

                let (len, sender) = match tokio::time::timeout(
                    self.config.queue_wait,
                    socket.recv_from(&mut buf),
                )
                .await
                {
                    Err(_) => return Ok(TickOutcome::Idle),
                    Ok(recv) => recv?,
                };

                let plaintext = match self.cipher.decrypt(&buf[..len]) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(%sender, error = %e, "datagram decryption failed, discarding");
                        return Ok(TickOutcome::Idle);
                    }
                };

                // One datagram carries one complete message.
                let (box_id, payload) = match self.config.cardinality {
                    Cardinality::ManyToOne => {
                        if plaintext.len() < 4 {
                            tracing::warn!(%sender, len = plaintext.len(), "datagram too short for a box id, discarding");
                            return Ok(TickOutcome::Idle);
                        }
                        let id = u32::from_le_bytes([
                            plaintext[0],
                            plaintext[1],
                            plaintext[2],
                            plaintext[3],
                        ]);
                        (id, Bytes::copy_from_slice(&plaintext[4..]))
                    }
                    Cardinality::OneToOne | Cardinality::BidirectionalEqual => {
                        (first_box_id(&self.boxes)?, Bytes::from(plaintext))
                    }
                };

                let target = self.boxes.get(box_id).ok_or(EngineError::AnswerBoxOutOfRange {
                    box_id,
                    boxes: self.boxes.len(),
                })?;
                let msg = Message::single(payload, self.config.block_len, box_id)?;

                let mut delivered = 0;
                if target.enqueue_timeout(msg, self.config.queue_wait).await.is_err() {
                    // Datagram delivery is already lossy; a stuffed box sheds
                    // load instead of stalling the socket.
                    tracing::warn!(box_id, "box full past queue-wait, datagram dropped");
                } else {
                    delivered = 1;
                }

                if delivered > 0 && self.config.comm == CommType::UdpSendWithAck {
                    protocol::send_ack(socket, sender).await?;
                }

                self.observer.emit(JobEvent::Received { frames: delivered });
                Ok(TickOutcome::Received(delivered))
            }
        }
    }

    /// Default scheduler loop. Transport errors end the tick and are
    /// retried; protocol violations and shutdown stop the job.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            if self.shutdown.is_fired() {
                tracing::info!("receive job shutting down");
                return Ok(());
            }
            match self.tick().await {
                Ok(TickOutcome::Idle) => self.observer.emit(JobEvent::Idle),
                Ok(outcome) => tracing::trace!(?outcome, "receive tick complete"),
                Err(EngineError::Cancelled) => {
                    tracing::info!("receive job cancelled mid-tick");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    return Err(e).context("fatal protocol error in receive job");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport error, tick abandoned");
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
