//! Interleaved send/receive over one stream.
//!
//! A duplex tick does at most one send and one receive: drain one message
//! from the earliest box with work, then listen briefly for an inbound
//! framed transmission and route it into the answer boxes. Neither half
//! blocks the other past the queue wait, so two duplex peers ticking
//! against each other cannot deadlock on a quiet wire.

use tokio::io::{AsyncRead, AsyncWrite};

use portage_core::crypto::Cipher;

use crate::error::EngineError;
use crate::job::{JobConfig, Shutdown, TickOutcome};
use crate::mailbox::BoxSet;
use crate::observer::{JobEvent, Observer};
use crate::protocol;
use crate::recv_job;
use crate::send_job;

pub(crate) async fn tick<S>(
    stream: &mut S,
    config: &JobConfig,
    cipher: &Cipher,
    boxes: &BoxSet,
    answer_boxes: &BoxSet,
    shutdown: &mut Shutdown,
    observer: &Observer,
) -> Result<TickOutcome, EngineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut sent = false;
    if let Some(mailbox) = boxes.first_with_work().await {
        let msg = mailbox.dequeue().await.ok_or(EngineError::EmptyDequeue {
            box_id: mailbox.id(),
        })?;
        let bytes = send_job::send_framed(
            stream,
            &msg.payload,
            cipher,
            config.buffer_len,
            shutdown,
        )
        .await?;
        observer.emit(JobEvent::MessageSent {
            box_id: mailbox.id(),
            bytes,
        });
        sent = true;
    }

    match protocol::read_length_prefix_timed(stream, config.queue_wait).await? {
        Some(len) => {
            let delivered = recv_job::receive_body(
                stream,
                len as usize,
                recv_job::ReplyShape::Single,
                config,
                cipher,
                answer_boxes,
                shutdown,
            )
            .await?;
            observer.emit(JobEvent::Received { frames: delivered });
            Ok(TickOutcome::Received(delivered))
        }
        None if sent => Ok(TickOutcome::Sent),
        None => Ok(TickOutcome::Idle),
    }
}
