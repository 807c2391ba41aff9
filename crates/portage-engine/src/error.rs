//! Engine error taxonomy.
//!
//! Two families with different handling at the tick boundary:
//! transport errors end the current tick and are retried by the scheduler;
//! protocol invariant violations are fatal for the transmission and are
//! surfaced, never swallowed.

use portage_core::crypto::CryptoError;
use portage_core::frame::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The shared cancellation signal fired mid-tick.
    #[error("job cancelled")]
    Cancelled,

    /// A box reported pending work but a dequeue returned nothing.
    /// Each box has exactly one consumer, so this cannot happen legally.
    #[error("expected-nonempty dequeue returned empty on box {box_id}")]
    EmptyDequeue { box_id: u32 },

    /// Fragment gathering ran out its retry budget mid-transmission.
    #[error("could not dequeue next fragment from box {box_id} within {budget_ms}ms")]
    GatherBudgetExhausted { box_id: u32, budget_ms: u64 },

    /// Fragments left the box out of sequence order.
    #[error("fragment out of order: expected number {expected}, got {got}")]
    BadFragmentOrder { expected: u32, got: u32 },

    /// Reply length is not a multiple of the expected per-frame length.
    #[error("invalid amount of data: reply of {len} bytes is not a multiple of frame length {frame_len}")]
    InvalidReplyLength { len: usize, frame_len: usize },

    /// A peer declared a transfer larger than the configured maximum.
    /// Rejected before any buffer is sized from the declaration.
    #[error("declared transfer of {len} bytes exceeds the {max}-byte maximum")]
    TransferTooLarge { len: usize, max: usize },

    /// An answer frame routed to a box id outside the configured set.
    #[error("answer box id {box_id} out of range (configured boxes: {boxes})")]
    AnswerBoxOutOfRange { box_id: u32, boxes: usize },

    /// An answer box stayed full past the queue-wait retry bound.
    #[error("answer box {box_id} full past the queue-wait timeout")]
    AnswerBoxFull { box_id: u32 },

    /// Block length leaves no room for payload after security overhead.
    #[error("block length {block_len} too small for security overhead {overhead}")]
    BlockTooSmall { block_len: u32, overhead: usize },

    /// Job constructed with the wrong transport for its variant — a bug.
    #[error("transport does not match job variant — this is a bug")]
    TransportMismatch,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Fatal errors stop the job; non-fatal ones end the tick and the
    /// scheduler retries. Only transport errors are retryable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::Io(_))
    }
}
