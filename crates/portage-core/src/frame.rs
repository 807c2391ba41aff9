//! Portage frame format — the on-wire unit of every transmission.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format; both peers must run the same layout. All header fields are
//! little-endian and #[repr(C, packed)] for deterministic layout, using
//! zerocopy derives for safe, allocation-free serialization. There is no
//! unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

type U32Le = U32<LittleEndian>;

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Header preceding every frame payload.
///
/// The receiver can fully size and route a frame from the header alone,
/// before touching a single payload byte.
///
/// Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// 1-based sequence number within a transmission.
    pub number: U32Le,

    /// Total frame count of the transmission this frame belongs to.
    /// Invariant: 1 <= number <= amount.
    pub amount: U32Le,

    /// Payload length in bytes, not including this header.
    pub data_len: U32Le,

    /// Fixed per-frame block length the producer fragmented against.
    /// data_len never exceeds this.
    pub block_len: U32Le,

    /// Box-routing identifier. 0 = unrouted.
    pub box_id: U32Le,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 20]);

/// Encoded size of a FrameHeader.
pub const HEADER_LEN: usize = 20;

// ── Message ──────────────────────────────────────────────────────────────────

/// One protocol frame: header fields plus payload bytes.
///
/// Encodes and decodes losslessly via [`Message::to_bytes`] and
/// [`Message::from_bytes`]. Fragmentation of oversized payloads happens in
/// [`fragment`] before messages enter a mailbox; the engine consumes the
/// sequencing invariant but never recomputes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub number: u32,
    pub amount: u32,
    pub block_len: u32,
    pub box_id: u32,
    pub payload: Bytes,
}

impl Message {
    /// Build a single-frame message (number 1 of 1).
    pub fn single(payload: Bytes, block_len: u32, box_id: u32) -> Result<Self, FrameError> {
        if payload.len() > block_len as usize {
            return Err(FrameError::BlockOverflow {
                data_len: payload.len(),
                block_len,
            });
        }
        Ok(Self {
            number: 1,
            amount: 1,
            block_len,
            box_id,
            payload,
        })
    }

    /// True for the last frame of its transmission.
    pub fn is_last(&self) -> bool {
        self.number == self.amount
    }

    /// Encode: header followed by payload. Deterministic.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = FrameHeader {
            number: U32Le::new(self.number),
            amount: U32Le::new(self.amount),
            data_len: U32Le::new(self.payload.len() as u32),
            block_len: U32Le::new(self.block_len),
            box_id: U32Le::new(self.box_id),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a buffer produced by [`Message::to_bytes`].
    ///
    /// Fails if the buffer length disagrees with the declared payload
    /// length, if the payload overflows the declared block length, or if
    /// the sequencing fields violate `1 <= number <= amount`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::read_from_prefix(buf).ok_or(FrameError::Truncated {
            got: buf.len(),
            need: HEADER_LEN,
        })?;

        let number = header.number.get();
        let amount = header.amount.get();
        let data_len = header.data_len.get() as usize;
        let block_len = header.block_len.get();

        if buf.len() != HEADER_LEN + data_len {
            return Err(FrameError::LengthMismatch {
                declared: data_len,
                got: buf.len() - HEADER_LEN,
            });
        }
        if data_len > block_len as usize {
            return Err(FrameError::BlockOverflow { data_len, block_len });
        }
        if number == 0 || number > amount {
            return Err(FrameError::BadSequence { number, amount });
        }

        Ok(Self {
            number,
            amount,
            block_len,
            box_id: header.box_id.get(),
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        })
    }
}

// ── Fragmentation ────────────────────────────────────────────────────────────

/// Split an oversized payload into frames `1..=N` sharing `amount = N`.
///
/// Each frame carries at most `block_len` payload bytes. An empty payload
/// yields one empty frame so the transmission still exists on the wire.
/// Performed by the producer before messages enter a mailbox.
pub fn fragment(payload: &[u8], block_len: u32, box_id: u32) -> Result<Vec<Message>, FrameError> {
    if block_len == 0 {
        return Err(FrameError::ZeroBlockLength);
    }

    let chunk = block_len as usize;
    let amount = payload.len().div_ceil(chunk).max(1) as u32;

    let mut frames = Vec::with_capacity(amount as usize);
    if payload.is_empty() {
        frames.push(Message {
            number: 1,
            amount: 1,
            block_len,
            box_id,
            payload: Bytes::new(),
        });
        return Ok(frames);
    }

    for (i, slice) in payload.chunks(chunk).enumerate() {
        frames.push(Message {
            number: i as u32 + 1,
            amount,
            block_len,
            box_id,
            payload: Bytes::copy_from_slice(slice),
        });
    }
    Ok(frames)
}

/// Reassemble a complete in-order transmission back into its payload.
///
/// The inverse of [`fragment`]: frames must arrive in sequence-number order
/// and agree on `amount`. Gaps, reordering, and short sets are rejected.
pub fn reassemble(frames: &[Message]) -> Result<Bytes, FrameError> {
    let first = frames.first().ok_or(FrameError::EmptyTransmission)?;
    let amount = first.amount;

    if frames.len() != amount as usize {
        return Err(FrameError::IncompleteTransmission {
            got: frames.len(),
            amount,
        });
    }

    let mut out = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        let expected = i as u32 + 1;
        if frame.number != expected || frame.amount != amount {
            return Err(FrameError::BadSequence {
                number: frame.number,
                amount: frame.amount,
            });
        }
        out.extend_from_slice(&frame.payload);
    }
    Ok(Bytes::from(out))
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors arising from frame encoding, decoding, or transmission assembly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for frame header: got {got}, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("declared payload length {declared} disagrees with buffer ({got} payload bytes)")]
    LengthMismatch { declared: usize, got: usize },

    #[error("payload length {data_len} exceeds block length {block_len}")]
    BlockOverflow { data_len: usize, block_len: u32 },

    #[error("invalid sequence: number {number} of amount {amount}")]
    BadSequence { number: u32, amount: u32 },

    #[error("block length must be non-zero")]
    ZeroBlockLength,

    #[error("transmission has no frames")]
    EmptyTransmission,

    #[error("transmission incomplete: {got} frames of declared {amount}")]
    IncompleteTransmission { got: usize, amount: u32 },
}

// ── Tests ────────────────────────────────────────────────────────────────────
