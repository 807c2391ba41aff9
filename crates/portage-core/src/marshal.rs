//! Marshall provider — typed values in and out of payload bytes.
//!
//! Sits above the mailbox layer: applications marshal a value, fragment the
//! bytes, and enqueue the frames. The engine itself never marshals.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::frame::{self, FrameError, Message};

/// Serializes typed values to and from payload byte sequences.
pub trait Marshaller {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, MarshalError>;
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError>;
}

/// JSON marshaller. Both peers must use the same marshaller.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, MarshalError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Marshal a value and fragment the result into mailbox-ready frames.
pub fn marshal_into_frames<M, T>(
    marshaller: &M,
    value: &T,
    block_len: u32,
    box_id: u32,
) -> Result<Vec<Message>, MarshalError>
where
    M: Marshaller,
    T: Serialize,
{
    let bytes = marshaller.marshal(value)?;
    Ok(frame::fragment(&bytes, block_len, box_id)?)
}

/// Reassemble a complete transmission and unmarshal its payload.
pub fn unmarshal_from_frames<M, T>(marshaller: &M, frames: &[Message]) -> Result<T, MarshalError>
where
    M: Marshaller,
    T: DeserializeOwned,
{
    let payload = frame::reassemble(frames)?;
    marshaller.unmarshal(&payload)
}

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
