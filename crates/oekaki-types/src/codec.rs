//! Binary codec for wire messages.
//!
//! Frames are delimited by the transport (`tokio-util`'s length-delimited
//! codec); the payload inside a frame is postcard. These two helpers are
//! the only place the encoding choice lives.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// A frame payload that failed to encode or decode.
#[derive(Error, Debug)]
#[error("codec error: {0}")]
pub struct CodecError(#[from] postcard::Error);

/// Encode a message into a frame payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(postcard::to_stdvec(value)?)
}

/// Decode a frame payload into a message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(postcard::from_bytes(bytes)?)
}
