/*!
 * Binary Framing with bincode
 * Length-prefixed bincode frames shared by both transports
 */

use serde::{de::DeserializeOwned, Serialize};

/// Size of the little-endian length prefix in front of every frame
pub const FRAME_PREFIX_SIZE: usize = 4;

/// Size of the length bincode writes ahead of a sequence
pub const SEQ_PREFIX_SIZE: usize = 8;

/// Result type for bincode operations
pub type BincodeResult<T> = Result<T, BincodeError>;

/// Binary serialization errors
#[derive(Debug, thiserror::Error)]
pub enum BincodeError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Serialize to binary bytes using bincode
#[inline]
pub fn to_vec<T: Serialize>(value: &T) -> BincodeResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Deserialize from binary bytes produced by `to_vec`
#[inline]
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<T> {
    bincode::deserialize(bytes).map_err(|e| BincodeError::Deserialization(e.to_string()))
}

/// Encoded size of a value, without serializing it
#[inline]
pub fn serialized_size<T: Serialize>(value: &T) -> BincodeResult<usize> {
    bincode::serialized_size(value)
        .map(|n| n as usize)
        .map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Serialize into a frame
///
/// Format: [4-byte LE length][bincode data]
pub fn to_frame<T: Serialize>(value: &T) -> BincodeResult<Vec<u8>> {
    let data = to_vec(value)?;
    let len = u32::try_from(data.len()).map_err(|_| {
        BincodeError::Serialization(format!("Frame of {} bytes is too large", data.len()))
    })?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + data.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&data);

    Ok(frame)
}

/// Read the payload length announced by a frame prefix
pub fn frame_len(prefix: &[u8]) -> BincodeResult<usize> {
    match prefix.get(..FRAME_PREFIX_SIZE) {
        Some(&[a, b, c, d]) => Ok(u32::from_le_bytes([a, b, c, d]) as usize),
        _ => Err(BincodeError::Deserialization(
            "Buffer too small for size prefix".to_string(),
        )),
    }
}

/// Deserialize the frame at the start of `bytes`
///
/// Trailing bytes after the frame are ignored, which lets a shared region be
/// decoded in place. Returns the value and the total frame size.
pub fn from_frame<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<(T, usize)> {
    let len = frame_len(bytes)?;
    let end = FRAME_PREFIX_SIZE + len;

    let payload = bytes.get(FRAME_PREFIX_SIZE..end).ok_or_else(|| {
        BincodeError::Deserialization(format!(
            "Buffer too small: expected {} bytes, got {}",
            end,
            bytes.len()
        ))
    })?;

    Ok((from_slice(payload)?, end))
}
