/*!
 * Batch Stream
 * Buffered object stream serialized as one frame per commit
 */

use crate::core::bincode::{
    from_frame, serialized_size, to_frame, FRAME_PREFIX_SIZE, SEQ_PREFIX_SIZE,
};
use crate::core::errors::RpcError;
use crate::core::types::RpcResult;
use crate::protocol::{Value, WireArg};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One primitive written to the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Args(Vec<WireArg>),
    Value(Value),
}

impl Item {
    fn kind(&self) -> &'static str {
        match self {
            Item::Int(_) => "int",
            Item::Str(_) => "str",
            Item::Bytes(_) => "bytes",
            Item::Args(_) => "args",
            Item::Value(_) => "value",
        }
    }
}

/// Outbound items queued until commit, inbound items drained by reads
#[derive(Debug, Default)]
pub struct BatchStream {
    outbound: Vec<Item>,
    inbound: VecDeque<Item>,
    completed: usize,
    /// Leading outbound items already counted in `measured_size`
    measured: usize,
    measured_size: usize,
}

/// Outbound state to return to when a message cannot be queued whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    items: usize,
    size: usize,
    completed: usize,
}

macro_rules! next_as {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&mut self) -> RpcResult<$ty> {
            match self.next()? {
                Item::$variant(v) => Ok(v),
                other => Err(RpcError::protocol(format!(
                    "expected {} item, found {}",
                    stringify!($variant).to_lowercase(),
                    other.kind()
                ))),
            }
        }
    };
}

impl BatchStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.outbound.push(item);
    }

    /// Mark the items written since the last mark as one complete message
    pub fn mark_complete(&mut self) {
        self.completed += 1;
    }

    /// Complete messages queued for the next commit
    #[inline]
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    #[inline]
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    #[inline]
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Serialize the queued items as one length-prefixed frame
    ///
    /// The queue is left untouched so a failed publish loses nothing.
    pub fn encode_outbound(&self) -> RpcResult<Vec<u8>> {
        Ok(to_frame(&self.outbound)?)
    }

    /// Size of the frame `encode_outbound` would produce
    ///
    /// Items are sized once, as they are first seen here.
    pub fn encoded_len(&mut self) -> RpcResult<usize> {
        for item in &self.outbound[self.measured..] {
            self.measured_size += serialized_size(item)?;
        }
        self.measured = self.outbound.len();
        Ok(FRAME_PREFIX_SIZE + SEQ_PREFIX_SIZE + self.measured_size)
    }

    pub fn checkpoint(&mut self) -> RpcResult<Checkpoint> {
        self.encoded_len()?;
        Ok(Checkpoint {
            items: self.outbound.len(),
            size: self.measured_size,
            completed: self.completed,
        })
    }

    /// Drop everything queued after `checkpoint`
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.outbound.truncate(checkpoint.items);
        self.measured = checkpoint.items;
        self.measured_size = checkpoint.size;
        self.completed = checkpoint.completed;
    }

    /// Forget the queued items after a successful publish
    pub fn clear_outbound(&mut self) {
        self.outbound.clear();
        self.completed = 0;
        self.measured = 0;
        self.measured_size = 0;
    }

    /// Decode a frame and append its items to the inbound queue
    ///
    /// Returns the number of bytes consumed.
    pub fn load(&mut self, bytes: &[u8]) -> RpcResult<usize> {
        if !self.inbound.is_empty() {
            return Err(RpcError::protocol(format!(
                "{} unread item(s) left from the previous batch",
                self.inbound.len()
            )));
        }
        let (items, consumed): (Vec<Item>, usize) = from_frame(bytes)?;
        self.inbound.extend(items);
        Ok(consumed)
    }

    /// Pop the next inbound item
    pub fn next(&mut self) -> RpcResult<Item> {
        self.inbound
            .pop_front()
            .ok_or_else(|| RpcError::protocol("read past the end of the batch"))
    }

    /// Drop unread inbound items, returning how many were discarded
    pub fn discard_inbound(&mut self) -> usize {
        let n = self.inbound.len();
        self.inbound.clear();
        n
    }

    next_as!(next_int, Int, i64);
    next_as!(next_str, Str, String);
    next_as!(next_bytes, Bytes, Vec<u8>);
    next_as!(next_args, Args, Vec<WireArg>);
    next_as!(next_value, Value, Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_batch_through_frame() {
        let mut writer = BatchStream::new();
        writer.push(Item::Int(1));
        writer.push(Item::Str("add".into()));
        writer.mark_complete();
        writer.push(Item::Args(vec![WireArg::Reference(9)]));
        writer.mark_complete();
        assert_eq!(writer.completed(), 2);

        let mut frame = writer.encode_outbound().unwrap();
        let frame_size = frame.len();
        frame.extend_from_slice(&[0u8; 16]);

        let mut reader = BatchStream::new();
        assert_eq!(reader.load(&frame).unwrap(), frame_size);
        assert_eq!(reader.next_int().unwrap(), 1);
        assert_eq!(reader.next_str().unwrap(), "add");
        assert_eq!(reader.next_args().unwrap(), vec![WireArg::Reference(9)]);
        assert!(reader.next().unwrap_err().is_protocol());

        writer.clear_outbound();
        assert_eq!(writer.outbound_len(), 0);
        assert_eq!(writer.completed(), 0);
    }

    #[test]
    fn test_encoded_len_tracks_frame() {
        let mut writer = BatchStream::new();
        assert_eq!(writer.encoded_len().unwrap(), writer.encode_outbound().unwrap().len());

        writer.push(Item::Int(7));
        writer.push(Item::Bytes(vec![0u8; 300]));
        writer.mark_complete();
        let mark = writer.checkpoint().unwrap();
        let before = writer.encoded_len().unwrap();
        assert_eq!(before, writer.encode_outbound().unwrap().len());

        writer.push(Item::Str("dropped".into()));
        writer.push(Item::Value(Value::Bytes(vec![1u8; 1000])));
        writer.mark_complete();
        assert!(writer.encoded_len().unwrap() > before + 1000);

        writer.rollback(mark);
        assert_eq!(writer.outbound_len(), 2);
        assert_eq!(writer.completed(), 1);
        assert_eq!(writer.encoded_len().unwrap(), before);
        assert_eq!(writer.encode_outbound().unwrap().len(), before);

        writer.clear_outbound();
        assert_eq!(writer.encoded_len().unwrap(), writer.encode_outbound().unwrap().len());
    }

    #[test]
    fn test_wrong_kind_is_protocol_error() {
        let mut writer = BatchStream::new();
        writer.push(Item::Bytes(vec![1, 2]));
        let frame = writer.encode_outbound().unwrap();

        let mut reader = BatchStream::new();
        reader.load(&frame).unwrap();
        let err = reader.next_int().unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ref m) if m.contains("found bytes")));
    }

    #[test]
    fn test_load_rejects_unread_leftovers() {
        let mut writer = BatchStream::new();
        writer.push(Item::Int(5));
        let frame = writer.encode_outbound().unwrap();

        let mut reader = BatchStream::new();
        reader.load(&frame).unwrap();
        assert!(reader.load(&frame).unwrap_err().is_protocol());
        assert_eq!(reader.discard_inbound(), 1);
        reader.load(&frame).unwrap();
    }
}
