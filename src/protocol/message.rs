/*!
 * Wire Messages
 * Message kind tags and the encoded forms of arguments and announcements
 */

use super::descriptor::{Params, ReturnType};
use super::value::Value;
use crate::core::errors::RpcError;
use crate::core::types::{CallId, FunctionId};
use serde::{Deserialize, Serialize};

/// Leading tag of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum MessageKind {
    /// `{id, name, params, ret}` announcement of a local function
    AddFunction = 0,
    /// `{call_id, function_id, packed_args}`
    RemoteCall = 1,
    /// `{call_id, status, packed_return_or_error_text}`
    RemoteAnswer = 2,
}

impl TryFrom<i64> for MessageKind {
    type Error = RpcError;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(MessageKind::AddFunction),
            1 => Ok(MessageKind::RemoteCall),
            2 => Ok(MessageKind::RemoteAnswer),
            other => Err(RpcError::UnknownMessageKind(other)),
        }
    }
}

impl From<MessageKind> for i64 {
    fn from(kind: MessageKind) -> Self {
        kind as i64
    }
}

/// Outcome tag of a `RemoteAnswer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum AnswerStatus {
    Ok = 0,
    Exc = 1,
}

impl TryFrom<i64> for AnswerStatus {
    type Error = RpcError;

    fn try_from(tag: i64) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(AnswerStatus::Ok),
            1 => Ok(AnswerStatus::Exc),
            other => Err(RpcError::protocol(format!("unknown answer status {}", other))),
        }
    }
}

impl From<AnswerStatus> for i64 {
    fn from(status: AnswerStatus) -> Self {
        status as i64
    }
}

/// Opaque reference to a function the sender registered for a callback slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRef {
    pub id: FunctionId,
    pub params: Params,
    pub ret: ReturnType,
}

/// Encoded argument
///
/// The encoder decides per argument: a concrete value, the call id of a
/// result the receiver already holds, or a callable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireArg {
    Value(Value),
    Reference(CallId),
    Function(FunctionRef),
}

impl From<Value> for WireArg {
    fn from(value: Value) -> Self {
        WireArg::Value(value)
    }
}

/// Function table entry, sent as the body of an `AddFunction` message
///
/// Ids are assigned by the registering endpoint and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: FunctionId,
    pub name: String,
    pub params: Params,
    pub ret: ReturnType,
}

impl FunctionDescriptor {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RpcError> {
        Ok(crate::core::bincode::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        Ok(crate::core::bincode::from_slice(bytes)?)
    }
}
