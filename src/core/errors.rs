/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use super::types::CallId;
use miette::Diagnostic;
use thiserror::Error;

/// Unified RPC error type
///
/// Three conditions matter to callers: `Timeout` (peer unresponsive, retry or
/// report), `Remote` (peer reported an application error, channel still usable)
/// and `Protocol` (state-machine invariant broken, treat as fatal).
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum RpcError {
    /// Polling exceeded the caller's timeout
    #[error(
        "Transport timed out after {elapsed_ms}ms (timeout: {}ms)",
        timeout_ms.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    #[diagnostic(
        code(rpc::timeout),
        help("The peer did not signal within the timeout. It may be down or busy; retry or reconnect.")
    )]
    Timeout {
        elapsed_ms: u64,
        timeout_ms: Option<u64>,
    },

    /// Doorbell or state-machine invariant violated
    #[error("Protocol error: {0}")]
    #[diagnostic(
        code(rpc::protocol),
        help("A protocol invariant was violated. This indicates a bug or corrupted shared memory; do not keep using the endpoint.")
    )]
    Protocol(String),

    /// One or more peer-side functions failed during the last drain
    #[error("Exception caught:\n{}", messages.join("\n\nException caught:\n"))]
    #[diagnostic(
        code(rpc::remote),
        help("The remote function raised an error. The channel remains usable.")
    )]
    Remote { messages: Vec<String> },

    /// Message kind tag not understood
    #[error("Unknown message kind: {0}")]
    #[diagnostic(
        code(rpc::unknown_message_kind),
        help("Both peers must run the same protocol version.")
    )]
    UnknownMessageKind(i64),

    /// Future read before its answer arrived
    #[error("Result of call {call_id} is not available yet")]
    #[diagnostic(
        code(rpc::not_resolved),
        help("Commit and wait until the answer has been drained before reading the result.")
    )]
    NotResolved { call_id: CallId },

    /// No function with this name is known
    #[error("Unknown function: {0}")]
    #[diagnostic(
        code(rpc::unknown_function),
        help("The peer has not announced this function yet. Drain its ADD_FUNCTION messages with wait() first.")
    )]
    UnknownFunction(String),

    /// Next call id is still waiting for its answer
    #[error("Call id {call_id} is still in flight")]
    #[diagnostic(
        code(rpc::call_id_in_use),
        help("65536 calls are unresolved at once. Drain answers before issuing more calls.")
    )]
    CallIdInUse { call_id: CallId },

    /// Argument or return value does not match its descriptor
    #[error("Packing failed: {0}")]
    #[diagnostic(code(rpc::pack), help("Check the argument types against the function's descriptor."))]
    Pack(String),

    /// Batch could not be encoded or decoded
    #[error("Serialization error: {0}")]
    #[diagnostic(code(rpc::serialization))]
    Serialization(String),

    /// Encoded batch does not fit the transport's buffer or frame limit
    #[error("Batch of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    #[diagnostic(
        code(rpc::capacity_exceeded),
        help("Bulk data must be chunked above the RPC layer.")
    )]
    CapacityExceeded { size: usize, capacity: usize },

    /// Shared-memory tag is not usable as an object name
    #[error("Invalid shared memory name: {0}")]
    #[diagnostic(code(rpc::invalid_name), help("Tags must be non-empty and must not contain '/'."))]
    InvalidName(String),

    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    #[diagnostic(code(rpc::io))]
    Io(String),

    /// Operating-system call failure (shm_open, mmap)
    #[error("OS error: {0}")]
    #[diagnostic(code(rpc::os))]
    Os(String),

    /// Peer closed the connection
    #[error("Peer disconnected")]
    #[diagnostic(code(rpc::disconnected), help("The peer closed its end of the socket."))]
    Disconnected,

    /// Endpoint behind a handle has been dropped
    #[error("Endpoint closed")]
    #[diagnostic(code(rpc::closed))]
    Closed,
}

impl RpcError {
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RpcError::Protocol(_) | RpcError::UnknownMessageKind(_)
        )
    }

    /// Build a protocol error from any displayable message
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        RpcError::Protocol(msg.into())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => RpcError::Disconnected,
            _ => RpcError::Io(err.to_string()),
        }
    }
}

impl From<super::bincode::BincodeError> for RpcError {
    fn from(err: super::bincode::BincodeError) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_aggregates_messages() {
        let err = RpcError::Remote {
            messages: vec!["first failure".to_string(), "second failure".to_string()],
        };
        let text = err.to_string();
        assert!(text.starts_with("Exception caught:\nfirst failure"));
        assert!(text.contains("\n\nException caught:\nsecond failure"));
        assert!(err.is_remote());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_display() {
        let err = RpcError::Timeout {
            elapsed_ms: 120,
            timeout_ms: Some(100),
        };
        assert_eq!(
            err.to_string(),
            "Transport timed out after 120ms (timeout: 100ms)"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_io_eof_maps_to_disconnected() {
        let err: RpcError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err, RpcError::Disconnected);

        let err: RpcError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, RpcError::Io(_)));
    }

    #[test]
    fn test_protocol_classification() {
        assert!(RpcError::protocol("bad doorbell").is_protocol());
        assert!(RpcError::UnknownMessageKind(9).is_protocol());
        assert!(!RpcError::Disconnected.is_protocol());
    }
}
