/*!
 * Core Types
 * Common types used across transports and endpoints
 */

use serde::{Deserialize, Serialize};

/// Call identifier, wraps modulo 65536 and is unique only while in flight
pub type CallId = u16;

/// Endpoint-local function identifier, assigned sequentially and never reused
pub type FunctionId = u32;

/// Process-local endpoint serial, tags the futures an endpoint issues
pub type EndpointId = u64;

/// Common result type for RPC operations
pub type RpcResult<T> = Result<T, super::errors::RpcError>;

/// Which side of a pairing an endpoint plays
///
/// The client sends first; on shared memory the role also decides which
/// region is read and which is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Log prefix, `[server]` or `[client]`
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Role::Server => "[server]",
            Role::Client => "[client]",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_label() {
        assert_eq!(Role::Client.to_string(), "[client]");
        assert_eq!(Role::Server.label(), "[server]");
    }
}
