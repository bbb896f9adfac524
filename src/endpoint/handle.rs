/*!
 * Invocation Handles
 * Named handles to functions announced by the peer
 */

use super::args::{Arg, ResultCallback};
use super::pending::PendingResult;
use super::{Endpoint, Inner};
use crate::core::errors::RpcError;
use crate::core::types::RpcResult;
use crate::protocol::Value;
use std::fmt;
use std::sync::Weak;

/// Callable reference to a remote function
///
/// Resolved by name at call time, so a re-announced function is picked up.
/// Holds the endpoint weakly; calls fail with `Closed` once it is dropped.
#[derive(Clone)]
pub struct RemoteFunction {
    endpoint: Weak<Inner>,
    name: String,
}

impl RemoteFunction {
    pub(crate) fn new(endpoint: Weak<Inner>, name: impl Into<String>) -> Self {
        Self {
            endpoint,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> RpcResult<Endpoint> {
        self.endpoint
            .upgrade()
            .map(Endpoint::from_inner)
            .ok_or(RpcError::Closed)
    }

    /// Queue a call; the returned future resolves after commit and wait
    pub fn call(&self, args: Vec<Arg>) -> RpcResult<PendingResult> {
        self.endpoint()?.call_remote(&self.name, args, None)
    }

    /// Queue a call and run `on_result` with the value once it arrives
    pub fn call_with<F>(&self, args: Vec<Arg>, on_result: F) -> RpcResult<PendingResult>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let callback: ResultCallback = Box::new(on_result);
        self.endpoint()?
            .call_remote(&self.name, args, Some(callback))
    }
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("open", &(self.endpoint.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_handle_reports_closed() {
        let handle = RemoteFunction::new(Weak::new(), "add");
        assert_eq!(handle.name(), "add");
        assert_eq!(handle.call(Vec::new()).unwrap_err(), RpcError::Closed);
    }
}
