/*!
 * Pending Results
 * Futures handed out by remote calls, resolved once by the drain
 */

use crate::core::errors::RpcError;
use crate::core::types::{CallId, EndpointId, RpcResult};
use crate::protocol::{ReturnType, Value, WireArg};
use std::fmt;
use std::sync::{Arc, OnceLock};

struct PendingInner {
    origin: EndpointId,
    call_id: CallId,
    function: String,
    ret: ReturnType,
    outcome: OnceLock<Result<Value, String>>,
}

/// Handle to the result of a remote call
///
/// Cheap to clone; all clones observe the same outcome. The outcome is set
/// exactly once, either to the returned value or to the peer's error text.
#[derive(Clone)]
pub struct PendingResult {
    inner: Arc<PendingInner>,
}

impl PendingResult {
    pub(crate) fn new(
        origin: EndpointId,
        call_id: CallId,
        function: impl Into<String>,
        ret: ReturnType,
    ) -> Self {
        Self {
            inner: Arc::new(PendingInner {
                origin,
                call_id,
                function: function.into(),
                ret,
                outcome: OnceLock::new(),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.inner.call_id
    }

    /// Name of the remote function this call targets
    #[must_use]
    pub fn function(&self) -> &str {
        &self.inner.function
    }

    pub(crate) fn ret(&self) -> &ReturnType {
        &self.inner.ret
    }

    /// Whether a value has arrived
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Ok(_)))
    }

    /// Whether the peer answered with an exception
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Err(_)))
    }

    /// The resolved value
    ///
    /// Fails with `NotResolved` before the answer is drained, and with
    /// `Remote` if the call raised on the peer. Repeated reads return the
    /// same cached value.
    pub fn get(&self) -> RpcResult<Value> {
        match self.inner.outcome.get() {
            None => Err(RpcError::NotResolved {
                call_id: self.inner.call_id,
            }),
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(text)) => Err(RpcError::Remote {
                messages: vec![text.clone()],
            }),
        }
    }

    /// Borrow the resolved value without cloning
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self.inner.outcome.get() {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn resolve(&self, value: Value) -> bool {
        self.inner.outcome.set(Ok(value)).is_ok()
    }

    pub(crate) fn fail(&self, text: String) -> bool {
        self.inner.outcome.set(Err(text)).is_ok()
    }

    /// Encode as a call argument
    ///
    /// A resolved future travels as its value, an unresolved one as a
    /// reference to its call id, which the peer substitutes from its own
    /// result cache. Only the issuing endpoint's peer holds that cache, so
    /// an unresolved future cannot be passed through another endpoint.
    pub(crate) fn to_wire(&self, endpoint: EndpointId) -> RpcResult<WireArg> {
        match self.inner.outcome.get() {
            None if self.inner.origin != endpoint => Err(RpcError::Pack(format!(
                "unresolved result of call {} to '{}' belongs to another endpoint",
                self.inner.call_id, self.inner.function
            ))),
            None => Ok(WireArg::Reference(self.inner.call_id)),
            Some(Ok(value)) => Ok(WireArg::Value(value.clone())),
            Some(Err(text)) => Err(RpcError::Remote {
                messages: vec![text.clone()],
            }),
        }
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("call_id", &self.inner.call_id)
            .field("function", &self.inner.function)
            .field("outcome", &self.inner.outcome.get())
            .finish()
    }
}
