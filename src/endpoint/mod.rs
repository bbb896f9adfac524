/*!
 * Endpoint
 *
 * One side of an RPC pairing. Owns a transport, the local and remote
 * function tables, in-flight calls and queued inbound calls. All state sits
 * behind one reentrant lock, so application threads may register functions
 * and issue calls while another thread drives `wait`/`commit`.
 *
 * User code (local functions and result callbacks) always runs with the lock
 * held but the state released, which lets it call back into the endpoint.
 */

mod args;
mod cache;
mod dispatch;
mod functions;
mod handle;
mod pending;

pub use args::{Arg, ArgError, Args, LocalFn, Param, ResultCallback};
pub use handle::RemoteFunction;
pub use pending::PendingResult;

use crate::core::config::EndpointConfig;
use crate::core::errors::RpcError;
use crate::core::types::{CallId, FunctionId, Role, RpcResult};
use crate::monitoring::{span_call, span_drain, TransportStats};
use crate::protocol::{FunctionDescriptor, Params, ReturnType, Value};
use crate::transport::{self, PollableSocket, SocketTransport, Transport};
use dispatch::{EndpointState, PreparedCall};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::any::Any;
use std::cell::{RefCell, RefMut};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{info, instrument, warn};

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<EndpointState>>;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) struct Inner {
    role: Role,
    config: EndpointConfig,
    state: ReentrantMutex<RefCell<EndpointState>>,
    serving: AtomicBool,
}

/// Handle to one side of a pairing
///
/// Clones share the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

/// Non-owning endpoint handle for closures registered on the endpoint itself
#[derive(Clone)]
pub struct WeakEndpoint {
    inner: Weak<Inner>,
}

impl WeakEndpoint {
    pub fn upgrade(&self) -> Option<Endpoint> {
        self.inner.upgrade().map(Endpoint::from_inner)
    }
}

fn borrow_state<'a>(guard: &'a StateGuard<'_>) -> RpcResult<RefMut<'a, EndpointState>> {
    guard
        .try_borrow_mut()
        .map_err(|_| RpcError::protocol("endpoint re-entered while its state is borrowed"))
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a local function, turning errors and panics into answer text
fn run_local(call: PreparedCall, call_id: CallId) -> Result<Value, String> {
    let PreparedCall { name, func, args, .. } = call;
    match catch_unwind(AssertUnwindSafe(|| func(args))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("Error in '{}' (call {}): {:?}", name, call_id, e)),
        Err(payload) => Err(format!(
            "Panic in '{}' (call {}): {}",
            name,
            call_id,
            panic_text(payload)
        )),
    }
}

impl Endpoint {
    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    /// Wrap an already connected transport
    pub fn with_transport(
        role: Role,
        transport: Box<dyn Transport>,
        config: EndpointConfig,
    ) -> Self {
        let id = NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed);
        let state = EndpointState::new(id, role, transport, config.result_cache_capacity);
        Self {
            inner: Arc::new(Inner {
                role,
                config,
                state: ReentrantMutex::new(RefCell::new(state)),
                serving: AtomicBool::new(false),
            }),
        }
    }

    /// Pair over shared memory, configured from the environment
    ///
    /// Blocks until the peer maps the same `tag`/`session`, failing with
    /// `Timeout` after `timeout`.
    #[cfg(unix)]
    pub fn shared_memory(
        role: Role,
        tag: &str,
        session: u32,
        timeout: Option<Duration>,
    ) -> RpcResult<Self> {
        Self::shared_memory_with_config(role, tag, session, timeout, EndpointConfig::from_env())
    }

    #[cfg(unix)]
    pub fn shared_memory_with_config(
        role: Role,
        tag: &str,
        session: u32,
        timeout: Option<Duration>,
        config: EndpointConfig,
    ) -> RpcResult<Self> {
        let transport =
            transport::SharedMemoryTransport::connect(role, tag, session, timeout, &config)?;
        info!(role = %role, tag, session, "Shared memory endpoint ready");
        Ok(Self::with_transport(role, Box::new(transport), config))
    }

    /// Pair over an already connected socket
    pub fn socket<S: PollableSocket>(role: Role, socket: S) -> RpcResult<Self> {
        Self::socket_with_config(role, socket, EndpointConfig::from_env())
    }

    pub fn socket_with_config<S: PollableSocket>(
        role: Role,
        socket: S,
        config: EndpointConfig,
    ) -> RpcResult<Self> {
        let transport = SocketTransport::new(role, socket)?;
        Ok(Self::with_transport(role, Box::new(transport), config))
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a local function and queue its announcement to the peer
    pub fn add_function<F>(
        &self,
        name: &str,
        params: Params,
        ret: ReturnType,
        func: F,
    ) -> RpcResult<FunctionId>
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let guard = self.inner.state.lock();
        let mut state = borrow_state(&guard)?;
        state.register_local(name, params, ret, Arc::new(func))
    }

    /// Handle to a function the peer has announced
    pub fn remote(&self, name: &str) -> RpcResult<RemoteFunction> {
        if !self.has_remote(name) {
            return Err(RpcError::UnknownFunction(name.to_string()));
        }
        Ok(RemoteFunction::new(Arc::downgrade(&self.inner), name))
    }

    #[must_use]
    pub fn has_remote(&self, name: &str) -> bool {
        let guard = self.inner.state.lock();
        let found = guard
            .try_borrow()
            .map(|state| state.remote.contains_name(name))
            .unwrap_or(false);
        found
    }

    /// Snapshot of the remote table, sorted by id
    pub fn remote_functions(&self) -> RpcResult<Vec<FunctionDescriptor>> {
        let guard = self.inner.state.lock();
        let state = borrow_state(&guard)?;
        Ok(state.remote.descriptors())
    }

    /// Snapshot of the local table, sorted by id
    pub fn local_functions(&self) -> RpcResult<Vec<FunctionDescriptor>> {
        let guard = self.inner.state.lock();
        let state = borrow_state(&guard)?;
        Ok(state.local.descriptors())
    }

    /// Queue a call to `name`; shorthand for `remote(name)?.call(args)`
    pub fn call(&self, name: &str, args: Vec<Arg>) -> RpcResult<PendingResult> {
        self.call_remote(name, args, None)
    }

    pub(crate) fn call_remote(
        &self,
        name: &str,
        args: Vec<Arg>,
        on_result: Option<ResultCallback>,
    ) -> RpcResult<PendingResult> {
        let guard = self.inner.state.lock();
        let mut state = borrow_state(&guard)?;
        state.queue_call(name, args, on_result)
    }

    /// Execute queued inbound calls and queue their answers
    ///
    /// Returns the number of calls executed.
    #[instrument(skip(self), fields(role = %self.inner.role))]
    pub fn perform_remote_call_requests(&self) -> RpcResult<usize> {
        let guard = self.inner.state.lock();
        let requests = std::mem::take(&mut borrow_state(&guard)?.inbound);
        let executed = requests.len();
        let weak = Arc::downgrade(&self.inner);

        for request in requests {
            let call_id = request.call_id;
            let prepared = borrow_state(&guard)?.prepare(request, &weak);

            let (ret, outcome) = match prepared {
                Ok(call) => {
                    let span = span_call(self.inner.role, &call.name, call_id);
                    let _entered = span.enter();
                    let ret = call.ret.clone();
                    (ret, run_local(call, call_id))
                }
                Err(text) => (None, Err(text)),
            };

            borrow_state(&guard)?.answer(call_id, &ret, outcome)?;
        }
        Ok(executed)
    }

    /// Wait for the peer, drain its messages and run inbound calls
    pub fn wait(&self, timeout: Option<Duration>) -> RpcResult<usize> {
        self.wait_with(timeout, true)
    }

    /// Wait for the peer and drain its messages
    ///
    /// Announcements update the remote table, answers resolve their futures
    /// and inbound calls are queued (and executed when `auto_call` is set).
    /// Exceptions reported by the peer are collected and returned together
    /// as one `Remote` error after the whole batch has been processed.
    pub fn wait_with(&self, timeout: Option<Duration>, auto_call: bool) -> RpcResult<usize> {
        let (guard, count) = transport::wait(
            &self.inner.state,
            timeout,
            self.inner.config.poll_interval,
            |state| state.transport.poll_ready(),
        )?;
        let span = span_drain(self.inner.role, count);
        let _entered = span.enter();

        let drained = borrow_state(&guard)?.drain(count)?;

        for (callback, value) in drained.callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(value))) {
                warn!(
                    role = %self.inner.role,
                    panic = %panic_text(payload),
                    "Result callback panicked"
                );
            }
        }

        if auto_call {
            self.perform_remote_call_requests()?;
        }
        drop(guard);

        if drained.exceptions.is_empty() {
            Ok(count)
        } else {
            warn!(
                role = %self.inner.role,
                count = drained.exceptions.len(),
                "Exceptions occurred on the peer"
            );
            Err(RpcError::Remote {
                messages: drained.exceptions,
            })
        }
    }

    /// Publish queued messages to the peer
    #[instrument(skip(self), fields(role = %self.inner.role))]
    pub fn commit(&self) -> RpcResult<()> {
        let guard = self.inner.state.lock();
        let mut state = borrow_state(&guard)?;
        state.transport.commit()
    }

    /// Alternate `wait(None)` and `commit()` until `stop_serving`
    ///
    /// Remote exceptions are logged and do not end the loop; any other error
    /// does.
    pub fn serve_forever(&self) -> RpcResult<()> {
        self.inner.serving.store(true, Ordering::SeqCst);
        info!(role = %self.inner.role, "Serving");

        while self.inner.serving.load(Ordering::SeqCst) {
            match self.wait(None) {
                Ok(_) => {}
                Err(RpcError::Remote { messages }) => {
                    for message in &messages {
                        warn!(
                            role = %self.inner.role,
                            error = %message,
                            "Remote exception while serving"
                        );
                    }
                }
                Err(e) => return Err(e),
            }
            self.commit()?;
        }

        info!(role = %self.inner.role, "Stopped serving");
        Ok(())
    }

    /// Make `serve_forever` return after its current iteration
    pub fn stop_serving(&self) {
        self.inner.serving.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.inner.serving.load(Ordering::SeqCst)
    }

    /// Buffer usage and traffic counters of the transport
    pub fn statistics(&self) -> RpcResult<TransportStats> {
        let guard = self.inner.state.lock();
        let state = borrow_state(&guard)?;
        Ok(state.transport.stats())
    }

    /// Calls still waiting for an answer
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let guard = self.inner.state.lock();
        let count = guard.try_borrow().map(|s| s.in_flight.len()).unwrap_or(0);
        count
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.inner.role)
            .field("serving", &self.is_serving())
            .finish()
    }
}
