/*!
 * Message Dispatch
 *
 * Endpoint state behind the lock: function tables, in-flight calls, queued
 * inbound calls and the local result cache. Everything here runs with the
 * state borrowed, so nothing in this module calls user code.
 */

use super::args::{Arg, Args, LocalFn, Param, ResultCallback};
use super::cache::ResultCache;
use super::functions::{FunctionTable, LocalFunction};
use super::handle::RemoteFunction;
use super::pending::PendingResult;
use super::Inner;
use crate::core::errors::RpcError;
use crate::core::limits::CALLBACK_NAME_PREFIX;
use crate::core::types::{CallId, EndpointId, FunctionId, Role, RpcResult};
use crate::protocol::{
    AnswerStatus, ArgType, FunctionDescriptor, FunctionRef, MessageKind, Params, ReturnType, Value,
    WireArg,
};
use crate::transport::Transport;
use ahash::AHashMap;
use std::sync::Weak;
use tracing::{debug, warn};

/// Call waiting for its answer
pub(crate) struct CallRecord {
    pub pending: PendingResult,
    pub on_result: Option<ResultCallback>,
}

/// Call received from the peer, not yet executed
pub(crate) struct InboundCall {
    pub call_id: CallId,
    pub function_id: FunctionId,
    /// Decoded arguments, or the reason the call cannot run
    pub args: Result<Vec<WireArg>, String>,
}

/// Inbound call ready to execute outside the state borrow
pub(crate) struct PreparedCall {
    pub name: String,
    pub ret: ReturnType,
    pub func: LocalFn,
    pub args: Args,
}

/// Side effects of a drain to run once the state borrow is released
#[derive(Default)]
pub(crate) struct Drained {
    pub exceptions: Vec<String>,
    pub callbacks: Vec<(ResultCallback, Value)>,
}

pub(crate) struct EndpointState {
    pub id: EndpointId,
    pub role: Role,
    pub transport: Box<dyn Transport>,
    pub local: FunctionTable<LocalFunction>,
    pub remote: FunctionTable<FunctionDescriptor>,
    pub in_flight: AHashMap<CallId, CallRecord>,
    pub inbound: Vec<InboundCall>,
    pub results: ResultCache,
    next_function_id: FunctionId,
    next_call_id: CallId,
}

fn read_id<T: TryFrom<i64>>(transport: &mut dyn Transport, what: &str) -> RpcResult<T> {
    let raw = transport.read_int()?;
    T::try_from(raw).map_err(|_| RpcError::protocol(format!("{} {} out of range", what, raw)))
}

impl EndpointState {
    pub fn new(
        id: EndpointId,
        role: Role,
        transport: Box<dyn Transport>,
        result_cache_capacity: usize,
    ) -> Self {
        Self {
            id,
            role,
            transport,
            local: FunctionTable::new(),
            remote: FunctionTable::new(),
            in_flight: AHashMap::new(),
            inbound: Vec::new(),
            results: ResultCache::new(result_cache_capacity),
            next_function_id: 0,
            next_call_id: 0,
        }
    }

    /// Register a local function and queue its announcement
    pub fn register_local(
        &mut self,
        name: &str,
        params: Params,
        ret: ReturnType,
        func: LocalFn,
    ) -> RpcResult<FunctionId> {
        let id = self.next_function_id;
        let descriptor = FunctionDescriptor {
            id,
            name: name.to_string(),
            params,
            ret,
        };
        self.write_checked(|state| state.announce(&descriptor))?;
        self.next_function_id += 1;

        debug!(role = %self.role, id, name, "Registered local function");
        self.local.insert(id, name, LocalFunction { descriptor, func });
        Ok(id)
    }

    fn announce(&mut self, descriptor: &FunctionDescriptor) -> RpcResult<()> {
        let body = descriptor.to_bytes()?;
        self.transport.write_int(MessageKind::AddFunction.into());
        self.transport.write_bytes(body);
        self.transport.inc();
        Ok(())
    }

    /// Run `write`, keeping its items only if the batch still fits the transport
    fn write_checked<F>(&mut self, write: F) -> RpcResult<()>
    where
        F: FnOnce(&mut Self) -> RpcResult<()>,
    {
        let mark = self.transport.stream().checkpoint()?;
        let written = write(&mut *self).and_then(|()| self.transport.check_capacity());
        if written.is_err() {
            self.transport.stream().rollback(mark);
        }
        written
    }

    /// Encode caller arguments and queue a `RemoteCall`
    ///
    /// Every argument is validated, and the batch size checked, before the
    /// call is kept, so a rejected call leaves neither stream items nor
    /// callback registrations nor an in-flight entry.
    pub fn queue_call(
        &mut self,
        name: &str,
        args: Vec<Arg>,
        on_result: Option<ResultCallback>,
    ) -> RpcResult<PendingResult> {
        let descriptor = self
            .remote
            .by_name(name)
            .cloned()
            .ok_or_else(|| RpcError::UnknownFunction(name.to_string()))?;

        let call_id = self.next_call_id;
        if self.in_flight.contains_key(&call_id) {
            return Err(RpcError::CallIdInUse { call_id });
        }

        let mut wire = Vec::with_capacity(args.len());
        let mut callbacks = Vec::new();
        for (index, arg) in args.into_iter().enumerate() {
            match arg {
                Arg::Value(value) => wire.push(WireArg::Value(value)),
                Arg::Pending(pending) => wire.push(pending.to_wire(self.id)?),
                Arg::Callback(func) => {
                    let params = match descriptor.params.slot(index) {
                        Some(ArgType::Callback(nested)) => Params::Exact(nested.clone()),
                        _ => Params::Any,
                    };
                    wire.push(WireArg::Function(FunctionRef {
                        id: 0,
                        params,
                        ret: None,
                    }));
                    callbacks.push((index, func));
                }
            }
        }
        descriptor.params.check(&wire)?;

        let mut registered = Vec::with_capacity(callbacks.len());
        for (index, func) in callbacks {
            if let Some(WireArg::Function(reference)) = wire.get_mut(index) {
                let id = self.next_function_id + registered.len() as FunctionId;
                reference.id = id;
                registered.push(LocalFunction {
                    descriptor: FunctionDescriptor {
                        id,
                        name: format!("{}{}", CALLBACK_NAME_PREFIX, id),
                        params: reference.params.clone(),
                        ret: None,
                    },
                    func,
                });
            }
        }

        self.write_checked(|state| {
            for callback in &registered {
                state.announce(&callback.descriptor)?;
            }
            state.transport.write_int(MessageKind::RemoteCall.into());
            state.transport.write_int(i64::from(call_id));
            state.transport.write_int(i64::from(descriptor.id));
            state.transport.pack(&descriptor.params, wire)?;
            state.transport.inc();
            Ok(())
        })?;

        self.next_function_id += registered.len() as FunctionId;
        for callback in registered {
            let (id, callback_name) = (callback.descriptor.id, callback.descriptor.name.clone());
            debug!(role = %self.role, id, name = %callback_name, "Registered callback");
            self.local.insert(id, &callback_name, callback);
        }

        let pending = PendingResult::new(self.id, call_id, name, descriptor.ret.clone());
        self.in_flight.insert(
            call_id,
            CallRecord {
                pending: pending.clone(),
                on_result,
            },
        );
        self.next_call_id = call_id.wrapping_add(1);

        debug!(role = %self.role, call_id, function = name, "Queued remote call");
        Ok(pending)
    }

    /// Process `count` ready messages from the transport
    pub fn drain(&mut self, count: usize) -> RpcResult<Drained> {
        let mut drained = Drained::default();

        for _ in 0..count {
            let kind = MessageKind::try_from(self.transport.read_int()?)?;
            match kind {
                MessageKind::AddFunction => self.receive_announcement()?,
                MessageKind::RemoteCall => self.receive_call()?,
                MessageKind::RemoteAnswer => self.receive_answer(&mut drained)?,
            }
        }

        let leftover = self.transport.stream().discard_inbound();
        if leftover > 0 {
            return Err(RpcError::protocol(format!(
                "{} item(s) left after {} message(s)",
                leftover, count
            )));
        }
        Ok(drained)
    }

    fn receive_announcement(&mut self) -> RpcResult<()> {
        let body = self.transport.read_bytes()?;
        let descriptor = FunctionDescriptor::from_bytes(&body)?;
        debug!(
            role = %self.role,
            id = descriptor.id,
            name = %descriptor.name,
            "Peer announced function"
        );
        let (id, name) = (descriptor.id, descriptor.name.clone());
        self.remote.insert(id, &name, descriptor);
        Ok(())
    }

    fn receive_call(&mut self) -> RpcResult<()> {
        let call_id: CallId = read_id(&mut *self.transport, "call id")?;
        let function_id: FunctionId = read_id(&mut *self.transport, "function id")?;

        let args = match self.local.get(function_id) {
            Some(local) => match self.transport.unpack(&local.descriptor.params) {
                Ok(args) => Ok(args),
                Err(RpcError::Pack(reason)) => Err(format!(
                    "Invalid arguments for '{}': {}",
                    local.descriptor.name, reason
                )),
                Err(e) => return Err(e),
            },
            None => {
                self.transport.stream().next_args()?;
                Err(format!("Unknown function id {}", function_id))
            }
        };

        debug!(role = %self.role, call_id, function_id, "Queued inbound call");
        self.inbound.push(InboundCall {
            call_id,
            function_id,
            args,
        });
        Ok(())
    }

    fn receive_answer(&mut self, drained: &mut Drained) -> RpcResult<()> {
        let call_id: CallId = read_id(&mut *self.transport, "call id")?;
        let status = AnswerStatus::try_from(self.transport.read_int()?)?;
        let record = self.in_flight.remove(&call_id).ok_or_else(|| {
            RpcError::protocol(format!("answer for call {} which is not in flight", call_id))
        })?;

        match status {
            AnswerStatus::Ok => {
                let value = self.transport.unpack_return(record.pending.ret())?;
                debug!(
                    role = %self.role,
                    call_id,
                    function = record.pending.function(),
                    "Call resolved"
                );
                record.pending.resolve(value.clone());
                if let Some(callback) = record.on_result {
                    drained.callbacks.push((callback, value));
                }
            }
            AnswerStatus::Exc => {
                let text = self.transport.read_str()?;
                warn!(
                    role = %self.role,
                    call_id,
                    function = record.pending.function(),
                    "Remote call raised"
                );
                record.pending.fail(text.clone());
                drained.exceptions.push(text);
            }
        }
        Ok(())
    }

    /// Substitute references and callback handles for one inbound call
    ///
    /// The error text becomes the call's exception answer.
    pub fn prepare(
        &self,
        call: InboundCall,
        endpoint: &Weak<Inner>,
    ) -> Result<PreparedCall, String> {
        let local = self
            .local
            .get(call.function_id)
            .ok_or_else(|| format!("Unknown function id {}", call.function_id))?;
        let name = &local.descriptor.name;
        let wire = call.args?;

        let mut substituted = Vec::with_capacity(wire.len());
        for (index, arg) in wire.into_iter().enumerate() {
            let arg = match arg {
                WireArg::Reference(id) => {
                    let value = self.results.get(id).cloned().ok_or_else(|| {
                        format!(
                            "Argument {} of '{}': no local result for call {}",
                            index, name, id
                        )
                    })?;
                    WireArg::Value(value)
                }
                other => other,
            };
            substituted.push(arg);
        }
        local
            .descriptor
            .params
            .check(&substituted)
            .map_err(|e| format!("Invalid arguments for '{}': {}", name, e))?;

        let mut params = Vec::with_capacity(substituted.len());
        for (index, arg) in substituted.into_iter().enumerate() {
            params.push(match arg {
                WireArg::Value(value) => Param::Value(value),
                WireArg::Function(reference) => {
                    let remote = self.remote.get(reference.id).ok_or_else(|| {
                        format!(
                            "Argument {} of '{}': unknown callback function {}",
                            index, name, reference.id
                        )
                    })?;
                    Param::Function(RemoteFunction::new(endpoint.clone(), remote.name.clone()))
                }
                WireArg::Reference(id) => {
                    return Err(format!("Argument {}: unresolved reference {}", index, id))
                }
            });
        }

        Ok(PreparedCall {
            name: name.clone(),
            ret: local.descriptor.ret.clone(),
            func: local.func.clone(),
            args: Args::new(params),
        })
    }

    /// Queue the answer to an executed call
    ///
    /// A value too large for the transport is answered with an exception
    /// instead. Only values actually sent are kept for later references.
    pub fn answer(
        &mut self,
        call_id: CallId,
        ret: &ReturnType,
        outcome: Result<Value, String>,
    ) -> RpcResult<()> {
        let outcome = outcome.and_then(|value| {
            crate::protocol::check_return(ret, &value)
                .map(|()| value)
                .map_err(|e| e.to_string())
        });

        let text = match outcome {
            Ok(value) => {
                let cached = value.clone();
                let sent = self.write_checked(|state| {
                    state.transport.write_int(MessageKind::RemoteAnswer.into());
                    state.transport.write_int(i64::from(call_id));
                    state.transport.write_int(AnswerStatus::Ok.into());
                    state.transport.pack_return(ret, value)?;
                    state.transport.inc();
                    Ok(())
                });
                match sent {
                    Ok(()) => {
                        self.results.insert(call_id, cached);
                        return Ok(());
                    }
                    Err(e @ RpcError::CapacityExceeded { .. }) => {
                        format!("Answer to call {} dropped: {}", call_id, e)
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(text) => text,
        };

        // A reused call id must not resolve to the previous call's value
        self.results.remove(call_id);
        warn!(role = %self.role, call_id, error = %text, "Answering with exception");
        self.write_checked(|state| {
            state.transport.write_int(MessageKind::RemoteAnswer.into());
            state.transport.write_int(i64::from(call_id));
            state.transport.write_int(AnswerStatus::Exc.into());
            state.transport.write_str(&text);
            state.transport.inc();
            Ok(())
        })
    }
}
