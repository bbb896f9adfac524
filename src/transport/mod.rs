/*!
 * Transport Layer
 *
 * One trait over two channels: double-buffered shared memory and connected
 * sockets. Both queue typed items in a `BatchStream` and publish them as a
 * single frame on `commit`; `wait` polls until the peer has published.
 */

#[cfg(unix)]
pub mod shm;
pub mod socket;
pub mod stream;

use crate::core::errors::RpcError;
use crate::core::types::RpcResult;
use crate::monitoring::TransportStats;
use crate::protocol::{check_return, Params, ReturnType, Value, WireArg};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::time::{Duration, Instant};

#[cfg(unix)]
pub use shm::SharedMemoryTransport;
pub use socket::{PollableSocket, SocketTransport};
pub use stream::{BatchStream, Item};

/// Byte-level channel beneath an endpoint
///
/// Writes only queue items; nothing reaches the peer before `commit`. Reads
/// drain the batch decoded by the last successful `poll_ready`.
pub trait Transport: Send {
    /// The batch stream backing reads and writes
    fn stream(&mut self) -> &mut BatchStream;

    /// Publish the queued batch and signal the peer
    fn commit(&mut self) -> RpcResult<()>;

    /// Fail with `CapacityExceeded` when the queued batch could not be published
    fn check_capacity(&mut self) -> RpcResult<()> {
        Ok(())
    }

    /// One non-blocking readiness check
    ///
    /// On success the peer's batch is decoded into the stream and the
    /// number of ready messages is returned.
    fn poll_ready(&mut self) -> RpcResult<Option<usize>>;

    /// Usage report
    fn stats(&self) -> TransportStats;

    /// Mark one queued message complete
    fn inc(&mut self) {
        self.stream().mark_complete();
    }

    fn write_int(&mut self, value: i64) {
        self.stream().push(Item::Int(value));
    }

    fn read_int(&mut self) -> RpcResult<i64> {
        self.stream().next_int()
    }

    fn write_str(&mut self, value: &str) {
        self.stream().push(Item::Str(value.to_string()));
    }

    fn read_str(&mut self) -> RpcResult<String> {
        self.stream().next_str()
    }

    fn write_bytes(&mut self, value: Vec<u8>) {
        self.stream().push(Item::Bytes(value));
    }

    fn read_bytes(&mut self) -> RpcResult<Vec<u8>> {
        self.stream().next_bytes()
    }

    /// Queue an argument tuple after validating it against `params`
    fn pack(&mut self, params: &Params, args: Vec<WireArg>) -> RpcResult<()> {
        params.check(&args)?;
        self.stream().push(Item::Args(args));
        Ok(())
    }

    /// Read an argument tuple and check its shape against `params`
    ///
    /// A `Pack` error means the tuple was consumed but does not fit; the
    /// stream stays aligned and the caller may answer with an exception.
    fn unpack(&mut self, params: &Params) -> RpcResult<Vec<WireArg>> {
        let args = self.stream().next_args()?;
        params.check(&args)?;
        Ok(args)
    }

    /// Queue a return value after validating it against `ret`
    fn pack_return(&mut self, ret: &ReturnType, value: Value) -> RpcResult<()> {
        check_return(ret, &value)?;
        self.stream().push(Item::Value(value));
        Ok(())
    }

    fn unpack_return(&mut self, ret: &ReturnType) -> RpcResult<Value> {
        let value = self.stream().next_value()?;
        check_return(ret, &value)
            .map_err(|e| RpcError::protocol(format!("peer answered with {}", e)))?;
        Ok(value)
    }
}

/// Poll until the transport inside `lock` reports ready messages
///
/// The lock is held only while polling and released between attempts so
/// other threads may queue traffic. On success the guard is returned still
/// held, letting the caller drain the batch without interleaving.
///
/// `timeout = None` waits forever. The last sleep is cut to the time left and
/// the loop gives up only once the timeout has fully elapsed, so a zero
/// timeout polls exactly once.
pub fn wait<'a, S, F>(
    lock: &'a ReentrantMutex<RefCell<S>>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    mut poll: F,
) -> RpcResult<(ReentrantMutexGuard<'a, RefCell<S>>, usize)>
where
    F: FnMut(&mut S) -> RpcResult<Option<usize>>,
{
    let start = Instant::now();
    let timed_out = |start: Instant| RpcError::Timeout {
        elapsed_ms: start.elapsed().as_millis() as u64,
        timeout_ms: timeout.map(|t| t.as_millis() as u64),
    };

    loop {
        let guard = match timeout {
            Some(limit) => {
                let remaining = limit.saturating_sub(start.elapsed());
                lock.try_lock_for(remaining)
                    .ok_or_else(|| timed_out(start))?
            }
            None => lock.lock(),
        };

        let ready = {
            let mut state = guard
                .try_borrow_mut()
                .map_err(|_| {
                    RpcError::protocol("wait called while the endpoint state is borrowed")
                })?;
            poll(&mut *state)?
        };

        if let Some(count) = ready {
            return Ok((guard, count));
        }
        drop(guard);

        let pause = match timeout {
            Some(limit) => {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    return Err(timed_out(start));
                }
                poll_interval.min(limit - elapsed)
            }
            None => poll_interval,
        };
        std::thread::sleep(pause);
    }
}
