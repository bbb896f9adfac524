/*!
 * csrpc
 * Bidirectional RPC between two processes over shared memory or sockets
 */

pub mod core;
pub mod endpoint;
pub mod monitoring;
pub mod protocol;
pub mod transport;

// Re-exports
pub use crate::core::{EndpointConfig, Role, RpcError, RpcResult};
pub use endpoint::{
    Arg, ArgError, Args, Endpoint, Param, PendingResult, RemoteFunction, WeakEndpoint,
};
pub use monitoring::{init_tracing, TransportStats};
pub use protocol::{ArgType, FunctionDescriptor, Params, ReturnType, Value};
pub use transport::Transport;
