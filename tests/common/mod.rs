/*!
 * Shared test helpers
 */

#![allow(dead_code)]

use csrpc::{Endpoint, EndpointConfig, Role, RpcResult};
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn fast_config() -> EndpointConfig {
    EndpointConfig::new()
        .with_poll_interval(Duration::from_millis(1))
        .with_handshake_interval(Duration::from_millis(5))
        .with_shm_capacity(64 * 1024)
}

/// Server and client endpoints joined by a Unix socket pair
pub fn socket_pair() -> (Endpoint, Endpoint) {
    let (a, b) = UnixStream::pair().unwrap();
    let server = Endpoint::socket_with_config(Role::Server, a, fast_config()).unwrap();
    let client = Endpoint::socket_with_config(Role::Client, b, fast_config()).unwrap();
    (server, client)
}

/// Shared-memory tag no other test uses
pub fn unique_tag() -> String {
    format!("csrpc-test-{}", uuid::Uuid::new_v4().simple())
}

/// Commit on `from`, then drain the batch on `to`
pub fn exchange(from: &Endpoint, to: &Endpoint) -> RpcResult<usize> {
    from.commit()?;
    to.wait(Some(TIMEOUT))
}

/// Client sends, server executes and answers, client drains the answers
pub fn round_trip(server: &Endpoint, client: &Endpoint) -> RpcResult<usize> {
    exchange(client, server)?;
    exchange(server, client)
}
