/*!
 * Shared Memory Tests
 * Endpoints paired over double-buffered shared memory
 */

#![cfg(unix)]

mod common;

use common::{fast_config, unique_tag, TIMEOUT};
use csrpc::{args, ArgType, Endpoint, Params, Role, RpcError, RpcResult, TransportStats, Value};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::thread;
use std::time::Duration;

fn connect(role: Role, tag: &str) -> RpcResult<Endpoint> {
    Endpoint::shared_memory_with_config(role, tag, 7, Some(TIMEOUT), fast_config())
}

/// Server thread exposing `add`, `len`, `blob` and `quit`, serving until quit
fn spawn_server(tag: &str) -> thread::JoinHandle<RpcResult<TransportStats>> {
    let tag = tag.to_string();
    thread::spawn(move || {
        let server = connect(Role::Server, &tag)?;
        server.add_function("add", Params::Any, Some(ArgType::Pickle), |args| {
            Ok(Value::Int(args.int(0)? + args.int(1)?))
        })?;
        server.add_function("len", Params::exact([ArgType::Bytes]), Some(ArgType::Pickle), |args| {
            Ok(Value::Int(args.bytes(0)?.len() as i64))
        })?;
        server.add_function("blob", Params::Any, Some(ArgType::Bytes), |args| {
            Ok(Value::Bytes(vec![0u8; args.int(0)? as usize]))
        })?;
        let weak = server.downgrade();
        server.add_function("quit", Params::none(), None, move |_| {
            if let Some(server) = weak.upgrade() {
                server.stop_serving();
            }
            Ok(Value::Nil)
        })?;
        server.serve_forever()?;
        server.statistics()
    })
}

#[test]
#[serial]
fn test_handshake_times_out_without_peer() {
    let err = Endpoint::shared_memory_with_config(
        Role::Server,
        &unique_tag(),
        1,
        Some(Duration::from_millis(100)),
        fast_config(),
    )
    .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
#[serial]
fn test_invalid_tag_is_rejected() {
    let err = connect(Role::Client, "bad/tag").unwrap_err();
    assert!(matches!(err, RpcError::InvalidName(_)));
}

#[test]
#[serial]
fn test_serve_forever_round_trip() {
    let tag = unique_tag();
    let server = spawn_server(&tag);
    let client = connect(Role::Client, &tag).unwrap();

    // First turn belongs to the client; the server answers with its table
    client.commit().unwrap();
    assert_eq!(client.wait(Some(TIMEOUT)).unwrap(), 4);
    assert!(client.has_remote("add"));

    let a = client.call("add", args![2, 4]).unwrap();
    let b = client.call("add", args![&a, 4]).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();
    assert_eq!(a.get().unwrap(), Value::Int(6));
    assert_eq!(b.get().unwrap(), Value::Int(10));

    client.call("add", args!["x", 1]).unwrap();
    client.commit().unwrap();
    assert!(client.wait(Some(TIMEOUT)).unwrap_err().is_remote());

    client.call("quit", args![]).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();

    let server_stats = server.join().unwrap().unwrap();
    assert_eq!(server_stats.receives, 4);
    assert_eq!(server_stats.commits, 4);

    let text = client.statistics().unwrap().to_string();
    assert!(text.contains("Max memory usage request buffer:"), "{}", text);
    assert!(text.contains("Max memory usage answer  buffer:"), "{}", text);

    // Server is gone; its closed doorbell is reported
    assert_eq!(client.commit().unwrap_err(), RpcError::Disconnected);
}

#[test]
#[serial]
fn test_turn_order_is_enforced() {
    let tag = unique_tag();
    let client_tag = tag.clone();
    let client = thread::spawn(move || connect(Role::Client, &client_tag));
    let server = connect(Role::Server, &tag).unwrap();
    let client = client.join().unwrap().unwrap();

    // The server may only answer after receiving
    assert!(server.commit().unwrap_err().is_protocol());
    // Nothing is on its way to the client
    assert!(client.wait(Some(Duration::from_millis(30))).unwrap_err().is_timeout());

    client.commit().unwrap();
    // The client already handed over its turn
    assert!(client.commit().unwrap_err().is_protocol());
    assert_eq!(server.wait(Some(TIMEOUT)).unwrap(), 0);
    server.commit().unwrap();
    assert_eq!(client.wait(Some(TIMEOUT)).unwrap(), 0);
}

#[test]
#[serial]
fn test_dropped_peer_is_detected_while_waiting() {
    let tag = unique_tag();
    let client_tag = tag.clone();
    let client = thread::spawn(move || connect(Role::Client, &client_tag));
    let server = connect(Role::Server, &tag).unwrap();
    let client = client.join().unwrap().unwrap();

    drop(client);
    assert_eq!(
        server.wait(Some(TIMEOUT)).unwrap_err(),
        RpcError::Disconnected
    );
}

#[test]
#[serial]
fn test_oversized_call_is_refused_before_queueing() {
    let tag = unique_tag();
    let server = spawn_server(&tag);
    let client = connect(Role::Client, &tag).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();

    match client.call("len", args![vec![0u8; 128 * 1024]]) {
        Err(RpcError::CapacityExceeded { size, capacity }) => {
            assert!(size > capacity);
            assert_eq!(capacity, 64 * 1024);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
    assert_eq!(client.in_flight(), 0);

    // Each call fits alone, but not both in one batch
    let first = client.call("len", args![vec![0u8; 40 * 1024]]).unwrap();
    assert!(matches!(
        client.call("len", args![vec![0u8; 40 * 1024]]),
        Err(RpcError::CapacityExceeded { .. })
    ));
    let small = client.call("add", args![2, 4]).unwrap();
    assert_eq!(client.in_flight(), 2);

    client.commit().unwrap();
    assert_eq!(client.wait(Some(TIMEOUT)).unwrap(), 2);
    assert_eq!(first.get().unwrap(), Value::Int(40 * 1024));
    assert_eq!(small.get().unwrap(), Value::Int(6));

    client.call("quit", args![]).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();
    assert_eq!(server.join().unwrap().unwrap().receives, 3);
}

#[test]
#[serial]
fn test_oversized_answer_becomes_exception() {
    let tag = unique_tag();
    let server = spawn_server(&tag);
    let client = connect(Role::Client, &tag).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();

    let blob = client.call("blob", args![128 * 1024]).unwrap();
    let dependent = client.call("len", args![&blob]).unwrap();
    let kept = client.call("add", args![1, 1]).unwrap();
    client.commit().unwrap();

    match client.wait(Some(TIMEOUT)) {
        Err(RpcError::Remote { messages }) => {
            assert_eq!(messages.len(), 2);
            assert!(messages[0].contains("exceeds buffer capacity"), "{}", messages[0]);
            // The dropped value was not kept for references either
            assert!(messages[1].contains("no local result"), "{}", messages[1]);
        }
        other => panic!("expected remote exceptions, got {:?}", other),
    }
    assert!(blob.is_failed());
    assert!(dependent.is_failed());
    assert_eq!(kept.get().unwrap(), Value::Int(2));

    let small = client.call("blob", args![16]).unwrap();
    client.call("quit", args![]).unwrap();
    client.commit().unwrap();
    client.wait(Some(TIMEOUT)).unwrap();
    assert_eq!(small.get().unwrap(), Value::Bytes(vec![0u8; 16]));
    server.join().unwrap().unwrap();
}
