/*!
 * csrpc demo
 *
 * Runs a server exposing a handful of functions, or a client exercising
 * them, over TCP or shared memory:
 *
 *   csrpc-demo serve-tcp 127.0.0.1:7878
 *   csrpc-demo call-tcp 127.0.0.1:7878
 *   csrpc-demo serve-shm demo 1
 *   csrpc-demo call-shm demo 1
 */

use csrpc::{args, init_tracing, Arg, ArgType, Endpoint, Params, Role, RpcError, Value};
use miette::{bail, IntoDiagnostic, Result};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const WAIT_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

fn register_functions(server: &Endpoint) -> Result<()> {
    server.add_function("inc", Params::Any, Some(ArgType::Pickle), |args| {
        Ok(Value::Int(args.int(0)? + 1))
    })?;
    server.add_function("add", Params::Any, Some(ArgType::Pickle), |args| {
        match (args.value(0)?, args.value(1)?) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => anyhow::bail!("cannot add {} and {}", a.kind(), b.kind()),
            },
        }
    })?;
    server.add_function("printer", Params::exact([ArgType::String]), None, |args| {
        println!("{}", args.str(0)?);
        Ok(Value::Nil)
    })?;
    server.add_function(
        "encode_utf8",
        Params::exact([ArgType::String]),
        Some(ArgType::Bytes),
        |args| Ok(Value::Bytes(args.str(0)?.as_bytes().to_vec())),
    )?;
    server.add_function(
        "f_callback",
        Params::exact([ArgType::callback([ArgType::Pickle, ArgType::String])]),
        None,
        |args| {
            let callback = args.function(0)?;
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(400));
                info!("Calling callback");
                if let Err(e) = callback.call(args![42, "server thread's callback"]) {
                    tracing::warn!(error = %e, "Callback call failed");
                }
            });
            Ok(Value::Nil)
        },
    )?;

    let weak = server.downgrade();
    server.add_function("quit", Params::none(), None, move |_| {
        if let Some(server) = weak.upgrade() {
            server.stop_serving();
        }
        Ok(Value::Nil)
    })?;
    Ok(())
}

fn serve(server: Endpoint) -> Result<()> {
    register_functions(&server)?;
    server.serve_forever()?;
    print!("{}", server.statistics()?);
    Ok(())
}

fn run_client(client: Endpoint) -> Result<()> {
    // Hand the first turn to the server and collect its announcements
    client.commit()?;
    client.wait(WAIT_TIMEOUT)?;
    info!(functions = client.remote_functions()?.len(), "Connected");

    let r1 = client
        .remote("inc")?
        .call_with(args![0], |v| println!("inc(0) = {}", v))?;
    let r2 = client.call("add", args![2, 4])?;
    match r1.get() {
        Err(RpcError::NotResolved { .. }) => println!("inc(0) not resolved yet, as expected"),
        other => bail!("unexpected early result {:?}", other),
    }
    let a = client.call("add", args![2, 4])?;
    let b = client.call("add", args![&a, 4])?;
    let bytes = client.call("encode_utf8", args!["Hello World"])?;
    client.commit()?;
    client.wait(WAIT_TIMEOUT)?;
    println!(
        "add(2,4) = {}, add(add(2,4),4) = {}, encode_utf8 = {}",
        r2.get()?,
        b.get()?,
        bytes.get()?
    );

    client.call("inc", args!["7"])?;
    client.commit()?;
    match client.wait(WAIT_TIMEOUT) {
        Err(e @ RpcError::Remote { .. }) => println!("Exception was expected, OK:\n{}", e),
        other => bail!("expected a remote exception, got {:?}", other),
    }

    match client.call("printer", args![1]) {
        Err(RpcError::Pack(reason)) => println!("printer(1) rejected: {}", reason),
        other => bail!("expected a packing error, got {:?}", other),
    }
    client.call("printer", args!["Hello World"])?;
    client.call(
        "f_callback",
        vec![Arg::callback(|args| {
            println!("{} {}", args.int(0)?, args.str(1)?);
            Ok(Value::Nil)
        })],
    )?;
    client.commit()?;
    client.wait(WAIT_TIMEOUT)?;

    // Let the server thread fire the callback, then pick it up
    thread::sleep(Duration::from_secs(1));
    client.commit()?;
    client.wait(WAIT_TIMEOUT)?;
    println!("r1 = {}, r2 = {}", r1.get()?, r2.get()?);

    client.call("quit", args![])?;
    client.commit()?;
    client.wait(WAIT_TIMEOUT)?;
    print!("{}", client.statistics()?);
    Ok(())
}

fn usage() -> Result<()> {
    bail!("usage: csrpc-demo <serve-tcp|call-tcp> <addr> | <serve-shm|call-shm> <tag> <session>")
}

fn main() -> Result<()> {
    init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();

    match argv.as_slice() {
        ["serve-tcp", addr] => {
            let listener = TcpListener::bind(addr).into_diagnostic()?;
            info!(addr, "Waiting for a client");
            let (stream, peer) = listener.accept().into_diagnostic()?;
            info!(%peer, "Client connected");
            serve(Endpoint::socket(Role::Server, stream)?)
        }
        ["call-tcp", addr] => {
            let stream = TcpStream::connect(addr).into_diagnostic()?;
            run_client(Endpoint::socket(Role::Client, stream)?)
        }
        #[cfg(unix)]
        ["serve-shm", tag, session] => {
            let session = session.parse().into_diagnostic()?;
            serve(Endpoint::shared_memory(Role::Server, tag, session, Some(CONNECT_TIMEOUT))?)
        }
        #[cfg(unix)]
        ["call-shm", tag, session] => {
            let session = session.parse().into_diagnostic()?;
            run_client(Endpoint::shared_memory(Role::Client, tag, session, Some(CONNECT_TIMEOUT))?)
        }
        _ => usage(),
    }
}
