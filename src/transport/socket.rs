/*!
 * Socket Transport
 * Length-prefixed batches over a connected stream socket
 */

use super::stream::BatchStream;
use super::Transport;
use crate::core::bincode::{frame_len, FRAME_PREFIX_SIZE};
use crate::core::errors::RpcError;
use crate::core::limits::MAX_SOCKET_FRAME;
use crate::core::types::{Role, RpcResult};
use crate::monitoring::{TransportKind, TransportStats};
use std::io::{self, BufWriter, Read, Write};
use std::net::TcpStream;
use tracing::{debug, info};

/// Size of the message count sent ahead of each batch frame
const COUNT_PREFIX_SIZE: usize = 4;

/// Connected stream socket that supports a non-blocking readiness probe
pub trait PollableSocket: Read + Write + Send + Sized + 'static {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;
    fn peek(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_clone(&self) -> io::Result<Self>;
}

impl PollableSocket for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::peek(self, buf)
    }

    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }
}

#[cfg(unix)]
impl PollableSocket for std::os::unix::net::UnixStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_nonblocking(self, nonblocking)
    }

    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        use nix::sys::socket::{recv, MsgFlags};
        use std::os::fd::AsRawFd;
        recv(
            self.as_raw_fd(),
            buf,
            MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
        )
        .map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }
}

/// Socket channel; every commit sends `[u32 LE count][u32 LE len][batch]`
pub struct SocketTransport<S: PollableSocket> {
    role: Role,
    reader: S,
    writer: BufWriter<S>,
    stream: BatchStream,
    stats: TransportStats,
}

impl<S: PollableSocket> SocketTransport<S> {
    pub fn new(role: Role, socket: S) -> RpcResult<Self> {
        let writer = BufWriter::new(socket.try_clone()?);
        socket.set_nonblocking(false)?;
        info!(role = %role, "Socket transport ready");
        Ok(Self {
            role,
            reader: socket,
            writer,
            stream: BatchStream::new(),
            stats: TransportStats::new(TransportKind::Socket, None, 0),
        })
    }

    /// Zero-timeout readability probe
    fn readable(&mut self) -> RpcResult<bool> {
        let mut probe = [0u8; 1];
        self.reader.set_nonblocking(true)?;
        let peeked = self.reader.peek(&mut probe);
        self.reader.set_nonblocking(false)?;

        match peeked {
            Ok(0) => Err(RpcError::Disconnected),
            Ok(_) => Ok(true),
            Err(e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_frame(&mut self) -> RpcResult<(usize, Vec<u8>)> {
        let mut head = [0u8; COUNT_PREFIX_SIZE + FRAME_PREFIX_SIZE];
        self.reader.read_exact(&mut head)?;

        let (count, prefix) = head.split_at(COUNT_PREFIX_SIZE);
        let count = frame_len(count)?;
        let len = frame_len(prefix)?;
        if len > MAX_SOCKET_FRAME {
            return Err(RpcError::protocol(format!(
                "peer announced a {} byte batch",
                len
            )));
        }

        let mut frame = vec![0u8; FRAME_PREFIX_SIZE + len];
        frame[..FRAME_PREFIX_SIZE].copy_from_slice(prefix);
        self.reader.read_exact(&mut frame[FRAME_PREFIX_SIZE..])?;
        Ok((count, frame))
    }
}

impl<S: PollableSocket> Transport for SocketTransport<S> {
    fn stream(&mut self) -> &mut BatchStream {
        &mut self.stream
    }

    fn commit(&mut self) -> RpcResult<()> {
        let count = self.stream.completed();
        let count_prefix = u32::try_from(count).map_err(|_| {
            RpcError::protocol(format!("{} messages do not fit the count prefix", count))
        })?;
        let frame = self.stream.encode_outbound()?;

        self.writer.write_all(&count_prefix.to_le_bytes())?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.stream.clear_outbound();
        let size = COUNT_PREFIX_SIZE + frame.len();
        self.stats.record_commit(size, count);
        debug!(role = %self.role, count, size, "Committed batch");
        Ok(())
    }

    fn check_capacity(&mut self) -> RpcResult<()> {
        let size = COUNT_PREFIX_SIZE + self.stream.encoded_len()?;
        let capacity = COUNT_PREFIX_SIZE + FRAME_PREFIX_SIZE + MAX_SOCKET_FRAME;
        if size > capacity {
            return Err(RpcError::CapacityExceeded { size, capacity });
        }
        Ok(())
    }

    fn poll_ready(&mut self) -> RpcResult<Option<usize>> {
        if !self.readable()? {
            return Ok(None);
        }

        let (count, frame) = self.read_frame()?;
        self.stream.load(&frame)?;
        self.stats.record_receive(COUNT_PREFIX_SIZE + frame.len(), count);
        debug!(role = %self.role, count, size = frame.len(), "Received batch");
        Ok(Some(count))
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ArgType, Params, Value, WireArg};
    use std::net::TcpListener;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn test_tcp_round_trip() {
        let (s, c) = tcp_pair();
        let mut server = SocketTransport::new(Role::Server, s).unwrap();
        let mut client = SocketTransport::new(Role::Client, c).unwrap();

        assert_eq!(server.poll_ready().unwrap(), None);

        client.write_int(1);
        client
            .pack(
                &Params::exact([ArgType::String]),
                vec![WireArg::Value(Value::from("Hello World"))],
            )
            .unwrap();
        client.inc();
        client.commit().unwrap();

        let mut ready = None;
        for _ in 0..200 {
            ready = server.poll_ready().unwrap();
            if ready.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(ready, Some(1));
        assert_eq!(server.read_int().unwrap(), 1);
        assert_eq!(
            server.unpack(&Params::exact([ArgType::String])).unwrap(),
            vec![WireArg::Value(Value::from("Hello World"))]
        );
        assert_eq!(server.stats().messages_received, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_disconnect_is_reported() {
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut server = SocketTransport::new(Role::Server, a).unwrap();
        drop(b);
        assert_eq!(server.poll_ready().unwrap_err(), RpcError::Disconnected);
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_commit_still_signals() {
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut server = SocketTransport::new(Role::Server, a).unwrap();
        let mut client = SocketTransport::new(Role::Client, b).unwrap();
        client.commit().unwrap();
        assert_eq!(server.poll_ready().unwrap(), Some(0));
    }
}
