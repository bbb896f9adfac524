/*!
 * Shared Memory Transport
 *
 * Two regions per pairing, each read by one side and written by the other.
 * A signed doorbell in each header hands the body back and forth:
 *
 * - `-1`: empty, the consumer must not touch the body
 * - `>= 0`: that many messages are encoded after the header
 * - `-2`: the owner closed its transport
 *
 * Before the handshake a fresh region reads `0`, which is told apart from a
 * batch only because the owner always resets its doorbell to `-1` first.
 *
 * Exactly one side is `Processing` at any time. The client starts there and
 * sends first; `commit` hands the turn over, `poll_ready` takes it back.
 */

mod region;

pub use region::SharedRegion;

use super::stream::BatchStream;
use super::Transport;
use crate::core::config::EndpointConfig;
use crate::core::errors::RpcError;
use crate::core::limits::{DOORBELL_ABSENT, DOORBELL_CLOSED, DOORBELL_EMPTY, SHM_HEADER_SIZE};
use crate::core::types::{Role, RpcResult};
use crate::monitoring::{TransportKind, TransportStats};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Turn-ownership state of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmState {
    /// Own doorbell is `-1`; waiting for the peer to publish
    WaitingForRequests,
    /// Reading the received batch and queueing the reply
    ProcessingRequests,
}

/// Object names of a pairing as `(requests, answers)`
///
/// The server reads `requests` and writes `answers`; the client does the
/// opposite.
pub fn region_names(tag: &str, session: u32) -> RpcResult<(String, String)> {
    if tag.is_empty() || tag.contains('/') || tag.contains('\0') {
        return Err(RpcError::InvalidName(tag.to_string()));
    }
    Ok((
        format!("/{}-{}-requests", tag, session),
        format!("/{}-answers", tag),
    ))
}

/// Double-buffered shared-memory channel
pub struct SharedMemoryTransport {
    role: Role,
    state: ShmState,
    /// Region this side reads, doorbell reset by this side
    own: SharedRegion,
    /// Region this side writes, doorbell published by this side
    answer: SharedRegion,
    stream: BatchStream,
    stats: TransportStats,
}

impl SharedMemoryTransport {
    /// Map both regions and wait for the peer
    ///
    /// Fails with `Timeout` if the peer does not appear within `timeout`.
    pub fn connect(
        role: Role,
        tag: &str,
        session: u32,
        timeout: Option<Duration>,
        config: &EndpointConfig,
    ) -> RpcResult<Self> {
        let (requests, answers) = region_names(tag, session)?;
        let (own_name, answer_name) = match role {
            Role::Server => (requests, answers),
            Role::Client => (answers, requests),
        };

        let own = SharedRegion::open(&own_name, config.shm_capacity, true)?;
        let answer = SharedRegion::open(&answer_name, config.shm_capacity, false)?;

        let mut transport = Self {
            role,
            state: ShmState::WaitingForRequests,
            own,
            answer,
            stream: BatchStream::new(),
            stats: TransportStats::new(
                TransportKind::SharedMemory,
                Some(config.shm_capacity),
                SHM_HEADER_SIZE,
            ),
        };
        transport.handshake(timeout, config.handshake_interval)?;
        Ok(transport)
    }

    /// Reset own region, then poll until the peer has done the same
    fn handshake(&mut self, timeout: Option<Duration>, interval: Duration) -> RpcResult<()> {
        self.own.zero();
        self.own.store_doorbell(DOORBELL_EMPTY);
        debug!(role = %self.role, own = self.own.name(), "Own region reset, waiting for peer");

        let start = Instant::now();
        loop {
            match self.answer.load_doorbell() {
                DOORBELL_EMPTY => break,
                DOORBELL_ABSENT | DOORBELL_CLOSED => {}
                bell if bell < DOORBELL_CLOSED => {
                    return Err(RpcError::protocol(format!(
                        "peer doorbell holds {} during handshake",
                        bell
                    )))
                }
                // unconsumed batch left over from an old session
                _ => {}
            }

            if let Some(limit) = timeout {
                if start.elapsed() + interval > limit {
                    return Err(RpcError::Timeout {
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        timeout_ms: Some(limit.as_millis() as u64),
                    });
                }
            }
            std::thread::sleep(interval);
        }

        self.state = match self.role {
            Role::Server => ShmState::WaitingForRequests,
            Role::Client => ShmState::ProcessingRequests,
        };
        info!(role = %self.role, state = ?self.state, "Shared memory peer connected");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ShmState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a batch of `size` bytes, header included, fits the peer's region
    fn fits(&self, size: usize) -> RpcResult<()> {
        let capacity = SHM_HEADER_SIZE + self.answer.body_capacity();
        if size > capacity {
            return Err(RpcError::CapacityExceeded { size, capacity });
        }
        Ok(())
    }
}

impl Transport for SharedMemoryTransport {
    fn stream(&mut self) -> &mut BatchStream {
        &mut self.stream
    }

    fn commit(&mut self) -> RpcResult<()> {
        if self.state != ShmState::ProcessingRequests {
            return Err(RpcError::protocol(format!(
                "{} commit while waiting for requests",
                self.role
            )));
        }

        match self.answer.load_doorbell() {
            DOORBELL_EMPTY => {}
            DOORBELL_CLOSED => return Err(RpcError::Disconnected),
            bell => {
                return Err(RpcError::protocol(format!(
                    "peer has not consumed the previous batch (doorbell {})",
                    bell
                )))
            }
        }

        let count = self.stream.completed();
        let bell = i32::try_from(count).map_err(|_| {
            RpcError::protocol(format!("{} messages do not fit the doorbell", count))
        })?;
        let frame = self.stream.encode_outbound()?;
        let size = SHM_HEADER_SIZE + frame.len();
        self.fits(size)?;
        self.answer.body_mut()[..frame.len()].copy_from_slice(&frame);

        self.own.store_doorbell(DOORBELL_EMPTY);
        self.answer.store_doorbell(bell);
        self.state = ShmState::WaitingForRequests;
        self.stream.clear_outbound();
        self.stats.record_commit(size, count);

        debug!(role = %self.role, count, size, "Committed batch");
        Ok(())
    }

    fn check_capacity(&mut self) -> RpcResult<()> {
        let size = SHM_HEADER_SIZE + self.stream.encoded_len()?;
        self.fits(size)
    }

    fn poll_ready(&mut self) -> RpcResult<Option<usize>> {
        let bell = self.own.load_doorbell();
        if bell == DOORBELL_EMPTY {
            if self.answer.load_doorbell() == DOORBELL_CLOSED {
                return Err(RpcError::Disconnected);
            }
            return Ok(None);
        }
        if bell < DOORBELL_EMPTY {
            return Err(RpcError::protocol(format!("doorbell holds {}", bell)));
        }
        if self.state == ShmState::ProcessingRequests {
            return Err(RpcError::protocol(format!(
                "{} received a batch while processing",
                self.role
            )));
        }

        self.state = ShmState::ProcessingRequests;
        self.own.store_doorbell(DOORBELL_EMPTY);

        let consumed = self.stream.load(self.own.body())?;
        let count = bell as usize;
        self.stats.record_receive(SHM_HEADER_SIZE + consumed, count);

        debug!(role = %self.role, count, size = consumed, "Received batch");
        Ok(Some(count))
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl Drop for SharedMemoryTransport {
    fn drop(&mut self) {
        // Mark this side absent for a peer that keeps its mapping
        self.own.store_doorbell(DOORBELL_CLOSED);
        debug!(role = %self.role, "Shared memory transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Item;
    use std::thread;

    fn test_config() -> EndpointConfig {
        EndpointConfig::new()
            .with_shm_capacity(64 * 1024)
            .with_handshake_interval(Duration::from_millis(5))
    }

    fn unique_tag() -> String {
        format!("csrpc-shm-{}", uuid::Uuid::new_v4().simple())
    }

    fn pair(tag: &str) -> (SharedMemoryTransport, SharedMemoryTransport) {
        let server_tag = tag.to_string();
        let server = thread::spawn(move || {
            SharedMemoryTransport::connect(
                Role::Server,
                &server_tag,
                1,
                Some(Duration::from_secs(5)),
                &test_config(),
            )
        });
        let client = SharedMemoryTransport::connect(
            Role::Client,
            tag,
            1,
            Some(Duration::from_secs(5)),
            &test_config(),
        )
        .unwrap();
        (server.join().unwrap().unwrap(), client)
    }

    #[test]
    fn test_region_names() {
        let (requests, answers) = region_names("ptracker", 1234).unwrap();
        assert_eq!(requests, "/ptracker-1234-requests");
        assert_eq!(answers, "/ptracker-answers");
        assert!(matches!(region_names("", 1), Err(RpcError::InvalidName(_))));
        assert!(matches!(region_names("a/b", 1), Err(RpcError::InvalidName(_))));
    }

    #[test]
    fn test_roles_fix_initial_state() {
        let (server, client) = pair(&unique_tag());
        assert_eq!(server.state(), ShmState::WaitingForRequests);
        assert_eq!(client.state(), ShmState::ProcessingRequests);
    }

    #[test]
    fn test_ping_pong() {
        let (mut server, mut client) = pair(&unique_tag());

        assert!(server.commit().unwrap_err().is_protocol());
        assert_eq!(server.poll_ready().unwrap(), None);

        client.write_int(42);
        client.inc();
        client.commit().unwrap();
        assert_eq!(client.state(), ShmState::WaitingForRequests);

        assert_eq!(server.poll_ready().unwrap(), Some(1));
        assert_eq!(server.read_int().unwrap(), 42);
        server.write_str("answer");
        server.inc();
        server.commit().unwrap();

        assert_eq!(client.poll_ready().unwrap(), Some(1));
        assert_eq!(client.read_str().unwrap(), "answer");
        assert!(client.stats().max_request_size > SHM_HEADER_SIZE);
    }

    #[test]
    fn test_empty_commit_hands_over_turn() {
        let (mut server, mut client) = pair(&unique_tag());
        client.commit().unwrap();
        assert_eq!(server.poll_ready().unwrap(), Some(0));
        assert_eq!(server.state(), ShmState::ProcessingRequests);
    }

    #[test]
    fn test_oversized_batch_is_rejected() {
        let (_server, mut client) = pair(&unique_tag());
        client.stream().push(Item::Bytes(vec![0u8; 128 * 1024]));
        client.inc();
        let queued = client.check_capacity().unwrap_err();
        let err = client.commit().unwrap_err();
        assert_eq!(queued, err);
        assert!(matches!(
            err,
            RpcError::CapacityExceeded { capacity, .. } if capacity == 64 * 1024
        ));
        assert_eq!(client.state(), ShmState::ProcessingRequests);
    }

    #[test]
    fn test_capacity_check_matches_commit_size() {
        let (mut server, mut client) = pair(&unique_tag());
        client.write_bytes(vec![1u8; 1024]);
        client.inc();
        client.check_capacity().unwrap();
        client.commit().unwrap();
        assert_eq!(server.poll_ready().unwrap(), Some(1));
        assert_eq!(
            server.stats().max_request_size,
            client.stats().max_answer_size
        );
    }

    #[test]
    fn test_dropped_peer_is_detected() {
        let (server, mut client) = pair(&unique_tag());
        drop(server);
        assert_eq!(client.commit().unwrap_err(), RpcError::Disconnected);
    }

    #[test]
    fn test_dropped_peer_is_detected_while_waiting() {
        let (mut server, client) = pair(&unique_tag());
        drop(client);
        assert_eq!(server.poll_ready().unwrap_err(), RpcError::Disconnected);
    }

    #[test]
    fn test_out_of_domain_doorbell() {
        let (mut server, _client) = pair(&unique_tag());
        server.own.store_doorbell(-5);
        assert!(server.poll_ready().unwrap_err().is_protocol());
    }

    #[test]
    fn test_handshake_times_out_without_peer() {
        let err = SharedMemoryTransport::connect(
            Role::Server,
            &unique_tag(),
            7,
            Some(Duration::from_millis(50)),
            &test_config(),
        )
        .err()
        .unwrap();
        assert!(err.is_timeout());
    }
}
