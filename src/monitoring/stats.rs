/*!
 * Transport Statistics
 * High-water marks and counters reported by `Endpoint::statistics`
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which transport produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    SharedMemory,
    Socket,
}

/// Snapshot of buffer usage and traffic counters
///
/// Sizes include the region header on shared memory and the frame prefix on
/// sockets, so they compare directly with `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    pub kind: TransportKind,
    /// Region size, `None` for unbounded transports
    pub capacity: Option<usize>,
    /// Largest inbound batch seen
    pub max_request_size: usize,
    /// Largest outbound batch written
    pub max_answer_size: usize,
    pub commits: u64,
    pub receives: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

impl TransportStats {
    pub fn new(kind: TransportKind, capacity: Option<usize>, baseline: usize) -> Self {
        Self {
            kind,
            capacity,
            max_request_size: baseline,
            max_answer_size: baseline,
            commits: 0,
            receives: 0,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    /// Record a published batch
    pub fn record_commit(&mut self, size: usize, messages: usize) {
        self.commits += 1;
        self.messages_sent += messages as u64;
        self.max_answer_size = self.max_answer_size.max(size);
    }

    /// Record a received batch
    pub fn record_receive(&mut self, size: usize, messages: usize) {
        self.receives += 1;
        self.messages_received += messages as u64;
        self.max_request_size = self.max_request_size.max(size);
    }

    fn percent(&self, size: usize) -> Option<f64> {
        self.capacity
            .filter(|&c| c > 0)
            .map(|c| size as f64 * 100.0 / c as f64)
    }
}

impl fmt::Display for TransportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == TransportKind::Socket {
            return writeln!(
                f,
                "Socket transport: {} commits ({} messages), {} receives ({} messages)",
                self.commits, self.messages_sent, self.receives, self.messages_received
            );
        }

        let rows = [
            ("request buffer", self.max_request_size),
            ("answer  buffer", self.max_answer_size),
        ];
        for (label, size) in rows {
            match self.percent(size) {
                Some(pct) => writeln!(
                    f,
                    "Max memory usage {}: {} bytes ({:.1} %)",
                    label, size, pct
                )?,
                None => writeln!(f, "Max memory usage {}: {} bytes", label, size)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_shared_memory_report() {
        let mut stats = TransportStats::new(TransportKind::SharedMemory, Some(1000), 4);
        stats.record_receive(104, 3);
        stats.record_commit(54, 1);
        stats.record_receive(20, 1);

        assert_eq!(stats.max_request_size, 104);
        assert_eq!(stats.messages_received, 4);
        assert_eq!(
            stats.to_string(),
            "Max memory usage request buffer: 104 bytes (10.4 %)\n\
             Max memory usage answer  buffer: 54 bytes (5.4 %)\n"
        );
    }

    #[test]
    fn test_socket_report() {
        let mut stats = TransportStats::new(TransportKind::Socket, None, 0);
        stats.record_commit(30, 2);
        assert!(stats.to_string().starts_with("Socket transport: 1 commits (2 messages)"));
    }
}
