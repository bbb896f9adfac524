/*!
 * Protocol Limits and Constants
 *
 * Centralized location for buffer sizes, polling intervals and id spaces.
 * Both peers of a pairing must agree on the shared-memory values.
 */

use std::time::Duration;

// =============================================================================
// SHARED MEMORY
// =============================================================================

/// Capacity of each shared-memory region, header included (10MB)
/// No back-pressure: an encoded batch larger than this fails the commit
pub const SHM_REGION_SIZE: usize = 10 * 1024 * 1024;

/// Size of the region header holding the 32-bit doorbell
pub const SHM_HEADER_SIZE: usize = std::mem::size_of::<i32>();

/// Doorbell value meaning "no data, producer may write"
pub const DOORBELL_EMPTY: i32 = -1;

/// Doorbell value of a freshly created (zero-filled) region
pub const DOORBELL_ABSENT: i32 = 0;

/// Doorbell value left behind by a side that closed its transport
pub const DOORBELL_CLOSED: i32 = -2;

// =============================================================================
// SOCKET
// =============================================================================

/// Largest batch frame accepted from a socket peer (256MB)
/// A larger length prefix is treated as a corrupted stream
pub const MAX_SOCKET_FRAME: usize = 256 * 1024 * 1024;

// =============================================================================
// POLLING
// =============================================================================

/// Sleep between doorbell / readability checks in `wait`
/// [PERF] Liveness depends on polling; 10ms keeps idle CPU near zero
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Sleep between checks while waiting for the peer to appear
pub const DEFAULT_HANDSHAKE_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// ENDPOINT
// =============================================================================

/// Local call results kept for reference substitution
/// Oldest entries are pruned once this many are cached
pub const DEFAULT_RESULT_CACHE_CAPACITY: usize = 4096;

/// Name prefix for functions registered while marshaling callbacks
pub const CALLBACK_NAME_PREFIX: &str = "cs_callback_";
