// src/constants.rs
//
// Central location for the fixed sizes and intervals used throughout
// soak-bench.

use std::time::Duration;

/// Capacity of the vendor's ready queue. Producers block once this many
/// filled objects are waiting for runners.
pub const MAX_OBJECTS: usize = 100;

/// Capacity of the reporter's sample channel. Runners block (rather than
/// drop samples) if the reporter falls this far behind.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 1000;

/// Capacity of the sync batcher's incoming request channel.
pub const SYNC_INCOMING_CAPACITY: usize = 100;

/// Capacity of the runner error channel. Sends are non-blocking; errors
/// beyond this backlog are discarded.
pub const RUNNER_ERROR_CAPACITY: usize = 10;

/// Granularity of compressibility substitution in `pattern_fill`.
pub const PATTERN_BLOCK_SIZE: usize = 64 * 1024;

/// The constant byte used for compressible pattern blocks.
pub const PATTERN_BYTE: u8 = b'A';

/// Idle re-arm interval for the batcher timer when nothing is pending.
pub const BATCHER_LONG_INTERVAL: Duration = Duration::from_secs(10);

/// How often the reporter asks the syncer for a histogram report.
pub const SYNC_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// How often the reporter logs progress while waiting out the warm-up.
pub const WARMUP_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Queue depth for the optional io_uring fsync engine.
#[cfg(all(target_os = "linux", feature = "io-uring"))]
pub const URING_ENTRIES: u32 = 256;
