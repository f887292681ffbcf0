// src/harness.rs

use std::sync::Arc;

use crate::error::Error;
use crate::reporter::Reporter;
use crate::syncer::{SyncOn, Syncer};
use crate::vendor::ObjectVendor;

/// The shared collaborators a runner works against, built once in `main`
/// (or per test) and threaded to every runner by reference. Keeping this
/// explicit means independent harnesses can coexist in one process.
pub struct Harness {
    pub vendor: Arc<ObjectVendor>,
    pub reporter: Reporter,
    pub syncer: Arc<dyn Syncer>,
    pub sync_on: SyncOn,
    /// Chunk size for each write and read.
    pub iosize: usize,
    /// 0 = write-only, 100 = read-only.
    pub read_percent: u8,
    /// Non-blocking, drop-on-full error reporting back to the coordinator.
    pub errors: flume::Sender<Error>,
}
