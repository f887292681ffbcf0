// src/syncer.rs
//
// Durability strategies. SyncNone and SyncInline are trivial; SyncBatcher
// amortizes fsync cost across many concurrent writers while holding each
// request to a per-request wait deadline.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::constants::{BATCHER_LONG_INTERVAL, SYNC_INCOMING_CAPACITY};
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::store::StoreWriter;

#[cfg(all(target_os = "linux", feature = "io-uring"))]
use crate::uring::FsyncEngine;

/// When a runner issues the configured sync relative to its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOn {
    Close,
    Write,
}

/// Durability capability handed to every runner.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Makes the writer's data durable according to this strategy. Called
    /// from runner threads; may block.
    fn sync(&self, writer: &StoreWriter) -> Result<()>;

    /// Logs accumulated timing histograms and resets them.
    fn report(&self);

    /// Stops any background coordination.
    async fn stop(&self);
}

pub struct SyncNone;

#[async_trait]
impl Syncer for SyncNone {
    fn sync(&self, _writer: &StoreWriter) -> Result<()> {
        Ok(())
    }

    fn report(&self) {}

    async fn stop(&self) {}
}

/// Calls the writer's native fsync from the requesting runner's thread.
pub struct SyncInline {
    timings: Histogram,
}

impl SyncInline {
    pub fn new() -> Self {
        SyncInline {
            timings: Histogram::new(),
        }
    }
}

impl Default for SyncInline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Syncer for SyncInline {
    fn sync(&self, writer: &StoreWriter) -> Result<()> {
        let start = Instant::now();
        let result = writer.sync();
        self.timings.add(start.elapsed());
        result.map_err(|e| Error::io("sync", e))
    }

    fn report(&self) {
        info!("inline sync times");
        info!("{}", Histogram::headers());
        info!("{}", self.timings);
        self.timings.reset();
    }

    async fn stop(&self) {}
}

/// A durability ask in flight: the file to sync, when the runner asked, and
/// where to deliver the outcome.
struct SyncRequest {
    file: Arc<File>,
    submitted: Instant,
    reply: oneshot::Sender<io::Result<()>>,
}

/// How a drained batch is actually synced.
pub enum FlushMode {
    /// One fsync at a time on the blocking pool.
    Sequential,
    /// One blocking task per request, joined.
    Parallel,
    /// All fsyncs submitted to a single io_uring instance.
    #[cfg(all(target_os = "linux", feature = "io-uring"))]
    Uring(Arc<FsyncEngine>),
}

/// Coalesces durability requests from many runners into batched fsync
/// passes, bounded by both a pending-count threshold and a per-request
/// deadline: a request entering an empty batch arms the flush timer to
/// what is left of its `max_wait` budget, and later arrivals piggyback.
pub struct SyncBatcher {
    incoming: flume::Sender<SyncRequest>,
    max_wait: Duration,
    sync_time: Arc<Histogram>,
    total_time: Arc<Histogram>,
    cancel: CancellationToken,
    coordinator: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SyncBatcher {
    /// Starts the coordinator task. Must be called within a tokio runtime.
    pub fn new(max_wait: Duration, max_pending: usize, flush: FlushMode) -> Arc<Self> {
        let (tx, rx) = flume::bounded(SYNC_INCOMING_CAPACITY);
        let sync_time = Arc::new(Histogram::new());
        let total_time = Arc::new(Histogram::new());
        let cancel = CancellationToken::new();

        let coordinator = Coordinator {
            incoming: rx,
            pending: VecDeque::with_capacity(max_pending + 1),
            max_wait,
            max_pending,
            flush,
            sync_time: sync_time.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(coordinator.run());

        Arc::new(SyncBatcher {
            incoming: tx,
            max_wait,
            sync_time,
            total_time,
            cancel,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Time spent inside fsync alone, per batched request.
    pub fn sync_only(&self) -> &Histogram {
        &self.sync_time
    }

    /// Total time a runner waited, batch delay included.
    pub fn wait_and_sync(&self) -> &Histogram {
        &self.total_time
    }
}

#[async_trait]
impl Syncer for SyncBatcher {
    fn sync(&self, writer: &StoreWriter) -> Result<()> {
        let start = Instant::now();
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = SyncRequest {
            file: writer.file().clone(),
            submitted: start,
            reply: reply_tx,
        };

        self.incoming.send(request).map_err(|_| Error::Cancelled)?;
        let result = reply_rx.blocking_recv().map_err(|_| Error::Cancelled)?;

        self.total_time.add(start.elapsed());
        result.map_err(|e| Error::io("sync", e))
    }

    fn report(&self) {
        info!("batch sync times (sync only, then wait+sync)");
        info!("{}", Histogram::headers());
        info!("{}", self.sync_time);
        info!("{}", self.total_time);
        self.sync_time.reset();
        self.total_time.reset();
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.coordinator.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("sync batcher stopped");
    }
}

/// Single-task state machine. Being the sole owner of `pending` is what
/// makes the length checks sound.
struct Coordinator {
    incoming: flume::Receiver<SyncRequest>,
    pending: VecDeque<SyncRequest>,
    max_wait: Duration,
    max_pending: usize,
    flush: FlushMode,
    sync_time: Arc<Histogram>,
    cancel: CancellationToken,
}

impl Coordinator {
    async fn run(mut self) {
        info!("sync batcher running");

        let incoming = self.incoming.clone();
        let cancel = self.cancel.clone();

        // Armed "long" while idle; re-armed to the oldest waiter's deadline
        // once a batch opens.
        let timer = tokio::time::sleep(BATCHER_LONG_INTERVAL);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Requests already queued still get their sync; nothing
                    // new can arrive once the runners are joined.
                    while let Ok(request) = incoming.try_recv() {
                        self.pending.push_back(request);
                    }
                    self.sync_pending().await;
                    return;
                }

                request = incoming.recv_async() => {
                    let Ok(request) = request else {
                        self.sync_pending().await;
                        return;
                    };

                    if self.pending.is_empty() {
                        let wait = self.max_wait.saturating_sub(request.submitted.elapsed());
                        timer.as_mut().reset(tokio::time::Instant::now() + wait);
                    }

                    self.pending.push_back(request);

                    if self.pending.len() >= self.max_pending {
                        self.sync_pending().await;
                        timer.as_mut().reset(tokio::time::Instant::now() + BATCHER_LONG_INTERVAL);
                    }
                }

                _ = timer.as_mut() => {
                    self.sync_pending().await;
                    timer.as_mut().reset(tokio::time::Instant::now() + BATCHER_LONG_INTERVAL);
                }
            }
        }
    }

    /// Syncs everything currently pending and delivers each result to its
    /// requester.
    async fn sync_pending(&mut self) {
        let count = self.pending.len();
        if count == 0 {
            return;
        }

        let batch: Vec<SyncRequest> = self.pending.drain(..count).collect();
        let start = Instant::now();

        match &self.flush {
            FlushMode::Sequential => {
                for request in batch {
                    let file = request.file.clone();
                    let result = tokio::task::spawn_blocking(move || file.sync_all())
                        .await
                        .unwrap_or_else(|e| Err(io::Error::other(e)));
                    self.sync_time.add(start.elapsed());
                    let _ = request.reply.send(result);
                }
            }

            FlushMode::Parallel => {
                let mut joins = Vec::with_capacity(batch.len());
                for request in batch {
                    let file = request.file.clone();
                    joins.push((request, tokio::task::spawn_blocking(move || file.sync_all())));
                }
                for (request, join) in joins {
                    let result = join.await.unwrap_or_else(|e| Err(io::Error::other(e)));
                    self.sync_time.add(start.elapsed());
                    let _ = request.reply.send(result);
                }
            }

            #[cfg(all(target_os = "linux", feature = "io-uring"))]
            FlushMode::Uring(engine) => {
                let files: Vec<Arc<File>> = batch.iter().map(|r| r.file.clone()).collect();
                let engine = engine.clone();
                let submitted = tokio::task::spawn_blocking(move || engine.fsync_batch(&files))
                    .await
                    .unwrap_or_else(|e| Err(io::Error::other(e)));

                match submitted {
                    Ok(results) => {
                        for (request, result) in batch.into_iter().zip(results) {
                            self.sync_time.add(start.elapsed());
                            let _ = request.reply.send(result);
                        }
                    }
                    Err(e) => {
                        error!("batched fsync submission: {e}");
                        for request in batch {
                            let _ = request
                                .reply
                                .send(Err(io::Error::new(e.kind(), e.to_string())));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, ObjectStore, StoreOptions};
    use std::thread;

    fn temp_writer(store: &FileStore) -> StoreWriter {
        let name = format!("{}.dat", ulid::Ulid::new());
        let mut writer = store.get_writer(&name).unwrap();
        writer.write(b"payload").unwrap();
        writer
    }

    #[test]
    fn sync_none_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "r", &StoreOptions::default()).unwrap();
        let writer = temp_writer(&store);

        let syncer = SyncNone;
        syncer.sync(&writer).unwrap();
        syncer.report();
    }

    #[test]
    fn sync_inline_records_timings() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "r", &StoreOptions::default()).unwrap();
        let writer = temp_writer(&store);

        let syncer = SyncInline::new();
        syncer.sync(&writer).unwrap();
        syncer.sync(&writer).unwrap();
        assert_eq!(syncer.timings.total(), 2);

        syncer.report();
        assert_eq!(syncer.timings.total(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn batched_request_meets_its_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "r", &StoreOptions::default()).unwrap();
        let writer = temp_writer(&store);

        // max_pending high enough that only the deadline can flush.
        let batcher = SyncBatcher::new(Duration::from_millis(50), 100, FlushMode::Sequential);

        let b = batcher.clone();
        let elapsed = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            b.sync(&writer).unwrap();
            start.elapsed()
        })
        .await
        .unwrap();

        assert!(
            elapsed < Duration::from_millis(500),
            "single request waited {elapsed:?}, deadline was 50ms"
        );
        assert!(elapsed >= Duration::from_millis(40), "flushed before deadline");

        batcher.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn full_batch_flushes_early_and_coalesces() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "r", &StoreOptions::default()).unwrap();

        let max_pending = 10;
        // A deadline far away: only the pending threshold can flush.
        let batcher = SyncBatcher::new(Duration::from_secs(5), max_pending, FlushMode::Parallel);

        let start = Instant::now();
        let mut threads = Vec::new();
        for _ in 0..max_pending {
            let writer = temp_writer(&store);
            let b = batcher.clone();
            threads.push(thread::spawn(move || b.sync(&writer).unwrap()));
        }

        for t in threads {
            tokio::task::block_in_place(|| t.join().unwrap());
        }

        assert!(
            start.elapsed() < Duration::from_secs(2),
            "batch did not flush early"
        );
        assert_eq!(batcher.sync_only().total(), max_pending as u64);
        assert_eq!(batcher.wait_and_sync().total(), max_pending as u64);

        batcher.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_flushes_whatever_is_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "r", &StoreOptions::default()).unwrap();
        let writer = temp_writer(&store);

        let batcher = SyncBatcher::new(Duration::from_secs(60), 100, FlushMode::Sequential);

        let b = batcher.clone();
        let join = tokio::task::spawn_blocking(move || b.sync(&writer));

        // Let the request reach the coordinator, then stop without waiting
        // out the one-minute deadline.
        tokio::time::sleep(Duration::from_millis(50)).await;
        batcher.stop().await;

        join.await.unwrap().unwrap();
    }
}
