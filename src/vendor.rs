// src/vendor.rs
//
// Background production of pre-filled payloads. Producer threads keep a
// bounded ready queue saturated so runners never wait on data generation,
// only on the storage target.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use rand::{rng, Rng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::constants::MAX_OBJECTS;
use crate::error::{Error, Result};
use crate::sequence::ByteSequence;
use crate::size_spec::{parse_size_spec, VendorConfig};

/// A unit of work: one payload destined to become one file.
///
/// The buffer is leased from the vendor's pool and goes back on drop, so an
/// object handed to a runner is returned exactly once no matter which exit
/// path the runner takes. The id is freshly assigned for every lease to
/// prevent recycled buffers from colliding on file names.
pub struct Object {
    pub id: Ulid,
    pub extension: Arc<str>,
    buf: Vec<u8>,
    len: usize,
    pool: Arc<BufferPool>,
}

impl Object {
    /// The active payload slice.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// "{ulid}.{extension}"
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id, self.extension)
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

/// Free list of full-size payload buffers. Returned buffers are not zeroed;
/// the next producer overwrites the active slice.
struct BufferPool {
    bufs: ArrayQueue<Vec<u8>>,
    buf_size: usize,
}

impl BufferPool {
    fn new(buf_size: usize, capacity: usize) -> Self {
        BufferPool {
            bufs: ArrayQueue::new(capacity),
            buf_size,
        }
    }

    fn take(&self) -> Vec<u8> {
        self.bufs
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_size])
    }

    fn put(&self, buf: Vec<u8>) {
        if buf.capacity() >= self.buf_size {
            // A full queue drops the buffer; the pool stays bounded.
            let _ = self.bufs.push(buf);
        }
    }
}

/// Concurrent producer of sized, pattern-filled objects.
pub struct ObjectVendor {
    config: VendorConfig,
    ready: flume::Receiver<Object>,
    cancel: CancellationToken,
    producers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ObjectVendor {
    /// Parses the size spec (see [`crate::size_spec`]) and starts
    /// `max(1, NCPU/4)` producer threads.
    pub fn new(sizespec: &str, compressibility: u8) -> Result<Arc<Self>> {
        let mut config = parse_size_spec(sizespec)?;

        if compressibility > 100 {
            return Err(Error::Config(format!(
                "compressibility {compressibility} out of range 0..=100"
            )));
        }
        config.compressibility = compressibility;

        info!("object size spec: {sizespec}");
        info!("compressibility: {compressibility}");

        let (tx, rx) = flume::bounded(MAX_OBJECTS);
        let pool = Arc::new(BufferPool::new(config.max_size, MAX_OBJECTS + 16));

        let vendor = Arc::new(ObjectVendor {
            config,
            ready: rx,
            cancel: CancellationToken::new(),
            producers: Mutex::new(Vec::new()),
        });

        let workers = thread::available_parallelism()
            .map(|n| n.get() / 4)
            .unwrap_or(1)
            .max(1);

        for n in 0..workers {
            let v = vendor.clone();
            let tx = tx.clone();
            let pool = pool.clone();

            let handle = thread::Builder::new()
                .name(format!("vendor-{n}"))
                .spawn(move || v.produce(n, tx, pool))
                .map_err(|e| Error::io("spawning vendor producer", e))?;

            vendor.producers.lock().push(handle);
        }

        Ok(vendor)
    }

    /// Blocks until a filled object is available. Fails only once the
    /// vendor has been stopped and the ready queue drained.
    pub fn get_object(&self) -> Result<Object> {
        self.ready.recv().map_err(|_| Error::Cancelled)
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Cancels and joins all producer threads.
    pub fn stop(&self) {
        self.cancel.cancel();
        for handle in self.producers.lock().drain(..) {
            let _ = handle.join();
        }
        debug!("object vendor stopped");
    }

    fn produce(&self, n: usize, tx: flume::Sender<Object>, pool: Arc<BufferPool>) {
        info!("starting object vendor {}", n + 1);

        let mut seq = ByteSequence::new(0);
        seq.seed(n as u64);
        let mut rand = rng();

        while !self.cancel.is_cancelled() {
            let mut object = self.make_object(&mut seq, &mut rand, &pool);

            loop {
                match tx.send_timeout(object, Duration::from_millis(100)) {
                    Ok(()) => break,
                    Err(flume::SendTimeoutError::Timeout(returned)) => {
                        if self.cancel.is_cancelled() {
                            return;
                        }
                        object = returned;
                    }
                    Err(flume::SendTimeoutError::Disconnected(_)) => return,
                }
            }
        }
    }

    fn make_object(
        &self,
        seq: &mut ByteSequence,
        rand: &mut impl Rng,
        pool: &Arc<BufferPool>,
    ) -> Object {
        let mut buf = pool.take();
        buf.resize(self.config.max_size, 0);

        let size = self.config.sizes[rand.random_range(0..100)];
        let extension = self.config.extensions[&size].clone();

        seq.pattern_fill(&mut buf[..size], self.config.compressibility);

        Object {
            id: Ulid::new(),
            extension,
            buf,
            len: size,
            pool: pool.clone(),
        }
    }
}
