// src/runner.rs
//
// One cooperative work loop per agent: lease an object, stream it out in
// iosize chunks (or read an existing one back), emit a latency sample per
// I/O, and honor the configured durability policy.

use std::io::{self, Read};
use std::sync::Arc;

use rand::{rng, Rng};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span};

use crate::error::{Error, Result};
use crate::harness::Harness;
use crate::reporter::{OpKind, Reporter};
use crate::store::{ObjectStore, StoreWriter};
use crate::syncer::{SyncOn, Syncer};
use crate::vendor::ObjectVendor;

pub struct Runner {
    id: usize,
    store: Arc<dyn ObjectStore>,
    vendor: Arc<ObjectVendor>,
    reporter: Reporter,
    syncer: Arc<dyn Syncer>,
    sync_on: SyncOn,
    iosize: usize,
    read_percent: u8,
    errors: flume::Sender<Error>,
    read_buf: Vec<u8>,
}

impl Runner {
    pub fn new(harness: &Arc<Harness>, store: Arc<dyn ObjectStore>, id: usize) -> Self {
        info!(id, "creating runner");

        Runner {
            id,
            store,
            vendor: harness.vendor.clone(),
            reporter: harness.reporter.clone(),
            syncer: harness.syncer.clone(),
            sync_on: harness.sync_on,
            iosize: harness.iosize,
            read_percent: harness.read_percent,
            errors: harness.errors.clone(),
            read_buf: vec![0u8; harness.iosize],
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Work loop; returns once the token is cancelled. I/O errors go to the
    /// error channel (non-blocking, dropped when full) and the loop
    /// continues.
    pub fn run(&mut self, cancel: &CancellationToken) {
        let span = info_span!("runner", id = self.id);
        let _entered = span.enter();
        info!("running");

        while !cancel.is_cancelled() {
            let result = if self.pick_read() {
                self.read_object(cancel)
            } else {
                self.write_object(cancel)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    let _ = self.errors.try_send(e);
                }
            }
        }
    }

    fn pick_read(&self) -> bool {
        match self.read_percent {
            0 => false,
            100 => true,
            p => rng().random_range(0..100) < p,
        }
    }

    fn write_object(&mut self, cancel: &CancellationToken) -> Result<()> {
        let object = self.vendor.get_object()?;
        let mut writer = self.store.get_writer(&object.file_name())?;

        let body = self
            .write_chunks(&mut writer, object.data(), cancel)
            .and_then(|_| match self.sync_on {
                SyncOn::Close => self.syncer.sync(&writer),
                SyncOn::Write => Ok(()),
            });

        // Close on every path; a close failure only surfaces when the body
        // succeeded.
        match body {
            Ok(()) => writer
                .close()
                .map_err(|e| Error::io("close", e)),
            Err(e) => {
                let _ = writer.close();
                Err(e)
            }
        }
    }

    fn write_chunks(
        &mut self,
        writer: &mut StoreWriter,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut offset = 0;

        while offset < data.len() {
            let len = self.iosize.min(data.len() - offset);
            let chunk = &data[offset..offset + len];

            let sample = self.reporter.get_sample();
            let wrote = writer.write(chunk);

            match wrote {
                Ok(n) => {
                    self.reporter.capture_sample(sample, n as u64, OpKind::Write);
                    offset += n;

                    if n < len {
                        return Err(Error::ShortWrite {
                            expected: len,
                            written: n,
                        });
                    }
                }
                Err(e) => {
                    self.reporter.capture_sample(sample, 0, OpKind::Write);
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        break;
                    }
                    error!("write: {e}");
                    return Err(Error::io("write", e));
                }
            }

            if self.sync_on == SyncOn::Write {
                self.syncer.sync(writer)?;
            }

            // Between chunks only; the chunk in progress always completes,
            // so a cancelled single-chunk object is still whole on disk.
            if cancel.is_cancelled() {
                break;
            }
        }

        Ok(())
    }

    fn read_object(&mut self, cancel: &CancellationToken) -> Result<()> {
        let path = self.store.random_existing()?;
        let mut reader = self.store.get_reader(&path)?;

        loop {
            let sample = self.reporter.get_sample();
            let got = reader.read(&mut self.read_buf);

            match got {
                Ok(0) => break,
                Ok(n) => self.reporter.capture_sample(sample, n as u64, OpKind::Read),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::io(format!("read {}", path.display()), e));
                }
            }

            // Same chunk-boundary poll as write_chunks; a large object must
            // not pin the runner past cancellation.
            if cancel.is_cancelled() {
                break;
            }
        }

        Ok(())
    }
}
