// src/reporter.rs
//
// Single consumer of latency samples. Aggregates interval bandwidth,
// appends per-I/O latency records, and emits the end-of-run summary.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::constants::{SAMPLE_CHANNEL_CAPACITY, SYNC_REPORT_INTERVAL, WARMUP_PROGRESS_INTERVAL};
use crate::error::{Error, Result};
use crate::syncer::Syncer;
use crate::util::{human_size, mean, median, run_cmd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

impl OpKind {
    const ALL: [OpKind; 2] = [OpKind::Write, OpKind::Read];

    fn idx(self) -> usize {
        match self {
            OpKind::Write => 0,
            OpKind::Read => 1,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Read => write!(f, "READ"),
            OpKind::Write => write!(f, "WRITE"),
        }
    }
}

/// One timed I/O. Started by a runner before the operation, completed
/// right after, then moved through the sample channel.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub start: Instant,
    pub finish: Instant,
    pub size: u64,
    pub op: OpKind,
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub latency_enabled: bool,
    pub bandwidth_enabled: bool,
    pub interval: Duration,
    pub warm_up: Duration,
    /// filename -> shell command; stdout lands in the run directory.
    pub capture: HashMap<String, String>,
}

/// End-of-run aggregates, owned by the loop task and handed back on stop.
#[derive(Debug, Default)]
struct Totals {
    bytes: [u64; 2],
    rates: [Vec<u64>; 2],
}

/// Cloneable handle; the loop task owns files and accumulators.
#[derive(Clone)]
pub struct Reporter {
    samples: flume::Sender<Sample>,
    pre_stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<tokio::task::JoinHandle<Totals>>>>,
}

impl Reporter {
    /// Opens the CSV logs, snapshots run state (config copy plus capture
    /// commands) into `dir`, and spawns the loop task. Must be called
    /// within a tokio runtime.
    pub fn new(
        config: ReporterConfig,
        dir: &Path,
        config_src: Option<&Path>,
        syncer: Arc<dyn Syncer>,
    ) -> Result<Self> {
        let bwlog = if config.bandwidth_enabled {
            Some(open_log(
                &dir.join("bandwidth.csv"),
                "# Time(sec), Rate(bytes/sec)",
            )?)
        } else {
            None
        };

        let latlog = if config.latency_enabled {
            Some(open_log(
                &dir.join("latency.csv"),
                "# Time(sec), Latency(sec), Size(bytes)",
            )?)
        } else {
            None
        };

        capture_run_state(dir, config_src, &config.capture)?;

        let (tx, rx) = flume::bounded(SAMPLE_CHANNEL_CAPACITY);
        let pre_stop = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            ReporterLoop {
                config,
                samples: rx,
                bwlog,
                latlog,
                pre_stop: pre_stop.clone(),
                cancel: cancel.clone(),
                syncer,
            }
            .run(),
        );

        Ok(Reporter {
            samples: tx,
            pre_stop,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Starts timing one I/O.
    pub fn get_sample(&self) -> Sample {
        let now = Instant::now();
        Sample {
            start: now,
            finish: now,
            size: 0,
            op: OpKind::Write,
        }
    }

    /// Completes a sample and pushes it to the loop task. Blocks when the
    /// channel backlog reaches capacity, throttling the caller instead of
    /// dropping data.
    pub fn capture_sample(&self, mut sample: Sample, size: u64, op: OpKind) {
        sample.finish = Instant::now();
        sample.size = size;
        sample.op = op;
        let _ = self.samples.send(sample);
    }

    /// Disables further log writes. Called before runners are shut down so
    /// their drain-out samples don't race the files.
    pub fn pre_stop(&self) {
        self.pre_stop.store(true, Ordering::Relaxed);
    }

    /// Cancels the loop task, joins it, and logs the summary.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        let Some(task) = task else { return };
        let Ok(totals) = task.await else { return };

        info!("reporter stopped");
        for op in OpKind::ALL {
            let i = op.idx();
            if totals.bytes[i] == 0 && totals.rates[i].is_empty() {
                continue;
            }
            info!("{op} median bandwidth: {}/sec", human_size(median(&totals.rates[i])));
            info!("{op} mean bandwidth: {}/sec", human_size(mean(&totals.rates[i])));
            info!("{op} total: {}", human_size(totals.bytes[i]));
        }
    }
}

fn open_log(path: &Path, header: &str) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(format!("failed creating {}", path.display()), e))?;

    let mut writer = BufWriter::new(file);
    writeln!(writer, "{header}")
        .map_err(|e| Error::io(format!("failed writing to {}", path.display()), e))?;
    Ok(writer)
}

/// Copies the run config and captures the output of each configured shell
/// command into the run directory, so a result set is self-describing.
fn capture_run_state(
    dir: &Path,
    config_src: Option<&Path>,
    capture: &HashMap<String, String>,
) -> Result<()> {
    if let Some(src) = config_src {
        fs::copy(src, dir.join("config.json"))
            .map_err(|e| Error::io(format!("cannot copy {}", src.display()), e))?;
    }

    for (file, command) in capture {
        let out = run_cmd(command)?;
        let dst: PathBuf = dir.join(file);
        fs::write(&dst, out)
            .map_err(|e| Error::io(format!("cannot write {}", dst.display()), e))?;
    }

    Ok(())
}

struct ReporterLoop {
    config: ReporterConfig,
    samples: flume::Receiver<Sample>,
    bwlog: Option<BufWriter<File>>,
    latlog: Option<BufWriter<File>>,
    pre_stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    syncer: Arc<dyn Syncer>,
}

impl ReporterLoop {
    async fn run(mut self) -> Totals {
        if !self.warm_up().await {
            self.flush();
            return Totals::default();
        }

        info!("reporter running");

        let start = Instant::now();
        let mut last_report = start;
        let mut interval_bytes = [0u64; 2];
        let mut totals = Totals::default();

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.interval,
            self.config.interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync_tick = tokio::time::interval_at(
            tokio::time::Instant::now() + SYNC_REPORT_INTERVAL,
            SYNC_REPORT_INTERVAL,
        );
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let samples = self.samples.clone();
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Runners are already joined; account whatever is still
                    // in flight so the totals balance.
                    while let Ok(sample) = samples.try_recv() {
                        self.account(sample, start, &mut interval_bytes, &mut totals);
                    }
                    self.flush();
                    return totals;
                }

                sample = samples.recv_async() => {
                    if let Ok(sample) = sample {
                        self.account(sample, start, &mut interval_bytes, &mut totals);
                    }
                }

                _ = tick.tick() => {
                    let now = Instant::now();
                    if !self.pre_stop.load(Ordering::Relaxed) {
                        let elapsed = now.duration_since(last_report).as_secs_f64();
                        self.report_interval(start, now, elapsed, &interval_bytes, &mut totals);
                    }
                    last_report = now;
                    interval_bytes = [0, 0];
                }

                _ = sync_tick.tick() => {
                    if !self.pre_stop.load(Ordering::Relaxed) {
                        self.syncer.report();
                    }
                }
            }
        }
    }

    /// Delays reporting until the warm-up is over, giving runners time to
    /// get up to speed. Samples arriving meanwhile are discarded. Returns
    /// false when cancelled mid-warm-up.
    async fn warm_up(&mut self) -> bool {
        let warm_up = self.config.warm_up;
        if warm_up.is_zero() {
            return true;
        }

        info!(
            "not enabled yet, in warm-up ({:.0} seconds)",
            warm_up.as_secs_f64()
        );

        let done = tokio::time::sleep(warm_up);
        tokio::pin!(done);
        let mut progress = tokio::time::interval_at(
            tokio::time::Instant::now() + WARMUP_PROGRESS_INTERVAL,
            WARMUP_PROGRESS_INTERVAL,
        );

        let samples = self.samples.clone();
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,

                _ = &mut done => {
                    info!("warm-up finished");
                    return true;
                }

                _ = progress.tick() => info!("waiting for warm-up to finish..."),

                sample = samples.recv_async() => {
                    let _ = sample;
                }
            }
        }
    }

    fn account(
        &mut self,
        sample: Sample,
        start: Instant,
        interval_bytes: &mut [u64; 2],
        totals: &mut Totals,
    ) {
        let i = sample.op.idx();
        interval_bytes[i] += sample.size;
        totals.bytes[i] += sample.size;

        if self.pre_stop.load(Ordering::Relaxed) {
            return;
        }
        if let Some(latlog) = &mut self.latlog {
            let _ = writeln!(
                latlog,
                "{:.3}, {:.6}, {}, {}",
                sample.finish.duration_since(start).as_secs_f64(),
                sample.finish.duration_since(sample.start).as_secs_f64(),
                sample.op,
                sample.size,
            );
        }
    }

    fn report_interval(
        &mut self,
        start: Instant,
        now: Instant,
        elapsed: f64,
        interval_bytes: &[u64; 2],
        totals: &mut Totals,
    ) {
        let offset = now.duration_since(start).as_secs_f64();

        for op in OpKind::ALL {
            let i = op.idx();
            let rate = (interval_bytes[i] as f64 / elapsed) as u64;

            info!("{op} bandwidth: {}/sec", human_size(rate));
            totals.rates[i].push(rate);

            if let Some(bwlog) = &mut self.bwlog {
                let _ = writeln!(bwlog, "{offset:.3}, {op}, {rate}");
            }
        }

        self.flush();
    }

    fn flush(&mut self) {
        if let Some(bwlog) = &mut self.bwlog {
            let _ = bwlog.flush();
        }
        if let Some(latlog) = &mut self.latlog {
            let _ = latlog.flush();
        }
    }
}
