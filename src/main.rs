// src/main.rs
//
// soak-bench - sustained storage workload driver. Writes (and optionally
// reads back) a configured mix of object sizes against one or more
// filesystem trees while capturing per-I/O latency and interval bandwidth.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use soak_bench::config::Config;
use soak_bench::constants::RUNNER_ERROR_CAPACITY;
use soak_bench::error::Error;
use soak_bench::harness::Harness;
use soak_bench::reporter::{Reporter, ReporterConfig};
use soak_bench::runner::Runner;
use soak_bench::runner_list::RunnerList;
use soak_bench::store::{parse_open_flags, FileStore, ObjectStore, StoreOptions};
use soak_bench::syncer::{FlushMode, SyncBatcher, SyncInline, SyncNone, SyncOn, Syncer};
use soak_bench::vendor::ObjectVendor;

#[derive(Parser, Debug)]
#[command(name = "soak-bench", version, about = "Sustained storage workload driver")]
struct Cli {
    /// Path to the run configuration.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the output directory name from the config.
    #[arg(long)]
    runid: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(runid) = cli.runid {
        config.runid = Some(runid);
    }

    let runid = config.run_id();
    fs::create_dir_all(&runid).with_context(|| format!("creating run directory {runid}"))?;
    init_logging(Path::new(&runid))?;
    info!("run directory: {runid}");

    let vendor = ObjectVendor::new(&config.size, config.compressibility)
        .context("cannot create object vendor")?;

    let (syncer, sync_on) = build_syncer(&config)?;

    let reporter = Reporter::new(
        ReporterConfig {
            latency_enabled: config.reporter.loglatency,
            bandwidth_enabled: config.reporter.logbandwidth,
            interval: config.reporter.interval,
            warm_up: config.reporter.warmup,
            capture: config.reporter.capture.clone(),
        },
        Path::new(&runid),
        Some(&cli.config),
        syncer.clone(),
    )
    .context("failed creating reporter")?;

    let (error_tx, error_rx) = flume::bounded::<Error>(RUNNER_ERROR_CAPACITY);
    let cancel = CancellationToken::new();

    let harness = Arc::new(Harness {
        vendor: vendor.clone(),
        reporter: reporter.clone(),
        syncer: syncer.clone(),
        sync_on,
        iosize: config.iosize as usize,
        read_percent: config.read,
        errors: error_tx,
    });

    let mut runners = RunnerList::new(
        cancel.child_token(),
        config.file.setup.clone(),
        config.file.teardown.clone(),
    );
    start_file_runners(&config, &runid, &harness, &mut runners)?;
    runners.start().context("starting runners")?;

    info!("running... press Control-C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Control-C, stopping.");
        }
        received = error_rx.recv_async() => {
            if let Ok(e) = received {
                error!("runner error: {e}");
            }
        }
    }

    // Shutdown order matters: freeze the logs, stop producers of samples,
    // flush pending durability work, then let the reporter summarize, and
    // only then stop the vendor the runners were draining.
    reporter.pre_stop();
    tokio::task::spawn_blocking(move || runners.stop())
        .await
        .context("joining runners")?;
    syncer.stop().await;
    reporter.stop().await;
    vendor.stop();

    Ok(())
}

/// Duplicate console logging into `{runid}/log.txt`.
fn init_logging(run_dir: &Path) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_path = run_dir.join("log.txt");
    let log_file = Arc::new(
        File::create(&log_path)
            .with_context(|| format!("creating {}", log_path.display()))?,
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(log_file))
        .init();

    Ok(())
}

fn build_syncer(config: &Config) -> Result<(Arc<dyn Syncer>, SyncOn)> {
    let mut will_sync = true;

    let syncer: Arc<dyn Syncer> = match config.file.sync.as_str() {
        "close" | "inline" => {
            info!("syncing inline");
            Arc::new(SyncInline::new())
        }
        "batch" | "batched" | "batcher" => {
            info!("syncing in batches");

            if config.sync_batcher.max_wait.is_zero() {
                bail!("no max_wait specified; set 'sync_batcher.max_wait'");
            }
            if config.sync_batcher.max_pending == 0 {
                bail!("no max_pending specified; set 'sync_batcher.max_pending'");
            }

            SyncBatcher::new(
                config.sync_batcher.max_wait,
                config.sync_batcher.max_pending,
                flush_mode(config)?,
            )
        }
        _ => {
            will_sync = false;
            Arc::new(SyncNone)
        }
    };

    let mut sync_on = SyncOn::Close;
    if will_sync {
        match config.file.sync_on.as_str() {
            "write" | "io" => {
                sync_on = SyncOn::Write;
                info!("sync after every write");
            }
            _ => info!("sync on file close"),
        }
    }

    Ok((syncer, sync_on))
}

#[cfg(all(target_os = "linux", feature = "io-uring"))]
fn flush_mode(_config: &Config) -> Result<FlushMode> {
    use soak_bench::constants::URING_ENTRIES;
    use soak_bench::uring::FsyncEngine;

    let engine = FsyncEngine::new(URING_ENTRIES).context("cannot initialize io_uring")?;
    Ok(FlushMode::Uring(Arc::new(engine)))
}

#[cfg(not(all(target_os = "linux", feature = "io-uring")))]
fn flush_mode(config: &Config) -> Result<FlushMode> {
    Ok(if config.sync_batcher.parallel {
        FlushMode::Parallel
    } else {
        FlushMode::Sequential
    })
}

fn start_file_runners(
    config: &Config,
    runid: &str,
    harness: &Arc<Harness>,
    runners: &mut RunnerList,
) -> Result<()> {
    if config.file.paths.is_empty() {
        info!("no file runner paths specified; skipping");
        return Ok(());
    }

    let open_flags = parse_open_flags(&config.file.open_flags)?;
    let opts = StoreOptions {
        open_flags,
        subdirs: config.subdirs,
        scan_existing: config.read > 0,
    };

    let mut total = 0;
    for path in &config.file.paths {
        let store = FileStore::new(path, runid, &opts)
            .with_context(|| format!("cannot init store at {}", path.display()))?;

        if config.read > 0 && store.existing_count() == 0 {
            bail!(
                "read traffic configured but no existing objects under {}",
                path.display()
            );
        }

        let store: Arc<dyn ObjectStore> = Arc::new(store);
        runners.add_store(store.clone());

        for _ in 0..config.file.runners_per_path {
            total += 1;
            runners.add_runner(Runner::new(harness, store.clone(), total));
        }
    }

    info!("created {total} runners across {} paths", config.file.paths.len());
    Ok(())
}
