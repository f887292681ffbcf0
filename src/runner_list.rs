// src/runner_list.rs

use std::sync::Arc;
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::runner::Runner;
use crate::store::ObjectStore;
use crate::util::run_cmd;

/// Owns the set of runners and their stores, plus the optional shell
/// commands run before start and after stop.
pub struct RunnerList {
    runners: Vec<Runner>,
    stores: Vec<Arc<dyn ObjectStore>>,
    setup_cmd: Option<String>,
    teardown_cmd: Option<String>,
    cancel: CancellationToken,
    threads: Vec<thread::JoinHandle<()>>,
}

impl RunnerList {
    pub fn new(
        cancel: CancellationToken,
        setup_cmd: Option<String>,
        teardown_cmd: Option<String>,
    ) -> Self {
        RunnerList {
            runners: Vec::new(),
            stores: Vec::new(),
            setup_cmd,
            teardown_cmd,
            cancel,
            threads: Vec::new(),
        }
    }

    pub fn add_runner(&mut self, runner: Runner) {
        self.runners.push(runner);
    }

    pub fn add_store(&mut self, store: Arc<dyn ObjectStore>) {
        self.stores.push(store);
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len() + self.threads.len()
    }

    pub fn stores(&self) -> &[Arc<dyn ObjectStore>] {
        &self.stores
    }

    /// Runs the setup command, then spawns every runner on its own thread
    /// under the shared cancellation token. A setup failure aborts the
    /// start.
    pub fn start(&mut self) -> Result<()> {
        if let Some(cmd) = &self.setup_cmd {
            info!("running: {cmd}");
            run_cmd(cmd)?;
        }

        for mut runner in self.runners.drain(..) {
            let token = self.cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("runner-{}", runner.id()))
                .spawn(move || runner.run(&token))
                .map_err(|e| crate::error::Error::io("spawning runner", e))?;
            self.threads.push(handle);
        }

        info!("all runners started");
        Ok(())
    }

    /// Cancels, joins every runner, then runs the teardown command.
    /// Teardown failures are logged, not propagated.
    pub fn stop(&mut self) {
        if !self.threads.is_empty() {
            self.cancel.cancel();
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
            info!("runners stopped");
        }

        if let Some(cmd) = &self.teardown_cmd {
            info!("running: {cmd}");
            if let Err(e) = run_cmd(cmd) {
                error!("teardown: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;
    use crate::reporter::{Reporter, ReporterConfig};
    use crate::store::{FileStore, StoreOptions};
    use crate::syncer::{SyncNone, SyncOn};
    use crate::vendor::ObjectVendor;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_and_stop_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let vendor = ObjectVendor::new("4KB/100/dat", 0).unwrap();
        let reporter = Reporter::new(
            ReporterConfig {
                latency_enabled: false,
                bandwidth_enabled: false,
                interval: Duration::from_secs(60),
                warm_up: Duration::ZERO,
                capture: HashMap::new(),
            },
            tmp.path(),
            None,
            Arc::new(SyncNone),
        )
        .unwrap();
        let (err_tx, _err_rx) = flume::bounded(10);

        let harness = Arc::new(Harness {
            vendor: vendor.clone(),
            reporter,
            syncer: Arc::new(SyncNone),
            sync_on: SyncOn::Close,
            iosize: 4096,
            read_percent: 0,
            errors: err_tx,
        });

        let store: Arc<dyn ObjectStore> = Arc::new(
            FileStore::new(tmp.path(), "run", &StoreOptions::default()).unwrap(),
        );

        let marker = tmp.path().join("setup-ran");
        let mut list = RunnerList::new(
            CancellationToken::new(),
            Some(format!("touch {}", marker.display())),
            None,
        );
        list.add_store(store.clone());
        for id in 0..3 {
            list.add_runner(Runner::new(&harness, store.clone(), id));
        }

        list.start().unwrap();
        assert!(marker.exists(), "setup command did not run");

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::spawn_blocking(move || {
            list.stop();
        })
        .await
        .unwrap();

        vendor.stop();
    }

    #[test]
    fn failing_setup_aborts_start() {
        let mut list = RunnerList::new(CancellationToken::new(), Some("false".into()), None);
        assert!(list.start().is_err());
    }
}
