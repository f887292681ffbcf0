// src/config.rs

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::size_spec::parse_size_bytes;

/// Run configuration, loaded from `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Output subdirectory. Defaults to a local wall-clock timestamp.
    #[serde(default)]
    pub runid: Option<String>,

    /// Chunk size per I/O. Accepts "1MB"-style suffixes or a plain number.
    #[serde(default = "default_iosize", deserialize_with = "de_size")]
    pub iosize: u64,

    /// fio bssplit-style size spec; see `size_spec`.
    #[serde(default = "default_size")]
    pub size: String,

    /// 0 = incompressible data, 100 = fully compressible.
    #[serde(default = "default_compressibility")]
    pub compressibility: u8,

    /// Number of per-store striping subdirectories; 0 writes to the root.
    #[serde(default)]
    pub subdirs: u32,

    /// Read percentage, 0..=100.
    #[serde(default)]
    pub read: u8,

    #[serde(default)]
    pub file: FileConfig,

    #[serde(default)]
    pub sync_batcher: SyncBatcherConfig,

    pub reporter: ReporterSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
    /// Filesystem roots to drive. Empty skips file runners entirely.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub runners_per_path: usize,

    /// "" / "close" / "inline" / "batch"
    #[serde(default)]
    pub sync: String,

    /// "close" (default) / "write"
    #[serde(default)]
    pub sync_on: String,

    /// Subset of {O_SYNC, O_DIRECT}.
    #[serde(default)]
    pub open_flags: Vec<String>,

    #[serde(default)]
    pub setup: Option<String>,

    #[serde(default)]
    pub teardown: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncBatcherConfig {
    #[serde(default, with = "humantime_serde")]
    pub max_wait: Duration,

    #[serde(default)]
    pub max_pending: usize,

    #[serde(default)]
    pub parallel: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterSection {
    /// Bandwidth aggregation interval. Required.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Samples arriving this early are discarded.
    #[serde(default, with = "humantime_serde")]
    pub warmup: Duration,

    #[serde(default)]
    pub loglatency: bool,

    #[serde(default)]
    pub logbandwidth: bool,

    /// filename -> shell command captured into the run directory at start.
    #[serde(default)]
    pub capture: HashMap<String, String>,
}

fn default_iosize() -> u64 {
    1 << 20
}

fn default_size() -> String {
    "4MB/100/dat".to_string()
}

fn default_compressibility() -> u8 {
    50
}

fn de_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeField {
        Number(u64),
        Text(String),
    }

    match SizeField::deserialize(deserializer)? {
        SizeField::Number(n) => Ok(n),
        SizeField::Text(s) => parse_size_bytes(&s).map_err(D::Error::custom),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::io(format!("error reading config file {}", path.display()), e))?;

        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.iosize == 0 {
            return Err(Error::Config("no io size specified; set 'iosize'".into()));
        }
        if self.size.is_empty() {
            return Err(Error::Config("no object size specified; set 'size'".into()));
        }
        if self.compressibility > 100 {
            return Err(Error::Config(format!(
                "compressibility {} out of range 0..=100",
                self.compressibility
            )));
        }
        if self.read > 100 {
            return Err(Error::Config(format!(
                "read {} out of range 0..=100",
                self.read
            )));
        }
        if self.reporter.interval.is_zero() {
            return Err(Error::Config(
                "no reporter interval specified; set 'reporter.interval'".into(),
            ));
        }
        if !self.file.paths.is_empty() && self.file.runners_per_path == 0 {
            return Err(Error::Config(
                "file store needs at least one runner per path; set 'file.runners_per_path'"
                    .into(),
            ));
        }
        Ok(())
    }

    /// The run directory name: the configured `runid`, or the local time
    /// the run started.
    pub fn run_id(&self) -> String {
        self.runid
            .clone()
            .unwrap_or_else(|| Local::now().format("%Y-%m-%d-%H-%M-%S").to_string())
    }
}
