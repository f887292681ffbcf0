// src/store.rs
//
// Placement of objects in one filesystem tree, plus writer/reader
// acquisition with the configured open flags.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::{rng, Rng};
use tracing::info;
use ulid::Ulid;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Capability set a runner needs from its storage target.
pub trait ObjectStore: Send + Sync {
    /// Opens `name` for create + write-only, optionally under a
    /// uniformly-chosen striping subdirectory.
    fn get_writer(&self, name: &str) -> Result<StoreWriter>;

    /// Opens an existing object read-only.
    fn get_reader(&self, path: &Path) -> Result<File>;

    /// A previously-scanned existing object, uniformly at random.
    fn random_existing(&self) -> Result<PathBuf>;

    fn root(&self) -> &Path;
}

/// Write handle for one object. The underlying file is shared with any
/// in-flight sync request, so the descriptor closes on the last release.
pub struct StoreWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl StoreWriter {
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.file).write(buf)
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the descriptor and reports the close error, unless a sync
    /// request still holds the file (then the last release closes it).
    pub fn close(self) -> io::Result<()> {
        match Arc::into_inner(self.file) {
            #[cfg(unix)]
            Some(file) => {
                use std::os::fd::IntoRawFd;
                let fd = file.into_raw_fd();
                // SAFETY: into_raw_fd transferred ownership of the fd.
                if unsafe { libc::close(fd) } != 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            }
            #[cfg(not(unix))]
            Some(file) => {
                drop(file);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Store construction knobs shared by every path.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub open_flags: i32,
    pub subdirs: u32,
    /// Walk the base path for readable objects at construction. Only wanted
    /// when read traffic is configured.
    pub scan_existing: bool,
}

/// Object store rooted at `<base>/<runid>`.
pub struct FileStore {
    base: PathBuf,
    root: PathBuf,
    open_flags: i32,
    subdirs: u32,
    existing: Vec<PathBuf>,
}

impl FileStore {
    pub fn new(base: &Path, runid: &str, opts: &StoreOptions) -> Result<Self> {
        let root = base.join(runid);
        fs::create_dir_all(&root)
            .map_err(|e| Error::io(format!("cannot init file store {}", root.display()), e))?;

        for d in 0..opts.subdirs {
            let dir = root.join(format!("d{d:02}"));
            fs::create_dir_all(&dir)
                .map_err(|e| Error::io(format!("cannot create {}", dir.display()), e))?;
        }

        let existing = if opts.scan_existing {
            let found = scan_existing(base);
            info!("found {} existing objects under {}", found.len(), base.display());
            found
        } else {
            Vec::new()
        };

        Ok(FileStore {
            base: base.to_path_buf(),
            root,
            open_flags: opts.open_flags,
            subdirs: opts.subdirs,
            existing,
        })
    }

    pub fn existing_count(&self) -> usize {
        self.existing.len()
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl ObjectStore for FileStore {
    fn get_writer(&self, name: &str) -> Result<StoreWriter> {
        let dir = if self.subdirs > 0 {
            self.root
                .join(format!("d{:02}", rng().random_range(0..self.subdirs)))
        } else {
            self.root.clone()
        };
        let path = dir.join(name);

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        if self.open_flags != 0 {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(self.open_flags);
        }

        let file = options
            .open(&path)
            .map_err(|e| Error::io(format!("cannot open {} for writing", path.display()), e))?;

        Ok(StoreWriter {
            file: Arc::new(file),
            path,
        })
    }

    fn get_reader(&self, path: &Path) -> Result<File> {
        File::open(path).map_err(|e| Error::io(format!("cannot open {}", path.display()), e))
    }

    fn random_existing(&self) -> Result<PathBuf> {
        if self.existing.is_empty() {
            return Err(Error::NoObjects);
        }
        let idx = rng().random_range(0..self.existing.len());
        Ok(self.existing[idx].clone())
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Records every regular file under `base` whose stem parses as a ULID.
/// Anything else (logs, CSVs, stray files) is not a readable object.
fn scan_existing(base: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if Ulid::from_string(stem).is_ok() {
            found.push(entry.into_path());
        }
    }

    found
}

/// Parses the `file.open_flags` config list. O_DIRECT is only available on
/// Linux.
pub fn parse_open_flags(flags: &[String]) -> Result<i32> {
    let mut open_flags = 0;

    for flag in flags {
        match flag.as_str() {
            "o_sync" | "O_SYNC" | "sync" | "SYNC" => open_flags |= libc::O_SYNC,
            "o_direct" | "O_DIRECT" | "direct" | "DIRECT" => {
                #[cfg(target_os = "linux")]
                {
                    open_flags |= libc::O_DIRECT;
                }
                #[cfg(not(target_os = "linux"))]
                return Err(Error::Config(
                    "O_DIRECT is only supported on Linux".into(),
                ));
            }
            other => {
                return Err(Error::Config(format!("unknown open flag '{other}'")));
            }
        }
    }

    Ok(open_flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writer_creates_files_under_the_run_root() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "run-1", &StoreOptions::default()).unwrap();

        let name = format!("{}.dat", Ulid::new());
        let mut writer = store.get_writer(&name).unwrap();
        writer.write(b"hello").unwrap();
        writer.close().unwrap();

        let written = tmp.path().join("run-1").join(&name);
        assert_eq!(fs::read(written).unwrap(), b"hello");
    }

    #[test]
    fn subdirs_stripe_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = StoreOptions {
            subdirs: 4,
            ..Default::default()
        };
        let store = FileStore::new(tmp.path(), "run-1", &opts).unwrap();

        for d in 0..4 {
            assert!(tmp.path().join("run-1").join(format!("d{d:02}")).is_dir());
        }

        for _ in 0..16 {
            let name = format!("{}.dat", Ulid::new());
            let mut writer = store.get_writer(&name).unwrap();
            writer.write(b"x").unwrap();
            writer.close().unwrap();
            // Parent must be one of the striping dirs, not the root.
            let parent = writer_parent(&store, &name);
            assert!(parent.starts_with("d"));
        }

        fn writer_parent(store: &FileStore, name: &str) -> String {
            for entry in WalkDir::new(store.root()) {
                let entry = entry.unwrap();
                if entry.file_name().to_string_lossy() == name {
                    return entry
                        .path()
                        .parent()
                        .unwrap()
                        .file_name()
                        .unwrap()
                        .to_string_lossy()
                        .into_owned();
                }
            }
            panic!("object {name} not found");
        }
    }

    #[test]
    fn scan_finds_only_ulid_named_files() {
        let tmp = tempfile::tempdir().unwrap();
        let old_run = tmp.path().join("old-run");
        fs::create_dir_all(&old_run).unwrap();

        let a = old_run.join(format!("{}.dat", Ulid::new()));
        let b = old_run.join(format!("{}.log", Ulid::new()));
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        fs::write(old_run.join("bandwidth.csv"), b"not an object").unwrap();

        let opts = StoreOptions {
            scan_existing: true,
            ..Default::default()
        };
        let store = FileStore::new(tmp.path(), "run-2", &opts).unwrap();

        assert_eq!(store.existing_count(), 2);
        let picked = store.random_existing().unwrap();
        assert!(picked == a || picked == b);

        let mut contents = String::new();
        store
            .get_reader(&picked)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents == "a" || contents == "b");
    }

    #[test]
    fn empty_scan_yields_no_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = StoreOptions {
            scan_existing: true,
            ..Default::default()
        };
        let store = FileStore::new(tmp.path(), "run-1", &opts).unwrap();

        assert!(matches!(store.random_existing(), Err(Error::NoObjects)));
    }

    #[test]
    fn open_flag_parsing() {
        assert_eq!(parse_open_flags(&[]).unwrap(), 0);
        assert_eq!(
            parse_open_flags(&["O_SYNC".into()]).unwrap(),
            libc::O_SYNC
        );
        assert_eq!(parse_open_flags(&["sync".into()]).unwrap(), libc::O_SYNC);
        assert!(parse_open_flags(&["O_EVIL".into()]).is_err());

        #[cfg(target_os = "linux")]
        assert_eq!(
            parse_open_flags(&["direct".into()]).unwrap(),
            libc::O_DIRECT
        );
    }
}
