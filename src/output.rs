//! Result writer: one JSONL line per run.
//!
//! Lines are appended with a single write while holding an in-process lock
//! for the target path and an advisory `flock` on the file, so runs sharing
//! a sink never interleave, whether they live in one process or several.
//! `per_run_file` sends each run to its own `<stem>-<run_id>.jsonl` instead.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::OutputDescriptor;
use crate::error::{MarbleError, Result};
use crate::runner::RunResult;

/// Where a run's record goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub per_run_file: bool,
}

impl OutputTarget {
    /// Output path from the config, unless overridden on the command line
    pub fn resolve(descriptor: &OutputDescriptor, path_override: Option<&Path>) -> Result<Self> {
        let path = match (path_override, descriptor.file_path.as_deref()) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => PathBuf::from(path),
            (None, None) => return Err(MarbleError::config("output.file_path is required")),
        };
        Ok(Self {
            path,
            per_run_file: descriptor.per_run_file,
        })
    }

    /// Concrete file for one run
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        if !self.per_run_file {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results".to_string());
        self.path.with_file_name(format!("{}-{}.jsonl", stem, run_id))
    }
}

/// Appends run records to JSONL sinks
#[derive(Debug, Default)]
pub struct ResultWriter {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ResultWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the run's record; returns the file written
    pub fn write(&self, result: &RunResult, target: &OutputTarget) -> Result<PathBuf> {
        let path = target.path_for(&result.run_id);
        let mut line = result.to_json_line()?;
        line.push('\n');

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| MarbleError::Output(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let lock = self.lock_for(&path)?;
        let _guard = lock
            .lock()
            .map_err(|_| MarbleError::Output(format!("lock for {} is poisoned", path.display())))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MarbleError::Output(format!("cannot open {}: {}", path.display(), e)))?;
        // Released when the file is closed
        lock_file(&file)
            .map_err(|e| MarbleError::Output(format!("cannot lock {}: {}", path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MarbleError::Output(format!("cannot write {}: {}", path.display(), e)))?;
        file.flush()?;

        log::info!("Wrote run {} to {}", result.run_id, path.display());
        Ok(path)
    }

    fn lock_for(&self, path: &Path) -> Result<Arc<Mutex<()>>> {
        let key = lock_key(path);
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| MarbleError::Output("writer lock table is poisoned".to_string()))?;
        Ok(locks.entry(key).or_default().clone())
    }
}

/// Absolute path naming the file whether or not it exists yet
fn lock_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Exclusive advisory lock, blocking until other holders let go
#[cfg(unix)]
fn lock_file(file: &File) -> std::io::Result<()> {
    use libc::{LOCK_EX, flock};
    use std::os::unix::io::AsRawFd;

    let result = unsafe { flock(file.as_raw_fd(), LOCK_EX) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_file(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_prefers_override() {
        let descriptor = OutputDescriptor {
            file_path: Some("result/a.jsonl".to_string()),
            format: None,
            per_run_file: false,
        };
        let target = OutputTarget::resolve(&descriptor, Some(Path::new("/tmp/b.jsonl"))).unwrap();
        assert_eq!(target.path, PathBuf::from("/tmp/b.jsonl"));

        let target = OutputTarget::resolve(&descriptor, None).unwrap();
        assert_eq!(target.path, PathBuf::from("result/a.jsonl"));
    }

    #[test]
    fn test_resolve_without_path_is_config_error() {
        let err = OutputTarget::resolve(&OutputDescriptor::default(), None).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_per_run_path() {
        let target = OutputTarget {
            path: PathBuf::from("out/bargaining.jsonl"),
            per_run_file: true,
        };
        assert_eq!(
            target.path_for("run-1-abcd"),
            PathBuf::from("out/bargaining-run-1-abcd.jsonl")
        );

        let shared = OutputTarget {
            per_run_file: false,
            ..target
        };
        assert_eq!(shared.path_for("run-1-abcd"), PathBuf::from("out/bargaining.jsonl"));
    }

    #[test]
    fn test_lock_key_is_stable_across_creation() {
        let dir = TempDir::new_in(".").unwrap();
        let relative = dir.path().join("shared.jsonl");
        let absolute = std::env::current_dir().unwrap().join(&relative);
        assert!(relative.is_relative());

        let writer = ResultWriter::new();
        let before = writer.lock_for(&relative).unwrap();
        fs::write(&absolute, "").unwrap();
        let after = writer.lock_for(&relative).unwrap();
        let by_absolute = writer.lock_for(&absolute).unwrap();

        assert!(Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&before, &by_absolute));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_lock_excludes_other_handles() {
        use libc::{LOCK_EX, LOCK_NB, flock};
        use std::os::unix::io::AsRawFd;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.jsonl");
        let held = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        lock_file(&held).unwrap();

        let other = OpenOptions::new().append(true).open(&path).unwrap();
        let result = unsafe { flock(other.as_raw_fd(), LOCK_EX | LOCK_NB) };
        assert_ne!(result, 0);
        assert_eq!(std::io::Error::last_os_error().kind(), std::io::ErrorKind::WouldBlock);

        drop(held);
        let result = unsafe { flock(other.as_raw_fd(), LOCK_EX | LOCK_NB) };
        assert_eq!(result, 0);
    }
}
