//! Workspace management (spec.md §6 "Workspace & logging"): every
//! invocation of `clownfishd`/`clownfish_local` gets a timestamped
//! directory under a log parent, the active config file is copied into it,
//! and a file lock on the config path prevents two invocations from racing
//! against the same configuration. Ported from `pylcommon.cmd_general.main`
//! and `clownfish_server.py`'s per-connection/per-worker sub-workspaces.

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use chrono::Local;
use nix::fcntl::{flock, FlockArg};

use clownfish_api::error::{ClownfishError, InternalError, ReportError};

/// Builds `<log_parent>/<YYYY-MM-DD-HH_MM_SS>`, creating it if absent
/// (spec.md §6 "one workspace directory per invocation").
pub fn new_workspace(log_parent: &Path) -> io::Result<PathBuf> {
    let identity = Local::now().format("%Y-%m-%d-%H_%M_%S").to_string();
    let workspace = log_parent.join(identity);
    fs::create_dir_all(&workspace)?;
    Ok(workspace)
}

/// Copies `config_fpath` into `workspace` under its own basename, so a
/// workspace is self-contained evidence of what config it ran with.
pub fn save_config_copy(workspace: &Path, config_fpath: &Path) -> Result<(), ClownfishError> {
    let file_name = config_fpath
        .file_name()
        .structured(InternalError::Invariant(format!(
            "config path '{}' has no file name",
            config_fpath.display()
        )))?;
    let dest = workspace.join(file_name);
    if dest != config_fpath {
        fs::copy(config_fpath, &dest).structured(InternalError::Invariant(format!(
            "failed to copy config '{}' into workspace '{}'",
            config_fpath.display(),
            workspace.display()
        )))?;
    }
    Ok(())
}

/// Holds an exclusive `flock` on `<config_fpath>.lock` for the lifetime of
/// the process invocation (spec.md §6 "Configuration lock"), mirroring
/// `filelock.FileLock` in the original. Dropping it releases the lock.
pub struct ConfigLock {
    _file: fs::File,
}

impl ConfigLock {
    /// Acquires the lock non-blockingly; fails loudly if another
    /// invocation already holds it, rather than queueing behind it.
    pub fn acquire(config_fpath: &Path) -> Result<Self, ClownfishError> {
        let lock_path = lock_path_for(config_fpath);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .structured(InternalError::Invariant(format!(
                "failed to open lock file '{}'",
                lock_path.display()
            )))?;
        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).structured(
            InternalError::Invariant(format!(
                "someone else is holding lock of file '{}', aborting to prevent conflicts",
                lock_path.display()
            )),
        )?;
        Ok(ConfigLock { _file: file })
    }
}

fn lock_path_for(config_fpath: &Path) -> PathBuf {
    let mut s = config_fpath.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

/// Creates `<workspace>/<name>` if missing, erroring if it exists and is
/// not a directory (spec.md §6 "per-thread sub-log workspace"; used for
/// both the fixed repair-worker pool and each session-worker thread).
pub fn sub_workspace(workspace: &Path, name: &str) -> Result<PathBuf, ClownfishError> {
    let dir = workspace.join(name);
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ClownfishError::new(InternalError::Invariant(format!(
                "'{}' is not a directory",
                dir.display()
            ))));
        }
    } else {
        fs::create_dir_all(&dir).structured(InternalError::Invariant(format!(
            "failed to create directory '{}'",
            dir.display()
        )))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_workspace_creates_a_timestamped_directory() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = new_workspace(parent.path()).unwrap();
        assert!(workspace.is_dir());
        assert!(workspace.starts_with(parent.path()));
    }

    #[test]
    fn sub_workspace_is_idempotent() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = new_workspace(parent.path()).unwrap();
        let a = sub_workspace(&workspace, "thread_worker_0").unwrap();
        let b = sub_workspace(&workspace, "thread_worker_0").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn save_config_copy_duplicates_the_file() {
        let parent = tempfile::tempdir().unwrap();
        let workspace = new_workspace(parent.path()).unwrap();
        let config = parent.path().join("clownfish.yaml");
        fs::write(&config, "ssh_hosts: []\n").unwrap();
        save_config_copy(&workspace, &config).unwrap();
        assert!(workspace.join("clownfish.yaml").exists());
    }

    #[test]
    fn config_lock_rejects_a_second_holder() {
        let parent = tempfile::tempdir().unwrap();
        let config = parent.path().join("clownfish.yaml");
        fs::write(&config, "ssh_hosts: []\n").unwrap();
        let _first = ConfigLock::acquire(&config).unwrap();
        assert!(ConfigLock::acquire(&config).is_err());
    }
}
