//! Single-writer lock over a data directory.
//!
//! The lock is a `facegate.lock` file created with `create_new`, holding the
//! owner's PID. A lock whose owner is no longer running is broken on the next
//! acquire.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{FacegateError, Result};

pub const LOCK_FILE: &str = "facegate.lock";

/// Held for as long as a process may rewrite snapshots in the directory.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
}

impl DataDirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| FacegateError::persistence(dir, e))?;
        let path = dir.join(LOCK_FILE);

        match create_lock_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_holder(&path);
                match holder {
                    Some(pid) if !pid_alive(pid) => {
                        warn!("breaking stale lock {} left by pid {}", path.display(), pid);
                        std::fs::remove_file(&path)
                            .map_err(|e| FacegateError::persistence(&path, e))?;
                        create_lock_file(&path)
                            .map_err(|e| FacegateError::persistence(&path, e))?;
                    }
                    _ => return Err(FacegateError::Locked { path, pid: holder }),
                }
            }
            Err(e) => return Err(FacegateError::persistence(&path, e)),
        }

        debug!("acquired {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        // Leave the file alone if someone else broke and retook it.
        if read_holder(&self.path) == Some(std::process::id()) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn create_lock_file(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}
