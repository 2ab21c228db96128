//! Run lock
//!
//! A deployment run holds an exclusive `flock` on a lock file in the
//! environment's base directory for its whole duration, so two runs never
//! race on the same working tree. The holder's pid is written into the file
//! for diagnostics only; the `flock` alone decides who holds the lock.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the base directory.
pub const LOCK_FILE: &str = ".rigger-lock";

/// Exclusive lock for one deployment run, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock `<base_dir>/.rigger-lock`.
    pub fn acquire_in(base_dir: &Path) -> Result<Self> {
        Self::acquire(base_dir.join(LOCK_FILE))
    }

    /// Try to lock `path` without blocking.
    ///
    /// Fails with [`Error::Locked`] when another process holds the lock.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let pid = read_pid(&mut file);
                if let Some(pid) = pid.filter(|pid| !process_alive(*pid)) {
                    log::warn!(
                        "{} names pid {pid}, which is no longer running",
                        path.display()
                    );
                }
                return Err(Error::Locked { path, pid });
            }
            Err(e) => return Err(e.into()),
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        log::debug!("acquired run lock at {}", path.display());
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded in the lock file at `path`, if any.
    pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
        let mut file = File::open(path).ok()?;
        read_pid(&mut file)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            log::warn!("failed to clear pid in {}: {e}", self.path.display());
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to release {}: {e}", self.path.display());
        }
        log::debug!("released run lock at {}", self.path.display());
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
