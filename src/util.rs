//! Internal utilities.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Exclusive `flock(2)` lock held for the lifetime of the value.
///
/// The lock belongs to the open file description, so two handles opened
/// separately (in one process or in two) exclude each other.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

/// Why [`FileLock::acquire`] gave up.
#[derive(Debug)]
pub enum LockFailure {
    /// Still held by someone else when the timeout elapsed.
    TimedOut,
    /// Opening or locking the file failed outright.
    Io(io::Error),
}

impl FileLock {
    /// Creates `path` if needed and polls for an exclusive lock on it every
    /// `poll` until `timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// [`LockFailure::TimedOut`] if the lock stayed busy, [`LockFailure::Io`]
    /// for any other failure.
    pub fn acquire(path: &Path, timeout: Duration, poll: Duration) -> Result<Self, LockFailure> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(LockFailure::Io)?;

        let started = Instant::now();
        loop {
            // SAFETY: `file` owns a valid descriptor for the whole call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc == 0 {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {}
                io::ErrorKind::Interrupted => continue,
                _ => return Err(LockFailure::Io(err)),
            }

            if started.elapsed() >= timeout {
                return Err(LockFailure::TimedOut);
            }
            tracing::debug!(path = %path.display(), "Lock busy, polling");
            std::thread::sleep(poll.min(timeout.saturating_sub(started.elapsed())));
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still open; closing it would release the
        // lock anyway, this just makes the release explicit.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
