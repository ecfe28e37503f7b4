use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

/// Exclusive advisory lock over the whole job store
///
/// The lock is held on a sibling file so the store itself can be replaced by rename while locked.
/// It is released when the guard is dropped. Acquisition blocks until the lock is free.
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(path: &Path) -> io::Result<StoreLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        lock_exclusive(&file)?;
        debug!("Acquired store lock {}", path.display());

        Ok(StoreLock { file, path: path.to_path_buf() })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        unlock(&self.file);
        debug!("Released store lock {}", self.path.display());
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // closing the descriptor releases the lock too
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "job store locking needs flock"))
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job_store.json.lock");
        let held = StoreLock::acquire(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let path = path.clone();
            thread::spawn(move || {
                let _lock = StoreLock::acquire(&path).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[cfg(not(unix))]
    #[test]
    fn test_locking_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreLock::acquire(&dir.path().join("job_store.json.lock")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
