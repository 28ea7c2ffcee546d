// tooldeps-io/src/lock.rs
//! Cross-process exclusive lock around installs. Several job runners on one
//! host may decide to install the same missing tool at the same moment; the
//! lock makes them queue up instead.
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use fd_lock::RwLock;
use tooldeps_common::error::{DepsError, Result};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs `f` while holding an exclusive lock on `path`. The lock is released
/// when this returns, whatever `f` did. Waiting longer than `timeout` yields
/// `DepsError::Lock`.
pub fn with_file_lock<T, F>(path: &Path, timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    let mut lock = RwLock::new(file);

    let deadline = Instant::now() + timeout;
    let mut announced = false;
    let _guard = loop {
        match lock.try_write() {
            Ok(guard) => break guard,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(DepsError::Lock(path.display().to_string()));
                }
                if !announced {
                    debug!("Waiting for install lock {}", path.display());
                    announced = true;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    };
    debug!("Acquired install lock {}", path.display());
    Ok(f())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn runs_closure_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conda");
        let value = with_file_lock(&path, Duration::from_secs(1), || 42).unwrap();
        assert_eq!(value, 42);
        assert!(path.exists());
    }

    #[test]
    fn contention_past_timeout_is_a_lock_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("involucro");
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            with_file_lock(&holder_path, Duration::from_secs(5), || {
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();
        });

        held_rx.recv().unwrap();
        let err = with_file_lock(&path, Duration::from_millis(300), || ()).unwrap_err();
        assert!(matches!(err, DepsError::Lock(_)));
        assert!(err.is_retryable());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(with_file_lock(&path, Duration::from_secs(1), || ()).is_ok());
    }
}
