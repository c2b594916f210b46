//! Timed mutex acquisition on a background thread
//!
//! A small concurrency helper: a spawned thread waits, takes a shared mutex,
//! holds it for a while, releases it and reports whether all of that worked.

use crate::{AesdError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Parameters and outcome of one timed acquisition
#[derive(Debug, Clone)]
pub struct ThreadData {
    /// Delay before trying to take the mutex
    pub wait_to_obtain: Duration,
    /// How long the mutex is held
    pub wait_to_release: Duration,
    /// Give up on the mutex after this long; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
    /// Whether the mutex was obtained and released
    pub complete_success: bool,
}

impl ThreadData {
    /// Parameters for sleeping `obtain_ms`, then holding the mutex for
    /// `release_ms`
    pub fn new(obtain_ms: u64, release_ms: u64) -> Self {
        Self {
            wait_to_obtain: Duration::from_millis(obtain_ms),
            wait_to_release: Duration::from_millis(release_ms),
            acquire_timeout: None,
            complete_success: false,
        }
    }

    /// Fail with a lock error instead of blocking past `timeout`
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// Spawn a thread that sleeps, obtains `mutex`, holds it, then releases it.
///
/// Joining the handle yields the [`ThreadData`] with `complete_success` set.
pub fn start_thread_obtaining_mutex(
    mutex: Arc<Mutex<()>>,
    data: ThreadData,
) -> Result<JoinHandle<ThreadData>> {
    thread::Builder::new()
        .name("timed-mutex".to_string())
        .spawn(move || {
            let mut data = data;
            data.complete_success = match obtain_and_release(&mutex, &data) {
                Ok(()) => true,
                Err(e) => {
                    error!("{}", e);
                    false
                }
            };
            data
        })
        .map_err(|e| AesdError::Lock(format!("failed to spawn thread: {}", e)))
}

fn obtain_and_release(mutex: &Mutex<()>, data: &ThreadData) -> Result<()> {
    thread::sleep(data.wait_to_obtain);

    let guard = match data.acquire_timeout {
        Some(timeout) => mutex.try_lock_for(timeout).ok_or_else(|| {
            AesdError::Lock(format!("obtain lock: timed out after {:?}", timeout))
        })?,
        None => mutex.lock(),
    };
    debug!("Obtained mutex");

    thread::sleep(data.wait_to_release);
    drop(guard);
    debug!("Released mutex");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_thread_obtains_and_releases() {
        let mutex = Arc::new(Mutex::new(()));
        let handle = start_thread_obtaining_mutex(Arc::clone(&mutex), ThreadData::new(10, 10)).unwrap();

        let data = handle.join().unwrap();
        assert!(data.complete_success);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_thread_waits_for_held_mutex() {
        let mutex = Arc::new(Mutex::new(()));
        let guard = mutex.lock();

        let start = Instant::now();
        let handle = start_thread_obtaining_mutex(Arc::clone(&mutex), ThreadData::new(0, 0)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        drop(guard);

        let data = handle.join().unwrap();
        assert!(data.complete_success);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_thread_holds_mutex_for_release_period() {
        let mutex = Arc::new(Mutex::new(()));
        let handle = start_thread_obtaining_mutex(Arc::clone(&mutex), ThreadData::new(0, 300)).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(mutex.try_lock().is_none());

        assert!(handle.join().unwrap().complete_success);
    }

    #[test]
    fn test_acquire_timeout_reports_failure() {
        let mutex = Arc::new(Mutex::new(()));
        let guard = mutex.lock();

        let data = ThreadData::new(0, 0).with_acquire_timeout(Duration::from_millis(50));
        let handle = start_thread_obtaining_mutex(Arc::clone(&mutex), data).unwrap();

        let data = handle.join().unwrap();
        assert!(!data.complete_success);
        drop(guard);
    }
}
