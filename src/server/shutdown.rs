//! Signal-driven graceful shutdown
//!
//! A termination signal flips a process-wide flag exactly once and wakes the
//! accept loop. The flag never resets, so repeated signals are harmless.

use crate::{AesdError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable handle to the shutdown flag
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    /// Create a handle with shutdown not yet requested
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns true only for the call that flipped the flag.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        first
    }

    /// Whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn requested(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_requested() {
            return;
        }
        notified.await;
    }
}

/// Arm SIGINT and SIGTERM handlers that trigger `shutdown`.
///
/// Must be called from within a tokio runtime, after the listening socket
/// exists.
pub fn install_signal_handlers(shutdown: Shutdown) -> Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt()).map_err(AesdError::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(AesdError::Signal)?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = interrupt.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
                received = terminate.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }
            if shutdown.trigger() {
                debug!("Caught signal, exiting");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_requested());
        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn test_requested_resolves_after_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.requested().await });

        tokio::task::yield_now().await;
        shutdown.trigger();

        assert!(timeout(Duration::from_secs(1), handle).await.is_ok());
    }

    #[test]
    fn test_trigger_wakes_pending_waiter() {
        let shutdown = Shutdown::new();
        let mut waiter = tokio_test::task::spawn(shutdown.requested());

        tokio_test::assert_pending!(waiter.poll());
        shutdown.trigger();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_requested_resolves_immediately_when_already_set() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(timeout(Duration::from_millis(100), shutdown.requested())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_flag() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        other.trigger();
        assert!(shutdown.is_requested());
    }
}
