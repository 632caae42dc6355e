//! Cooperative cancellation
//!
//! Scans poll a shared flag at read granularity. A poller thread can flip the
//! flag from an external cancellation source; the scan only ever observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{CarveError, CarveResult};

/// Shared cancellation flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(CarveError::Cancelled)` once cancellation was requested
    #[inline]
    pub fn check(&self) -> CarveResult<()> {
        if self.is_cancelled() {
            Err(CarveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Spawn a detached thread that calls `poll` every `interval` and cancels
    /// this token the first time it returns true. The thread exits after
    /// cancelling, or when the returned handle is dropped.
    pub fn spawn_poller<F>(&self, interval: Duration, mut poll: F) -> PollerHandle
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let token = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) && !token.is_cancelled() {
                if poll() {
                    token.cancel();
                    break;
                }
                thread::sleep(interval);
            }
            trace!("Cancellation poller exiting");
        });

        PollerHandle { stop }
    }
}

/// Stops the associated poller thread when dropped
pub struct PollerHandle {
    stop: Arc<AtomicBool>,
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
