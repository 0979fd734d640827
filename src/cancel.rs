//! Cooperative cancellation.
//!
//! Long-running phases sample a [`CancelToken`] at member/iteration
//! boundaries and surface a phase-tagged error when the token fires or its
//! deadline elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Error;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Cloneable cancellation handle shared between the caller and an operation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// A token that never fires on its own.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// A token that reports `DeadlineExceeded` once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A token that reports `DeadlineExceeded` at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    /// Request cancellation. All clones observe the flag.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self
                .inner
                .deadline
                .is_some_and(|d| Instant::now() >= d)
    }

    /// Sample the token, tagging any failure with the running phase
    /// (`"archiving"`, `"extraction"`, `"retry operation"`).
    pub fn check(&self, phase: &'static str) -> Result<(), Error> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled { phase });
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded { phase });
            }
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early if the token fires.
    pub(crate) fn sleep(&self, duration: Duration, phase: &'static str) -> Result<(), Error> {
        let wake = Instant::now() + duration;
        loop {
            self.check(phase)?;
            let now = Instant::now();
            if now >= wake {
                return Ok(());
            }
            let step = (wake - now).min(Duration::from_millis(50));
            std::thread::sleep(step);
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
