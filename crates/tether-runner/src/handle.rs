//! Handle to one background feed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_core::Result as ObserverResult;

const LAUNCH_PENDING: u8 = 0;
const LAUNCH_STARTED: u8 = 1;
const LAUNCH_ABANDONED: u8 = 2;

struct HandleInner<T> {
    observer: String,
    outcome: Mutex<Option<ObserverResult<T>>>,
    finished: Condvar,
    cancelled: AtomicBool,
    awaited: AtomicUsize,
    launch: AtomicU8,
}

/// Maps 1:1 to a submitted observer; completed by its feed loop.
pub struct FeedHandle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T> Clone for FeedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for FeedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHandle")
            .field("observer", &self.inner.observer)
            .field("finished", &self.is_finished())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<T> FeedHandle<T> {
    /// Creates an unfinished handle for the named observer.
    pub fn new(observer: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                observer: observer.into(),
                outcome: Mutex::new(None),
                finished: Condvar::new(),
                cancelled: AtomicBool::new(false),
                awaited: AtomicUsize::new(0),
                launch: AtomicU8::new(LAUNCH_PENDING),
            }),
        }
    }

    fn outcome(&self) -> MutexGuard<'_, Option<ObserverResult<T>>> {
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Display name of the observer this handle belongs to.
    pub fn observer(&self) -> &str {
        &self.inner.observer
    }

    /// True once the feed loop exited.
    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Asks the feed loop to cancel its observer. Returns false if it already finished.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        true
    }

    /// True if `cancel` was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// True while some caller is inside `wait_for` on this handle.
    pub fn is_awaited(&self) -> bool {
        self.inner.awaited.load(Ordering::SeqCst) > 0
    }

    /// Claims the start for the feed loop. False if the submitter gave up first.
    pub(crate) fn claim_start(&self) -> bool {
        self.inner
            .launch
            .compare_exchange(LAUNCH_PENDING, LAUNCH_STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Gives up on a feed that has not started yet and cancels the handle.
    /// False if the feed already claimed its start.
    pub(crate) fn abandon_start(&self) -> bool {
        let abandoned = self
            .inner
            .launch
            .compare_exchange(LAUNCH_PENDING, LAUNCH_ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if abandoned {
            self.cancel();
        }
        abandoned
    }

    pub(crate) fn await_guard(&self) -> AwaitGuard<'_, T> {
        self.inner.awaited.fetch_add(1, Ordering::SeqCst);
        AwaitGuard { handle: self }
    }

    /// Stores the feed outcome and wakes waiters. Only the first call counts.
    pub(crate) fn complete(&self, result: ObserverResult<T>) -> bool {
        let mut outcome = self.outcome();
        if outcome.is_some() {
            return false;
        }
        *outcome = Some(result);
        drop(outcome);
        self.inner.finished.notify_all();
        true
    }
}

impl<T: Clone> FeedHandle<T> {
    /// The outcome if the feed already finished.
    pub fn try_result(&self) -> Option<ObserverResult<T>> {
        self.outcome().clone()
    }

    /// Blocks up to `timeout` for the feed to finish.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ObserverResult<T>> {
        let guard = self.outcome();
        let (guard, _) = self
            .inner
            .finished
            .wait_timeout_while(guard, timeout, |outcome| outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }
}

/// Marks a handle as awaited for as long as it lives.
pub(crate) struct AwaitGuard<'a, T> {
    handle: &'a FeedHandle<T>,
}

impl<T> Drop for AwaitGuard<'_, T> {
    fn drop(&mut self) {
        self.handle.inner.awaited.fetch_sub(1, Ordering::SeqCst);
    }
}
