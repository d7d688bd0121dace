//! The runner capability set and the waiting logic every backend shares.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use tether_core::{ConnectionObserver, Result as ObserverResult, TimeoutDelta, TimeoutInfo, TimeoutKind, TimeoutListener};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::feed::{FeedLoop, StartSignal};
use crate::handle::FeedHandle;

/// State a runner shares with its feed loops.
#[derive(Debug)]
pub struct RunnerShared {
    name: &'static str,
    config: RunnerConfig,
    in_shutdown: AtomicBool,
    active_feeds: AtomicUsize,
}

impl RunnerShared {
    /// Creates the state for a runner called `name`.
    pub fn new(name: &'static str, config: RunnerConfig) -> Self {
        Self {
            name,
            config,
            in_shutdown: AtomicBool::new(false),
            active_feeds: AtomicUsize::new(0),
        }
    }

    /// Backend name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// True once shutdown was requested.
    pub fn is_in_shutdown(&self) -> bool {
        self.in_shutdown.load(Ordering::SeqCst)
    }

    /// Number of feed loops that have not settled yet.
    pub fn active_feeds(&self) -> usize {
        self.active_feeds.load(Ordering::SeqCst)
    }

    /// Flags shutdown. Returns true only for the first call.
    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.in_shutdown.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn feed_started(&self) {
        self.active_feeds.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn feed_finished(&self) {
        self.active_feeds.fetch_sub(1, Ordering::SeqCst);
    }

    /// Waits up to `grace` for all feeds to settle. Returns true if they did.
    pub(crate) fn wait_idle(&self, grace: Duration) -> bool {
        let start = Instant::now();
        while self.active_feeds() > 0 {
            if start.elapsed() >= grace {
                warn!(runner = self.name, active = self.active_feeds(), "feeds still active after shutdown grace");
                return false;
            }
            std::thread::sleep(self.config.feed_tick);
        }
        true
    }
}

// Polling backends re-read the deadline every tick, so a change only needs logging.
impl TimeoutListener for RunnerShared {
    fn timeout_change(&self, observer: &str, delta: TimeoutDelta) {
        debug!(
            runner = self.name,
            observer = %observer,
            delta_ms = (delta.as_secs_f64() * 1000.0) as i64,
            "observer timeout changed"
        );
    }
}

/// Executes connection observers in the background.
///
/// Backends provide `submit` and `shutdown`; waiting, polling and the feed
/// body are shared.
pub trait Runner: Send + Sync {
    /// State shared with the feed loops.
    fn shared(&self) -> &Arc<RunnerShared>;

    /// Starts feeding `observer` in the background.
    ///
    /// Fails with `BackendStartup` if the feed does not confirm it started
    /// within `start_grace`, and with `ShutDown` after `shutdown`.
    fn submit<O: ConnectionObserver>(&self, observer: &Arc<O>) -> Result<FeedHandle<O::Output>>;

    /// Cancels active feeds and stops an owned backend. Idempotent.
    fn shutdown(&self);

    /// The runner configuration.
    fn config(&self) -> &RunnerConfig {
        self.shared().config()
    }

    /// True once `shutdown` was called.
    fn is_in_shutdown(&self) -> bool {
        self.shared().is_in_shutdown()
    }

    /// Blocks until the observer settles or the deadline passes.
    ///
    /// With `timeout` the deadline is fixed. Without it the observer's own
    /// timeout is re-read every `wait_tick`, so changing it mid-wait moves the
    /// deadline. On expiry the observer is unsubscribed, timed out and
    /// cancelled; if it completed in the same instant its own result wins.
    fn wait_for<O: ConnectionObserver>(
        &self,
        observer: &Arc<O>,
        handle: &FeedHandle<O::Output>,
        timeout: Option<Duration>,
    ) -> Result<O::Output> {
        let _awaiting = handle.await_guard();
        let start = Instant::now();
        let mut deadline = timeout.unwrap_or_else(|| observer.timeout());
        debug!(
            observer = %observer.core(),
            timeout_ms = deadline.as_millis() as u64,
            explicit = timeout.is_some(),
            "go foreground"
        );

        loop {
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            let step = match timeout {
                Some(_) => remaining,
                None => remaining.min(self.config().wait_tick),
            };
            if let Some(result) = handle.wait_timeout(step) {
                debug!(observer = %observer.core(), ok = result.is_ok(), "observer returned");
                return result.map_err(RunnerError::from);
            }
            if timeout.is_none() {
                deadline = observer.timeout();
            }
        }

        expire(observer.as_ref(), handle, deadline, start.elapsed())
    }

    /// Non-blocking wait: yields `Poll::Pending` until the feed finished,
    /// then its result once.
    fn wait_for_iterator<T: Clone>(&self, handle: &FeedHandle<T>) -> WaitIter<T> {
        WaitIter::new(handle.clone())
    }

    /// Runs the feed loop for `observer` on the calling thread until it settles.
    fn feed<O: ConnectionObserver>(
        &self,
        observer: &Arc<O>,
        handle: &FeedHandle<O::Output>,
        started: StartSignal,
    ) -> ObserverResult<O::Output> {
        FeedLoop::new(Arc::clone(observer), handle.clone(), Arc::clone(self.shared())).run_blocking(started)
    }

    /// Notification that an observer's timeout changed.
    fn timeout_change(&self, observer: &str, delta: TimeoutDelta) {
        self.shared().timeout_change(observer, delta);
    }

    /// `submit` followed by `wait_for`.
    fn run<O: ConnectionObserver>(&self, observer: &Arc<O>, timeout: Option<Duration>) -> Result<O::Output> {
        let handle = self.submit(observer)?;
        self.wait_for(observer, &handle, timeout)
    }
}

/// Gives up on an observer whose deadline passed.
pub(crate) fn expire<O: ConnectionObserver>(
    observer: &O,
    handle: &FeedHandle<O::Output>,
    deadline: Duration,
    passed: Duration,
) -> Result<O::Output> {
    observer.core().detach();
    let timed_out = observer.on_timeout(TimeoutInfo {
        kind: TimeoutKind::AwaitDone,
        timeout: deadline,
        passed,
    });
    observer.cancel();
    handle.cancel();
    if timed_out {
        info!(
            observer = %observer.core(),
            timeout_ms = deadline.as_millis() as u64,
            passed_ms = passed.as_millis() as u64,
            "timed out"
        );
    }
    Ok(observer.result()?)
}

/// Iterator returned by [`Runner::wait_for_iterator`].
#[derive(Debug)]
pub struct WaitIter<T> {
    handle: FeedHandle<T>,
    finished: bool,
}

impl<T> WaitIter<T> {
    /// Polls `handle`.
    pub fn new(handle: FeedHandle<T>) -> Self {
        Self {
            handle,
            finished: false,
        }
    }
}

impl<T: Clone> Iterator for WaitIter<T> {
    type Item = Poll<Result<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.handle.try_result() {
            Some(result) => {
                self.finished = true;
                Some(Poll::Ready(result.map_err(RunnerError::from)))
            }
            None => Some(Poll::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_connection::{Connection, FifoBuffer};
    use tether_core::{LineEvent, ObserverError, ObserverState};

    fn event(buffer: &FifoBuffer) -> LineEvent {
        LineEvent::new(buffer.connection(), ["END"])
            .unwrap()
            .with_till_occurs_times(Some(1))
    }

    #[test]
    fn test_expire_times_out_pending_observer() {
        let buffer = FifoBuffer::new("mem");
        let observer = event(&buffer);
        let handle = FeedHandle::new("event");

        let err = expire(&observer, &handle, Duration::from_millis(50), Duration::from_millis(51)).unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(
            err,
            RunnerError::Observer(ObserverError::ObservationTimeout { kind: TimeoutKind::AwaitDone, .. })
        ));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_expire_keeps_completion_from_same_tick() {
        let buffer = FifoBuffer::new("mem");
        let observer = Arc::new(event(&buffer));
        tether_core::subscribe(&observer).unwrap();
        buffer.inject(["END\n"]);
        let handle = FeedHandle::new("event");

        let result = expire(observer.as_ref(), &handle, Duration::from_millis(50), Duration::from_millis(50));

        assert_eq!(result.unwrap().len(), 1);
        assert_eq!(observer.core().state(), ObserverState::Succeeded);
        assert_eq!(buffer.connection().subscriber_count(), 0);
    }

    #[test]
    fn test_wait_iter_yields_pending_then_result_once() {
        let handle: FeedHandle<u8> = FeedHandle::new("event");
        let mut iter = WaitIter::new(handle.clone());

        assert!(matches!(iter.next(), Some(Poll::Pending)));
        handle.complete(Ok(7));
        assert!(matches!(iter.next(), Some(Poll::Ready(Ok(7)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_shutdown_flag_set_once() {
        let shared = RunnerShared::new("test", RunnerConfig::default());
        assert!(shared.begin_shutdown());
        assert!(!shared.begin_shutdown());
        assert!(shared.is_in_shutdown());
        assert!(shared.wait_idle(Duration::from_millis(1)));
    }
}
