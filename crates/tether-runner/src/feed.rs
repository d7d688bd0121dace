//! The feed loop: background body that keeps one observer attached to its
//! connection until the observer settles.
//!
//! Each tick checks, in order:
//! 1. observer done: exit
//! 2. runner shutting down or handle cancelled: cancel the observer
//! 3. nobody awaiting and the observer's own deadline passed: time it out
//!
//! Exiting always unsubscribes the observer and completes the handle, also
//! when the loop is dropped without finishing (aborted backend task).

use std::sync::{mpsc, Arc};
use std::time::Duration;

use tether_core::{
    subscribe, ConnectionObserver, ObserverError, Result as ObserverResult, TimeoutInfo, TimeoutKind,
};
use tracing::{debug, trace, warn};

use crate::error::{Result, RunnerError};
use crate::handle::FeedHandle;
use crate::runner::RunnerShared;

/// Sent by the feed loop once the observer is subscribed.
#[derive(Debug)]
pub struct StartSignal {
    tx: mpsc::SyncSender<ObserverResult<()>>,
}

/// Receiving side of [`StartSignal`], held by `submit`.
#[derive(Debug)]
pub struct StartWait {
    rx: mpsc::Receiver<ObserverResult<()>>,
}

/// Creates a connected start signal pair.
pub fn start_channel() -> (StartSignal, StartWait) {
    let (tx, rx) = mpsc::sync_channel(1);
    (StartSignal { tx }, StartWait { rx })
}

impl StartSignal {
    fn send(self, result: ObserverResult<()>) {
        // The submitter may have given up already.
        let _ = self.tx.send(result);
    }
}

impl StartWait {
    /// Blocks until the feed reports its start, for at most `grace`.
    ///
    /// On expiry the handle is cancelled and a late feed exits without
    /// touching the observer, so it can be submitted again.
    pub fn wait<T>(self, handle: &FeedHandle<T>, grace: Duration) -> Result<()> {
        match self.rx.recv_timeout(grace) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(RunnerError::Observer(err)),
            Err(_) if handle.abandon_start() => {
                warn!(observer = %handle.observer(), grace_ms = grace.as_millis() as u64, "feed did not start in time");
                Err(startup_failure(handle, grace))
            }
            // The feed claimed its start just now; its report is on the way.
            Err(_) => match self.rx.recv() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(RunnerError::Observer(err)),
                Err(_) => Err(startup_failure(handle, grace)),
            },
        }
    }
}

fn startup_failure<T>(handle: &FeedHandle<T>, grace: Duration) -> RunnerError {
    RunnerError::BackendStartup {
        observer: handle.observer().to_string(),
        grace,
    }
}

/// Outcome of one feed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStep {
    /// Keep polling.
    Continue,
    /// The observer settled; stop polling.
    Finished,
}

/// Everything a backend needs to launch one feed.
pub(crate) struct Submission<O: ConnectionObserver> {
    pub(crate) feed: FeedLoop<O>,
    pub(crate) handle: FeedHandle<O::Output>,
    pub(crate) signal: StartSignal,
    pub(crate) started: StartWait,
}

impl<O: ConnectionObserver> Submission<O> {
    pub(crate) fn prepare(shared: &Arc<RunnerShared>, observer: &Arc<O>) -> Result<Self> {
        if shared.is_in_shutdown() {
            return Err(RunnerError::ShutDown);
        }
        debug!(observer = %observer.core(), runner = shared.name(), "go background");
        let handle = FeedHandle::new(observer.core().to_string());
        let feed = FeedLoop::new(Arc::clone(observer), handle.clone(), Arc::clone(shared));
        let (signal, started) = start_channel();
        Ok(Self {
            feed,
            handle,
            signal,
            started,
        })
    }
}

/// The per-observer background loop.
pub struct FeedLoop<O: ConnectionObserver> {
    observer: Arc<O>,
    handle: FeedHandle<O::Output>,
    shared: Arc<RunnerShared>,
    launched: bool,
    subscribed: bool,
    start_error: Option<ObserverError>,
    cancelling: bool,
    settled: bool,
}

impl<O: ConnectionObserver> FeedLoop<O> {
    /// Binds a loop to an observer, its handle and the runner state.
    pub fn new(observer: Arc<O>, handle: FeedHandle<O::Output>, shared: Arc<RunnerShared>) -> Self {
        observer.core().set_timeout_listener(shared.clone());
        shared.feed_started();
        Self {
            observer,
            handle,
            shared,
            launched: false,
            subscribed: false,
            start_error: None,
            cancelling: false,
            settled: false,
        }
    }

    /// Subscribes the observer, runs its `on_start` and reports to `signal`.
    ///
    /// Returns false if the submitter already gave up on this feed or the
    /// observer could not be subscribed (it is already fed elsewhere); the
    /// observer is left untouched in both cases.
    pub fn start(&mut self, signal: StartSignal) -> bool {
        if !self.handle.claim_start() {
            debug!(observer = %self.observer.core(), "submission abandoned, not feeding");
            return false;
        }
        self.launched = true;
        debug!(observer = %self.observer.core(), runner = self.shared.name(), "start feeding");
        self.observer.core().mark_started();

        if let Err(err) = subscribe(&self.observer) {
            warn!(observer = %self.observer.core(), error = %err, "cannot feed observer");
            self.start_error = Some(err.clone());
            signal.send(Err(err));
            return false;
        }
        self.subscribed = true;

        if let Err(err) = self.observer.on_start() {
            warn!(observer = %self.observer.core(), error = %err, "observer failed to start");
            self.observer.core().set_error(err);
        }
        signal.send(Ok(()));
        true
    }

    /// One polling step.
    pub fn tick(&mut self) -> FeedStep {
        if self.observer.done() {
            trace!(observer = %self.observer.core(), "feed done");
            return FeedStep::Finished;
        }

        if self.shared.is_in_shutdown() || self.handle.is_cancelled() {
            if !self.cancelling {
                debug!(
                    observer = %self.observer.core(),
                    shutdown = self.shared.is_in_shutdown(),
                    "feed cancelling observer"
                );
                self.cancelling = true;
            }
            self.observer.cancel();
            return if self.observer.done() {
                FeedStep::Finished
            } else {
                FeedStep::Continue
            };
        }

        if !self.handle.is_awaited() {
            let timeout = self.observer.timeout();
            let passed = self.observer.core().elapsed();
            if passed >= timeout {
                debug!(
                    observer = %self.observer.core(),
                    timeout_ms = timeout.as_millis() as u64,
                    "feed deadline passed"
                );
                self.observer.on_timeout(TimeoutInfo {
                    kind: TimeoutKind::Feed,
                    timeout,
                    passed,
                });
                self.observer.cancel();
                return FeedStep::Finished;
            }
        }

        FeedStep::Continue
    }

    /// Runs the loop on the calling thread.
    pub fn run_blocking(mut self, signal: StartSignal) -> ObserverResult<O::Output> {
        if self.start(signal) {
            let tick = self.shared.config().feed_tick;
            while self.tick() == FeedStep::Continue {
                std::thread::sleep(tick);
            }
        }
        self.settle()
    }

    /// Runs the loop as an async task.
    pub async fn run(mut self, signal: StartSignal) -> ObserverResult<O::Output> {
        if self.start(signal) {
            let tick = self.shared.config().feed_tick;
            while self.tick() == FeedStep::Continue {
                tokio::time::sleep(tick).await;
            }
        }
        self.settle()
    }

    fn settle(&mut self) -> ObserverResult<O::Output> {
        self.settled = true;
        let result = match self.start_error.take() {
            Some(err) => Err(err),
            None if !self.launched => Err(ObserverError::Cancelled(self.observer.core().to_string())),
            None => {
                if self.observer.cancel() {
                    debug!(observer = %self.observer.core(), "feed abandoned, observer cancelled");
                }
                if self.subscribed {
                    self.observer.core().detach();
                }
                self.observer.result()
            }
        };
        self.shared.feed_finished();
        self.handle.complete(result.clone());
        debug!(observer = %self.observer.core(), ok = result.is_ok(), "feed returning result");
        result
    }
}

impl<O: ConnectionObserver> Drop for FeedLoop<O> {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.settle();
        }
    }
}
