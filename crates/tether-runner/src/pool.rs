//! Worker-pool runner on top of tokio.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tether_core::ConnectionObserver;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::feed::Submission;
use crate::handle::FeedHandle;
use crate::runner::{expire, Runner, RunnerShared};

/// Feeds every observer as a task on a tokio multi-thread runtime.
///
/// The runtime is either owned (built by [`PoolRunner::new`], stopped on
/// shutdown) or borrowed through a [`Handle`] and left running, since other
/// runners may share it.
///
/// `submit` blocks for up to `start_grace` until the feed task runs, so it
/// must not be called from the only thread of a current-thread runtime that
/// also executes the feeds.
pub struct PoolRunner {
    shared: Arc<RunnerShared>,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    owns_runtime: bool,
}

impl std::fmt::Debug for PoolRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRunner")
            .field("shared", &self.shared)
            .field("owns_runtime", &self.owns_runtime)
            .finish()
    }
}

impl PoolRunner {
    /// Builds a runner with its own runtime of `config.workers` threads.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.workers.max(1))
            .thread_name("tether-feed")
            .enable_all()
            .build()?;
        info!(workers = config.workers, "created own worker pool");

        Ok(Self {
            handle: runtime.handle().clone(),
            shared: Arc::new(RunnerShared::new("pool", config)),
            runtime: Mutex::new(Some(runtime)),
            owns_runtime: true,
        })
    }

    /// Reuses an existing runtime; `shutdown` leaves it running.
    pub fn with_handle(handle: Handle, config: RunnerConfig) -> Self {
        debug!("reusing provided runtime");
        Self {
            shared: Arc::new(RunnerShared::new("pool", config)),
            handle,
            runtime: Mutex::new(None),
            owns_runtime: false,
        }
    }

    /// True if the runner built its runtime itself.
    pub fn owns_runtime(&self) -> bool {
        self.owns_runtime
    }

    /// Number of feeds still running.
    pub fn active_feeds(&self) -> usize {
        self.shared.active_feeds()
    }

    /// Async counterpart of [`Runner::wait_for`], for callers running on tokio.
    pub async fn wait_for_async<O: ConnectionObserver>(
        &self,
        observer: &Arc<O>,
        handle: &FeedHandle<O::Output>,
        timeout: Option<Duration>,
    ) -> Result<O::Output> {
        let _awaiting = handle.await_guard();
        let start = Instant::now();
        let mut deadline = timeout.unwrap_or_else(|| observer.timeout());
        debug!(observer = %observer.core(), timeout_ms = deadline.as_millis() as u64, "go foreground (async)");

        loop {
            if let Some(result) = handle.try_result() {
                return result.map_err(RunnerError::from);
            }
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining.min(self.shared.config().feed_tick)).await;
            if timeout.is_none() {
                deadline = observer.timeout();
            }
        }

        expire(observer.as_ref(), handle, deadline, start.elapsed())
    }
}

impl Runner for PoolRunner {
    fn shared(&self) -> &Arc<RunnerShared> {
        &self.shared
    }

    fn submit<O: ConnectionObserver>(&self, observer: &Arc<O>) -> Result<FeedHandle<O::Output>> {
        let Submission {
            feed,
            handle,
            signal,
            started,
        } = Submission::prepare(&self.shared, observer)?;

        self.handle.spawn(feed.run(signal));
        started.wait(&handle, self.shared.config().start_grace)?;
        Ok(handle)
    }

    fn shutdown(&self) {
        if !self.shared.begin_shutdown() {
            return;
        }
        info!(owns_runtime = self.owns_runtime, "shutting down pool runner");
        self.shared.wait_idle(self.shared.config().shutdown_grace);

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
            debug!("worker pool stopped");
        }
    }
}

impl Drop for PoolRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
