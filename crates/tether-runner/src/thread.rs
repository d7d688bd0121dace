//! One OS thread per observer.

use std::sync::Arc;
use std::thread;

use tether_core::ConnectionObserver;
use tracing::info;

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::feed::Submission;
use crate::handle::FeedHandle;
use crate::runner::{Runner, RunnerShared};

/// Runs each feed loop on a dedicated, named thread.
#[derive(Debug)]
pub struct ThreadRunner {
    shared: Arc<RunnerShared>,
}

impl Default for ThreadRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl ThreadRunner {
    /// Creates a runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            shared: Arc::new(RunnerShared::new("thread", config)),
        }
    }

    /// Number of feeds still running.
    pub fn active_feeds(&self) -> usize {
        self.shared.active_feeds()
    }
}

impl Runner for ThreadRunner {
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

        thread::Builder::new()
            .name(format!("tether-feed-{}", observer.core().id()))
            .spawn(move || feed.run_blocking(signal))?;
        started.wait(&handle, self.shared.config().start_grace)?;
        Ok(handle)
    }

    fn shutdown(&self) {
        if !self.shared.begin_shutdown() {
            return;
        }
        info!(active = self.shared.active_feeds(), "shutting down thread runner");
        self.shared.wait_idle(self.shared.config().shutdown_grace);
    }
}

impl Drop for ThreadRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_connection::{Connection, FifoBuffer};
    use tether_core::{LineEvent, ObserverState};

    #[test]
    fn test_thread_runner_feeds_observer() {
        let runner = ThreadRunner::default();
        let buffer = FifoBuffer::new("mem");
        let event = Arc::new(
            LineEvent::new(buffer.connection(), ["ready"])
                .unwrap()
                .with_till_occurs_times(Some(1)),
        );

        let handle = runner.submit(&event).unwrap();
        assert_eq!(buffer.connection().subscriber_count(), 1);

        buffer.inject(["ready\n"]);
        let result = runner.wait_for(&event, &handle, None).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(buffer.connection().subscriber_count(), 0);
        assert_eq!(runner.active_feeds(), 0);
    }

    #[test]
    fn test_shutdown_cancels_active_feeds() {
        let runner = ThreadRunner::new(RunnerConfig::default().with_shutdown_grace(Duration::from_secs(2)));
        let buffer = FifoBuffer::new("mem");
        let event = Arc::new(LineEvent::new(buffer.connection(), ["never"]).unwrap());

        let handle = runner.submit(&event).unwrap();
        runner.shutdown();

        assert_eq!(event.core().state(), ObserverState::Cancelled);
        assert!(runner.wait_for(&event, &handle, None).unwrap_err().is_cancelled());
        assert_eq!(buffer.connection().subscriber_count(), 0);
    }

    #[test]
    fn test_feed_on_caller_thread() {
        let runner = ThreadRunner::default();
        let buffer = FifoBuffer::new("mem");
        let event = Arc::new(
            LineEvent::new(buffer.connection(), ["done"])
                .unwrap()
                .with_till_occurs_times(Some(1)),
        );
        let handle = FeedHandle::new(event.core().to_string());
        let (signal, started) = crate::feed::start_channel();

        let result = thread::scope(|s| {
            let feeder = s.spawn(|| runner.feed(&event, &handle, signal));
            started.wait(&handle, Duration::from_secs(1)).unwrap();
            buffer.inject(["done\n"]);
            feeder.join().unwrap()
        });

        assert_eq!(result.unwrap().len(), 1);
        assert!(handle.is_finished());
    }
}
