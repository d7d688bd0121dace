//! Background runners for Tether observers.
//!
//! A runner feeds connection observers in the background and lets callers
//! wait for their results:
//! - `Runner` - submit, wait, poll and shutdown, shared by every backend
//! - `ThreadRunner` - one OS thread per observer
//! - `PoolRunner` - tasks on an owned or borrowed tokio runtime
//! - `FeedLoop` - the per-observer loop both backends execute
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_connection::FifoBuffer;
//! use tether_core::LineEvent;
//! use tether_runner::{Runner, ThreadRunner};
//!
//! let runner = ThreadRunner::default();
//! let buffer = FifoBuffer::new("console");
//! let event = Arc::new(
//!     LineEvent::new(buffer.connection(), ["login:"])
//!         .unwrap()
//!         .with_till_occurs_times(Some(1)),
//! );
//!
//! let handle = runner.submit(&event).unwrap();
//! buffer.inject(["router login:\n"]);
//! let found = runner.wait_for(&event, &handle, Some(Duration::from_secs(1))).unwrap();
//! assert_eq!(found.len(), 1);
//! ```
//!
//! # Deadlines
//!
//! While a caller sits in `wait_for`, the caller owns the deadline and times
//! the observer out with `TimeoutKind::AwaitDone`. A feed nobody waits on
//! enforces the observer's own timeout itself (`TimeoutKind::Feed`).

pub mod config;
pub mod error;
pub mod feed;
pub mod handle;
pub mod pool;
pub mod runner;
pub mod thread;

pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use feed::{start_channel, FeedLoop, FeedStep, StartSignal, StartWait};
pub use handle::FeedHandle;
pub use pool::PoolRunner;
pub use runner::{Runner, RunnerShared, WaitIter};
pub use thread::ThreadRunner;
