//! The connection contract.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::Result;

/// Callback invoked with decoded data and its arrival time.
pub type DataCallback = Arc<dyn Fn(&str, DateTime<Utc>) + Send + Sync>;

/// Identifies one subscription on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wraps a raw subscription number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw subscription number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A bidirectional text channel with publish/subscribe semantics.
///
/// Implementations must allow `subscribe`/`unsubscribe` from any thread,
/// including from inside a callback that is currently being delivered to.
pub trait Connection: Send + Sync {
    /// Human-readable connection name used in logs.
    fn name(&self) -> &str;

    /// Registers a callback for incoming data.
    fn subscribe(&self, callback: DataCallback) -> SubscriptionId;

    /// Removes a subscription.
    ///
    /// Returns `false` when the id is unknown or was already removed; this is
    /// never an error.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Sends raw text.
    fn send(&self, data: &str) -> Result<()>;

    /// The newline sequence appended by `sendline`.
    fn newline(&self) -> String;

    /// Sends text followed by the connection's newline.
    fn sendline(&self, data: &str) -> Result<()> {
        let line = format!("{}{}", data, self.newline());
        self.send(&line)
    }

    /// Number of active subscriptions.
    fn subscriber_count(&self) -> usize;
}
