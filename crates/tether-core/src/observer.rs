//! Connection observers.
//!
//! A connection observer represents one pending operation over a connection:
//! it is fed data as it arrives and eventually moves, exactly once, into a
//! terminal state. `ObserverCore` holds the shared bookkeeping (state,
//! timeout, subscription); concrete observers embed one and implement
//! [`ConnectionObserver::data_received`].
//!
//! # State machine
//!
//! ```text
//! Pending --set_result--> Succeeded
//!         --set_error---> Failed
//!         --cancel------> Cancelled
//! ```
//!
//! Terminal states are sticky: whichever transition happens first wins and
//! every later transition attempt is a no-op.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tether_connection::{Connection, DataCallback, SubscriptionId};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{ObserverError, Result, TimeoutKind};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Public view of an observer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Still waiting for data.
    Pending,
    /// Completed with a result.
    Succeeded,
    /// Completed with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl ObserverState {
    /// Returns true for every state except `Pending`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ObserverState::Pending)
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObserverState::Pending => "pending",
            ObserverState::Succeeded => "succeeded",
            ObserverState::Failed => "failed",
            ObserverState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug)]
enum Outcome<T> {
    Pending,
    Succeeded(T),
    Failed(ObserverError),
    Cancelled,
}

/// A change of an observer's timeout while it may be running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutDelta {
    /// Timeout before the change.
    pub previous: Duration,
    /// Timeout after the change.
    pub current: Duration,
}

impl TimeoutDelta {
    /// Signed change in seconds (negative when the timeout was shortened).
    pub fn as_secs_f64(&self) -> f64 {
        self.current.as_secs_f64() - self.previous.as_secs_f64()
    }

    /// True if the deadline moved later.
    pub fn is_extension(&self) -> bool {
        self.current > self.previous
    }
}

/// Notified when an observer's timeout changes; runners with event-driven
/// deadlines use it to re-arm.
pub trait TimeoutListener: Send + Sync {
    /// Called after `observer`'s timeout changed.
    fn timeout_change(&self, observer: &str, delta: TimeoutDelta);
}

/// Details handed to [`ConnectionObserver::on_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutInfo {
    /// Where the timeout was detected.
    pub kind: TimeoutKind,
    /// The deadline that expired.
    pub timeout: Duration,
    /// Time spent before giving up.
    pub passed: Duration,
}

/// Shared state of one connection observer.
pub struct ObserverCore<T> {
    id: String,
    name: String,
    connection: Arc<dyn Connection>,
    timeout: Mutex<Duration>,
    outcome: Mutex<Outcome<T>>,
    subscription: Mutex<Option<SubscriptionId>>,
    started_at: Mutex<Option<Instant>>,
    listener: Mutex<Option<Arc<dyn TimeoutListener>>>,
}

impl<T> fmt::Debug for ObserverCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection", &self.connection.name())
            .field("timeout", &self.timeout())
            .field("state", &self.state())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl<T> fmt::Display for ObserverCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(id:{})", self.name, self.id)
    }
}

impl<T> ObserverCore<T> {
    /// Creates a pending observer core bound to `connection`.
    pub fn new(name: impl Into<String>, connection: Arc<dyn Connection>, timeout: Duration) -> Self {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            id,
            name: name.into(),
            connection,
            timeout: Mutex::new(timeout),
            outcome: Mutex::new(Outcome::Pending),
            subscription: Mutex::new(None),
            started_at: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Short instance id used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable observer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection this observer listens to.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Current timeout budget.
    pub fn timeout(&self) -> Duration {
        *lock(&self.timeout)
    }

    /// Changes the timeout budget and notifies the registered listener.
    pub fn set_timeout(&self, timeout: Duration) {
        let previous = std::mem::replace(&mut *lock(&self.timeout), timeout);
        debug!(
            observer = %self,
            previous_ms = previous.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "timeout changed"
        );
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.timeout_change(
                &self.to_string(),
                TimeoutDelta {
                    previous,
                    current: timeout,
                },
            );
        }
    }

    /// Registers the party interested in timeout changes (usually a runner).
    pub fn set_timeout_listener(&self, listener: Arc<dyn TimeoutListener>) {
        *lock(&self.listener) = Some(listener);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ObserverState {
        match &*lock(&self.outcome) {
            Outcome::Pending => ObserverState::Pending,
            Outcome::Succeeded(_) => ObserverState::Succeeded,
            Outcome::Failed(_) => ObserverState::Failed,
            Outcome::Cancelled => ObserverState::Cancelled,
        }
    }

    /// True once the observer reached a terminal state.
    pub fn done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Completes the observer with a result. Returns false if it was already terminal.
    pub fn set_result(&self, value: T) -> bool {
        self.transition(Outcome::Succeeded(value))
    }

    /// Completes the observer with an error. Returns false if it was already terminal.
    pub fn set_error(&self, error: ObserverError) -> bool {
        self.transition(Outcome::Failed(error))
    }

    /// Cancels a pending observer. Idempotent; returns false if it was already terminal.
    pub fn cancel(&self) -> bool {
        self.transition(Outcome::Cancelled)
    }

    /// Stores a timeout failure if the observer is still pending.
    pub fn on_timeout(&self, is_command: bool, info: TimeoutInfo) -> bool {
        let error = ObserverError::timeout(is_command, self.to_string(), info.timeout, info.passed, info.kind);
        self.set_error(error)
    }

    fn transition(&self, next: Outcome<T>) -> bool {
        let mut outcome = lock(&self.outcome);
        if !matches!(*outcome, Outcome::Pending) {
            trace!(observer = %self, "ignoring transition of terminal observer");
            return false;
        }
        let label = match &next {
            Outcome::Pending => "pending",
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        };
        *outcome = next;
        drop(outcome);
        debug!(observer = %self, state = label, "observer finished");
        true
    }

    /// Records the moment feeding started; later calls keep the first value.
    pub fn mark_started(&self) -> Instant {
        *lock(&self.started_at).get_or_insert_with(Instant::now)
    }

    /// When feeding started, if it has.
    pub fn started_at(&self) -> Option<Instant> {
        *lock(&self.started_at)
    }

    /// Time since feeding started (zero if it has not).
    pub fn elapsed(&self) -> Duration {
        self.started_at()
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    /// Subscribes `callback` to the connection and remembers the subscription.
    pub fn attach(&self, callback: DataCallback) -> Result<SubscriptionId> {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return Err(ObserverError::AlreadySubscribed(self.to_string()));
        }
        let id = self.connection.subscribe(callback);
        *subscription = Some(id);
        Ok(id)
    }

    /// Unsubscribes from the connection. Safe to call any number of times.
    pub fn detach(&self) -> bool {
        let id = lock(&self.subscription).take();
        match id {
            Some(id) => self.connection.unsubscribe(id),
            None => false,
        }
    }

    /// True while the observer is subscribed to its connection.
    pub fn is_subscribed(&self) -> bool {
        lock(&self.subscription).is_some()
    }
}

impl<T: Clone> ObserverCore<T> {
    /// The result, the stored error, or `ResultNotAvailableYet` while pending.
    pub fn result(&self) -> Result<T> {
        match &*lock(&self.outcome) {
            Outcome::Pending => Err(ObserverError::ResultNotAvailableYet(self.to_string())),
            Outcome::Succeeded(value) => Ok(value.clone()),
            Outcome::Failed(error) => Err(error.clone()),
            Outcome::Cancelled => Err(ObserverError::Cancelled(self.to_string())),
        }
    }
}

/// The capability set every observer provides.
///
/// Only `core` and `data_received` are required; the rest delegate to the
/// embedded [`ObserverCore`] and may be overridden.
pub trait ConnectionObserver: Send + Sync + 'static {
    /// The structured result produced on success.
    type Output: Clone + Send + 'static;

    /// Shared bookkeeping.
    fn core(&self) -> &ObserverCore<Self::Output>;

    /// Receives decoded data from the connection.
    ///
    /// Must not block, must not panic across the connection boundary and must
    /// be a no-op once the observer is terminal.
    fn data_received(&self, data: &str, received_at: DateTime<Utc>);

    /// Commands report `CommandTimeout`, other observers `ObservationTimeout`.
    fn is_command(&self) -> bool {
        false
    }

    /// Called once by the feed loop right after subscribing.
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// True once terminal.
    fn done(&self) -> bool {
        self.core().done()
    }

    /// Cancels the observer if still pending.
    fn cancel(&self) -> bool {
        self.core().cancel()
    }

    /// Called by a runner that gave up waiting.
    fn on_timeout(&self, info: TimeoutInfo) -> bool {
        self.core().on_timeout(self.is_command(), info)
    }

    /// The final result or the stored error.
    fn result(&self) -> Result<Self::Output> {
        self.core().result()
    }

    /// Current timeout budget.
    fn timeout(&self) -> Duration {
        self.core().timeout()
    }

    /// Changes the timeout budget; an active runner sees the new value.
    fn set_timeout(&self, timeout: Duration) {
        self.core().set_timeout(timeout)
    }
}

/// Subscribes an observer to its connection.
///
/// The connection only keeps a weak reference, so a dropped observer is never
/// kept alive by a forgotten subscription.
pub fn subscribe<O: ConnectionObserver>(observer: &Arc<O>) -> Result<SubscriptionId> {
    let weak = Arc::downgrade(observer);
    let callback: DataCallback = Arc::new(move |data: &str, received_at: DateTime<Utc>| {
        if let Some(observer) = weak.upgrade() {
            observer.data_received(data, received_at);
        }
    });
    observer.core().attach(callback)
}
