//! Connection contract for Tether.
//!
//! A connection is a long-lived text channel (shell, modem, console) that
//! publishes decoded data to subscribers and accepts outgoing text:
//! - `Connection` - the contract observers and runners rely on
//! - `ObservableConnection` - subscriber bookkeeping plus encoder/decoder
//! - `FifoBuffer` - in-memory transport for tests and transcript replay
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use chrono::{DateTime, Utc};
//! use tether_connection::{Connection, FifoBuffer};
//!
//! let buffer = FifoBuffer::new("mem0");
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//!
//! let id = buffer.connection().subscribe(Arc::new(move |data: &str, _at: DateTime<Utc>| {
//!     sink.lock().unwrap().push(data.to_string());
//! }));
//!
//! buffer.inject(["hello\n"]);
//! assert_eq!(seen.lock().unwrap().as_slice(), ["hello\n"]);
//!
//! buffer.connection().unsubscribe(id);
//! ```

pub mod connection;
pub mod error;
pub mod memory;
pub mod observable;

pub use connection::{Connection, DataCallback, SubscriptionId};
pub use error::{ConnectionError, Result};
pub use memory::FifoBuffer;
pub use observable::ObservableConnection;
