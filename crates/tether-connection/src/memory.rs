//! In-memory transport.
//!
//! `FifoBuffer` stands in for a serial line or TCP socket: what observers send
//! is recorded, and "device output" is injected either synchronously or from
//! a background thread with a delay between chunks.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::trace;

use crate::observable::ObservableConnection;

/// In-memory transport bound to an [`ObservableConnection`].
#[derive(Debug)]
pub struct FifoBuffer {
    connection: Arc<ObservableConnection>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FifoBuffer {
    /// Creates a buffer whose connection records every sent string.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_connection(ObservableConnection::new(name))
    }

    /// Wraps a pre-configured connection (newline, decoder) and attaches the
    /// recording sender to it.
    pub fn with_connection(connection: ObservableConnection) -> Self {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let connection = connection.with_sender(move |bytes: &[u8]| {
            let text = String::from_utf8_lossy(bytes).into_owned();
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text);
            Ok(())
        });

        Self {
            connection: Arc::new(connection),
            sent,
        }
    }

    /// The connection observers subscribe to.
    pub fn connection(&self) -> Arc<ObservableConnection> {
        Arc::clone(&self.connection)
    }

    /// Delivers each chunk to the connection on the calling thread.
    pub fn inject<I, S>(&self, chunks: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for chunk in chunks {
            self.connection.data_received(chunk.as_ref().as_bytes());
        }
    }

    /// Simulates a remote endpoint answering: delivers chunks from a background
    /// thread, sleeping `delay` before each one.
    pub fn inject_response<I, S>(&self, chunks: I, delay: Duration) -> JoinHandle<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        let connection = Arc::clone(&self.connection);
        thread::spawn(move || {
            for chunk in chunks {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                trace!(bytes = chunk.len(), "injecting response chunk");
                connection.data_received(chunk.as_bytes());
            }
        })
    }

    /// Everything sent through the connection so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
