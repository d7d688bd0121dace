//! ObservableConnection - subscriber bookkeeping for a text transport.
//!
//! The transport side pushes raw bytes in through [`ObservableConnection::data_received`];
//! they are decoded once and fanned out to every subscriber. Outgoing text is
//! encoded and handed to the configured sender.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::connection::{Connection, DataCallback, SubscriptionId};
use crate::{ConnectionError, Result};

type Encoder = Box<dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync>;
type Decoder = Box<dyn Fn(&[u8]) -> String + Send + Sync>;
type Sender = Box<dyn Fn(&[u8]) -> std::io::Result<()> + Send + Sync>;

/// A connection that publishes decoded data to its subscribers.
///
/// # Concurrency
///
/// The subscriber list lives behind an `RwLock`. Delivery takes a snapshot of
/// the list and releases the lock before invoking callbacks, so a callback
/// may `send`, `subscribe` or `unsubscribe` without deadlocking.
pub struct ObservableConnection {
    name: String,
    newline: RwLock<String>,
    subscribers: RwLock<Vec<(SubscriptionId, DataCallback)>>,
    next_id: AtomicU64,
    encoder: Encoder,
    decoder: Option<Decoder>,
    // Trailing bytes of a UTF-8 sequence cut by the transport.
    partial: Mutex<Vec<u8>>,
    sender: Option<Sender>,
}

impl fmt::Debug for ObservableConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableConnection")
            .field("name", &self.name)
            .field("newline", &self.newline())
            .field("subscribers", &self.subscriber_count())
            .field("can_send", &self.sender.is_some())
            .finish()
    }
}

impl ObservableConnection {
    /// Creates a connection with UTF-8 encoding and no sender attached.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            newline: RwLock::new("\n".to_string()),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            encoder: Box::new(|data: &str| Ok(data.as_bytes().to_vec())),
            decoder: None,
            partial: Mutex::new(Vec::new()),
            sender: None,
        }
    }

    /// Sets the function that carries encoded bytes to the transport.
    pub fn with_sender<F>(mut self, sender: F) -> Self
    where
        F: Fn(&[u8]) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.sender = Some(Box::new(sender));
        self
    }

    /// Sets the outgoing encoder.
    pub fn with_encoder<F>(mut self, encoder: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.encoder = Box::new(encoder);
        self
    }

    /// Sets the incoming decoder. It receives every chunk exactly as the
    /// transport delivered it.
    pub fn with_decoder<F>(mut self, decoder: F) -> Self
    where
        F: Fn(&[u8]) -> String + Send + Sync + 'static,
    {
        self.decoder = Some(Box::new(decoder));
        self
    }

    /// Sets the newline sequence used by `sendline`.
    pub fn with_newline(self, newline: impl Into<String>) -> Self {
        self.set_newline(newline);
        self
    }

    /// Changes the newline sequence on a live connection.
    pub fn set_newline(&self, newline: impl Into<String>) {
        if let Ok(mut current) = self.newline.write() {
            *current = newline.into();
        }
    }

    /// Entry point for the transport: decodes raw bytes and notifies subscribers.
    ///
    /// Without a custom decoder the bytes are UTF-8. A sequence cut at the end
    /// of a chunk is held back and completed by the next chunk; only invalid
    /// sequences become U+FFFD.
    pub fn data_received(&self, data: &[u8]) {
        let received_at = Utc::now();
        let decoded = match &self.decoder {
            Some(decoder) => decoder(data),
            None => self.decode_utf8(data),
        };
        if decoded.is_empty() && !data.is_empty() {
            return;
        }
        self.notify(&decoded, received_at);
    }

    fn decode_utf8(&self, data: &[u8]) -> String {
        let mut partial = self.partial.lock().unwrap_or_else(PoisonError::into_inner);
        partial.extend_from_slice(data);

        let mut decoded = String::with_capacity(partial.len());
        let mut start = 0;
        while start < partial.len() {
            match std::str::from_utf8(&partial[start..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    start = partial.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&partial[start..valid_end]));
                    match err.error_len() {
                        Some(len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        partial.drain(..start);
        if !partial.is_empty() {
            trace!(connection = %self.name, held = partial.len(), "holding incomplete utf-8 sequence");
        }
        decoded
    }

    /// Publishes already decoded text to all current subscribers.
    pub fn notify(&self, data: &str, received_at: DateTime<Utc>) {
        let snapshot: Vec<DataCallback> = match self.subscribers.read() {
            Ok(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(e) => {
                warn!(connection = %self.name, error = %e, "subscriber list poisoned");
                return;
            }
        };

        trace!(
            connection = %self.name,
            bytes = data.len(),
            subscribers = snapshot.len(),
            "delivering data"
        );

        for callback in snapshot {
            callback(data, received_at);
        }
    }
}

impl Connection for ObservableConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, callback: DataCallback) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut subs) = self.subscribers.write() {
            subs.push((id, callback));
        }
        debug!(connection = %self.name, subscription = %id, "subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = match self.subscribers.write() {
            Ok(mut subs) => {
                let before = subs.len();
                subs.retain(|(sub_id, _)| *sub_id != id);
                subs.len() != before
            }
            Err(_) => false,
        };
        if removed {
            debug!(connection = %self.name, subscription = %id, "unsubscribed");
        } else {
            trace!(connection = %self.name, subscription = %id, "unsubscribe of unknown subscription ignored");
        }
        removed
    }

    fn send(&self, data: &str) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ConnectionError::NotOpen(self.name.clone()))?;
        let encoded = (self.encoder)(data)?;
        trace!(connection = %self.name, bytes = encoded.len(), "sending data");
        sender(&encoded)?;
        Ok(())
    }

    fn newline(&self) -> String {
        self.newline
            .read()
            .map(|n| n.clone())
            .unwrap_or_else(|_| "\n".to_string())
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (DataCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DataCallback = Arc::new(move |data: &str, _at: DateTime<Utc>| {
            sink.lock().unwrap().push(data.to_string());
        });
        (callback, seen)
    }

    #[test]
    fn test_data_reaches_all_subscribers() {
        let conn = ObservableConnection::new("test");
        let (cb1, seen1) = recorder();
        let (cb2, seen2) = recorder();
        conn.subscribe(cb1);
        conn.subscribe(cb2);

        conn.data_received(b"abc");

        assert_eq!(seen1.lock().unwrap().as_slice(), ["abc"]);
        assert_eq!(seen2.lock().unwrap().as_slice(), ["abc"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let conn = ObservableConnection::new("test");
        let (cb, seen) = recorder();
        let id = conn.subscribe(cb);

        assert!(conn.unsubscribe(id));
        assert!(!conn.unsubscribe(id));
        assert_eq!(conn.subscriber_count(), 0);

        conn.data_received(b"late");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let conn = Arc::new(ObservableConnection::new("test"));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&conn);
        let id_slot = Arc::clone(&slot);
        let id = conn.subscribe(Arc::new(move |_data: &str, _at: DateTime<Utc>| {
            if let (Some(conn), Some(id)) = (weak.upgrade(), *id_slot.lock().unwrap()) {
                conn.unsubscribe(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        conn.data_received(b"x");
        assert_eq!(conn.subscriber_count(), 0);
    }

    #[test]
    fn test_character_split_across_reads() {
        let conn = ObservableConnection::new("serial");
        let (cb, seen) = recorder();
        conn.subscribe(cb);
        let bytes = "café\n".as_bytes();

        conn.data_received(&bytes[..4]);
        conn.data_received(&bytes[4..]);

        assert_eq!(seen.lock().unwrap().concat(), "café\n");
        assert_eq!(seen.lock().unwrap().as_slice(), ["caf", "é\n"]);
    }

    #[test]
    fn test_character_split_byte_by_byte() {
        let conn = ObservableConnection::new("serial");
        let (cb, seen) = recorder();
        conn.subscribe(cb);

        for byte in "→ ok".as_bytes() {
            conn.data_received(std::slice::from_ref(byte));
        }

        assert_eq!(seen.lock().unwrap().concat(), "→ ok");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let conn = ObservableConnection::new("serial");
        let (cb, seen) = recorder();
        conn.subscribe(cb);

        conn.data_received(b"a\xffb\xc3");
        conn.data_received(b"(c");

        assert_eq!(seen.lock().unwrap().concat(), "a\u{FFFD}b\u{FFFD}(c");
    }

    #[test]
    fn test_custom_decoder() {
        let conn = ObservableConnection::new("test")
            .with_decoder(|bytes: &[u8]| String::from_utf8_lossy(bytes).to_uppercase());
        let (cb, seen) = recorder();
        conn.subscribe(cb);

        conn.data_received(b"ls");
        assert_eq!(seen.lock().unwrap().as_slice(), ["LS"]);
    }

    #[test]
    fn test_send_without_sender_fails() {
        let conn = ObservableConnection::new("closed");
        let result = conn.send("ls");
        assert!(matches!(result, Err(ConnectionError::NotOpen(name)) if name == "closed"));
    }

    #[test]
    fn test_sendline_uses_newline() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let conn = ObservableConnection::new("test")
            .with_newline("\r\n")
            .with_sender(move |bytes: &[u8]| {
                sink.lock().unwrap().push(bytes.to_vec());
                Ok(())
            });

        conn.sendline("ls -l").unwrap();
        conn.set_newline("\n");
        conn.sendline("pwd").unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], b"ls -l\r\n");
        assert_eq!(sent[1], b"pwd\n");
    }
}
