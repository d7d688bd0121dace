//! Connection observers, commands and incremental line parsing.
//!
//! This crate provides:
//! - `ObserverCore` and the `ConnectionObserver` capability trait
//! - `Command<P>`, driving a `CommandParser` through its `ParseChain`
//! - `LineEvent`, waiting for lines matching patterns
//! - Parsing helpers: `RegexHelper`, `LineBuffer`, size conversion
//!
//! Observers are driven by a runner (see `tether-runner`); they can also be
//! fed by hand, which is how most tests here work.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tether_connection::FifoBuffer;
//! use tether_core::{subscribe, ConnectionObserver, LineEvent};
//!
//! let buffer = FifoBuffer::new("console");
//! let event = Arc::new(
//!     LineEvent::new(buffer.connection(), [r"link (\w+)"])
//!         .unwrap()
//!         .with_till_occurs_times(Some(1)),
//! );
//! subscribe(&event).unwrap();
//!
//! buffer.inject(["eth0: link up\n"]);
//! assert_eq!(event.result().unwrap().len(), 1);
//! ```

pub mod command;
pub mod converter;
pub mod error;
pub mod event;
pub mod line_buffer;
pub mod observer;
pub mod parse;
pub mod regex_helper;
pub mod text;

pub use command::{Command, CommandOptions, CommandParser, DEFAULT_COMMAND_TIMEOUT, DEFAULT_PROMPT};
pub use converter::to_bytes;
pub use error::{ObserverError, Result, TimeoutKind};
pub use event::{LineEvent, LineEventOutput, MatchMode, Occurrence, DEFAULT_EVENT_TIMEOUT};
pub use line_buffer::{Line, LineBuffer};
pub use observer::{
    subscribe, ConnectionObserver, ObserverCore, ObserverState, TimeoutDelta, TimeoutInfo, TimeoutListener,
};
pub use parse::{LineContext, LineHandler, ParseChain, Parsed};
pub use regex_helper::{RegexHelper, RegexMatch};
pub use text::remove_escape_codes;
