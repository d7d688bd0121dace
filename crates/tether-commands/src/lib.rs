//! Command parsers for Tether.
//!
//! Each parser implements `tether_core::CommandParser` and is run as a
//! `Command<P>`:
//! - `Ls` - plain and long listings, with type filters through `LsCommand`
//! - `Scp` - interactive copy answering yes/no, password and host key prompts
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_commands::{Ls, LsCommand};
//! use tether_connection::FifoBuffer;
//! use tether_core::{Command, CommandOptions};
//! use tether_runner::{Runner, ThreadRunner};
//!
//! let runner = ThreadRunner::default();
//! let buffer = FifoBuffer::new("console");
//! let ls = Arc::new(
//!     Command::new(buffer.connection(), Ls::new().with_options("-l"), CommandOptions::default()).unwrap(),
//! );
//!
//! let handle = runner.submit(&ls).unwrap();
//! buffer.inject(["$ ls -l\n", "drwxr-xr-x 2 root root 4096 Sep 25  2014 bin\n", "$ "]);
//! let listing = runner.wait_for(&ls, &handle, Some(Duration::from_secs(1))).unwrap();
//!
//! assert!(listing.files.contains_key("bin"));
//! assert_eq!(ls.get_dirs().unwrap().len(), 1);
//! ```

pub mod unix;

pub use unix::{FileEntry, FileKind, KnownHostsPolicy, Ls, LsCommand, LsResult, Scp, ScpResult, Total};
