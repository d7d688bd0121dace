//! Commands for unix shells.

pub mod ls;
pub mod scp;

pub use ls::{FileEntry, FileKind, Ls, LsCommand, LsResult, Total};
pub use scp::{KnownHostsPolicy, Scp, ScpResult};
