//! Tether CLI library.
//!
//! Replays a recorded device transcript through an in-memory connection,
//! runs a command or event against it and renders the result as JSON.

pub mod cli;
pub mod commands;
