//! Text clean-up applied to terminal output.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn escape_codes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("Invalid escape code regex"))
}

/// Removes terminal escape sequences (colours, cursor movement) from a line.
pub fn remove_escape_codes(line: &str) -> Cow<'_, str> {
    escape_codes().replace_all(line, "")
}
