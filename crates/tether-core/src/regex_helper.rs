//! Match-once, read-groups-many-times helper for line parsers.
//!
//! Every parser owns its own `RegexHelper`; the cached match is never shared
//! between observers or threads.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::Serialize;

/// An owned copy of a successful regex match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegexMatch {
    /// The text matched by the whole pattern.
    pub matched: String,
    /// Positional groups, starting at group 1. `None` for groups that did not participate.
    pub groups: Vec<Option<String>>,
    /// Named groups that participated in the match.
    pub named_groups: BTreeMap<String, String>,
}

impl RegexMatch {
    /// Copies the interesting parts out of borrowed captures.
    pub fn from_captures(regex: &Regex, caps: &Captures<'_>) -> Self {
        let matched = caps
            .get(0)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let groups = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();
        let named_groups = regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();

        Self {
            matched,
            groups,
            named_groups,
        }
    }

    /// Group `n`; group 0 is the whole match.
    pub fn group(&self, n: usize) -> Option<&str> {
        if n == 0 {
            return Some(&self.matched);
        }
        self.groups.get(n - 1).and_then(|g| g.as_deref())
    }

    /// Named group.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named_groups.get(name).map(String::as_str)
    }
}

/// Caches the last successful match so parsers can test a line and then read
/// several groups without re-running the regex.
#[derive(Debug, Default, Clone)]
pub struct RegexHelper {
    last: Option<RegexMatch>,
}

impl RegexHelper {
    /// Creates an empty helper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Searches anywhere in `text`. The cache is replaced (or cleared) either way.
    pub fn search(&mut self, regex: &Regex, text: &str) -> bool {
        self.last = regex
            .captures(text)
            .map(|caps| RegexMatch::from_captures(regex, &caps));
        self.last.is_some()
    }

    /// Like `search`, but only accepts a match that starts at the beginning of `text`.
    pub fn match_start(&mut self, regex: &Regex, text: &str) -> bool {
        self.last = regex
            .captures(text)
            .filter(|caps| caps.get(0).map(|m| m.start() == 0).unwrap_or(false))
            .map(|caps| RegexMatch::from_captures(regex, &caps));
        self.last.is_some()
    }

    /// The cached match, if the last search succeeded.
    pub fn get_match(&self) -> Option<&RegexMatch> {
        self.last.as_ref()
    }

    /// Takes the cached match out of the helper.
    pub fn take_match(&mut self) -> Option<RegexMatch> {
        self.last.take()
    }

    /// Group `n` of the cached match, or `""` when there is no such group.
    pub fn group(&self, n: usize) -> &str {
        self.try_group(n).unwrap_or("")
    }

    /// Group `n` of the cached match.
    pub fn try_group(&self, n: usize) -> Option<&str> {
        self.last.as_ref().and_then(|m| m.group(n))
    }

    /// Named group of the cached match, or `""`.
    pub fn named(&self, name: &str) -> &str {
        self.last
            .as_ref()
            .and_then(|m| m.name(name))
            .unwrap_or("")
    }

    /// Forgets the cached match.
    pub fn clear(&mut self) {
        self.last = None;
    }
}
