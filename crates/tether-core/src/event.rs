//! `LineEvent`: waits for lines matching one or more patterns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tether_connection::Connection;
use tracing::{debug, trace};

use crate::error::{ObserverError, Result};
use crate::line_buffer::LineBuffer;
use crate::observer::{lock, ConnectionObserver, ObserverCore, TimeoutInfo};
use crate::regex_helper::RegexHelper;
use crate::text::remove_escape_codes;

/// Default time budget for an event.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(20);

/// How multiple patterns combine into one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every line matching any pattern is an occurrence.
    #[default]
    Any,
    /// An occurrence is complete once every pattern matched, in any order.
    All,
    /// An occurrence is complete once every pattern matched, in declaration order.
    Sequence,
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(MatchMode::Any),
            "all" => Ok(MatchMode::All),
            "sequence" => Ok(MatchMode::Sequence),
            other => Err(format!("unknown match mode '{}' (expected any, all or sequence)", other)),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchMode::Any => "any",
            MatchMode::All => "all",
            MatchMode::Sequence => "sequence",
        };
        write!(f, "{}", s)
    }
}

/// One line that matched a pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    /// The whole line.
    pub line: String,
    /// Positional groups of the pattern.
    pub groups: Vec<Option<String>>,
    /// Named groups of the pattern.
    pub named_groups: BTreeMap<String, String>,
    /// Text matched by the whole pattern.
    pub matched: String,
    /// When the data carrying the line arrived.
    pub time: DateTime<Utc>,
}

/// Result of a [`LineEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LineEventOutput {
    /// `MatchMode::Any`: one entry per matching line.
    Occurrences(Vec<Occurrence>),
    /// `MatchMode::All` / `MatchMode::Sequence`: one group per completed match set.
    Groups(Vec<Vec<Occurrence>>),
}

impl LineEventOutput {
    /// Number of completed occurrences (lines or groups).
    pub fn len(&self) -> usize {
        match self {
            LineEventOutput::Occurrences(items) => items.len(),
            LineEventOutput::Groups(groups) => groups.len(),
        }
    }

    /// True when nothing was detected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct EventState {
    buffer: LineBuffer,
    regex: RegexHelper,
    occurrences: Vec<Occurrence>,
    groups: Vec<Vec<Occurrence>>,
    // Group under construction, in arrival order.
    pending: Vec<Occurrence>,
    matched: Vec<bool>,
}

/// Awaits lines matching `patterns`.
///
/// With `till_occurs_times` unset the event keeps collecting until it is
/// cancelled or times out; a timeout then completes it with whatever was
/// collected, or fails it if nothing was.
pub struct LineEvent {
    core: ObserverCore<LineEventOutput>,
    patterns: Vec<Regex>,
    mode: MatchMode,
    till_occurs_times: Option<usize>,
    state: Mutex<EventState>,
}

impl fmt::Debug for LineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineEvent")
            .field("core", &self.core)
            .field("patterns", &self.patterns.iter().map(Regex::as_str).collect::<Vec<_>>())
            .field("mode", &self.mode)
            .field("till_occurs_times", &self.till_occurs_times)
            .finish()
    }
}

impl LineEvent {
    /// Compiles `patterns` and binds the event to `connection`.
    pub fn new<I, S>(connection: Arc<dyn Connection>, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(ObserverError::NoPatterns);
        }

        let matched = vec![false; patterns.len()];
        Ok(Self {
            core: ObserverCore::new("LineEvent", connection, DEFAULT_EVENT_TIMEOUT),
            patterns,
            mode: MatchMode::Any,
            till_occurs_times: None,
            state: Mutex::new(EventState {
                matched,
                ..Default::default()
            }),
        })
    }

    /// Sets the match mode.
    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Completes after `times` occurrences; `None` collects until timeout or cancel.
    pub fn with_till_occurs_times(mut self, times: Option<usize>) -> Self {
        self.till_occurs_times = times.filter(|t| *t > 0);
        self
    }

    /// Sets the line terminators.
    pub fn with_newline_chars(self, chars: impl IntoIterator<Item = char>) -> Self {
        lock(&self.state).buffer = LineBuffer::new(chars);
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.core.set_timeout(timeout);
        self
    }

    /// The match mode.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// What was collected so far.
    pub fn current_ret(&self) -> LineEventOutput {
        self.output(&lock(&self.state))
    }

    fn output(&self, state: &EventState) -> LineEventOutput {
        match self.mode {
            MatchMode::Any => LineEventOutput::Occurrences(state.occurrences.clone()),
            MatchMode::All | MatchMode::Sequence => LineEventOutput::Groups(state.groups.clone()),
        }
    }

    fn occurrence(state: &mut EventState, pattern: &Regex, line: &str, time: DateTime<Utc>) -> Option<Occurrence> {
        if !state.regex.search(pattern, line) {
            return None;
        }
        let found = state.regex.take_match()?;
        Some(Occurrence {
            line: line.to_string(),
            groups: found.groups,
            named_groups: found.named_groups,
            matched: found.matched,
            time,
        })
    }

    /// Returns the number of completed occurrences after processing `line`.
    fn process_line(&self, state: &mut EventState, line: &str, time: DateTime<Utc>) -> usize {
        match self.mode {
            MatchMode::Any => {
                let found = self
                    .patterns
                    .iter()
                    .find_map(|p| Self::occurrence(state, p, line, time));
                if let Some(found) = found {
                    trace!(event = %self.core, line = %line, "pattern matched");
                    state.occurrences.push(found);
                }
                state.occurrences.len()
            }
            MatchMode::All => {
                let mut hit = None;
                for index in 0..self.patterns.len() {
                    if state.matched[index] {
                        continue;
                    }
                    if let Some(found) = Self::occurrence(state, &self.patterns[index], line, time) {
                        hit = Some((index, found));
                        break;
                    }
                }
                if let Some((index, found)) = hit {
                    trace!(event = %self.core, pattern = index, "pattern matched");
                    state.matched[index] = true;
                    state.pending.push(found);
                    if state.matched.iter().all(|m| *m) {
                        let group = std::mem::take(&mut state.pending);
                        state.groups.push(group);
                        state.matched.iter_mut().for_each(|m| *m = false);
                    }
                }
                state.groups.len()
            }
            MatchMode::Sequence => {
                let index = state.pending.len();
                if let Some(found) = Self::occurrence(state, &self.patterns[index], line, time) {
                    trace!(event = %self.core, pattern = index, "pattern matched");
                    state.pending.push(found);
                    if state.pending.len() == self.patterns.len() {
                        let group = std::mem::take(&mut state.pending);
                        state.groups.push(group);
                    }
                }
                state.groups.len()
            }
        }
    }
}

impl ConnectionObserver for LineEvent {
    type Output = LineEventOutput;

    fn core(&self) -> &ObserverCore<LineEventOutput> {
        &self.core
    }

    fn data_received(&self, data: &str, received_at: DateTime<Utc>) {
        if self.done() {
            return;
        }
        let mut state = lock(&self.state);
        for line in state.buffer.feed(data) {
            if !line.is_full_line {
                continue;
            }
            let text = remove_escape_codes(&line.text);
            let completed = self.process_line(&mut state, &text, received_at);
            if self.till_occurs_times.is_some_and(|times| completed >= times) {
                debug!(event = %self.core, occurrences = completed, "event complete");
                self.core.set_result(self.output(&state));
                break;
            }
        }
    }

    fn on_timeout(&self, info: TimeoutInfo) -> bool {
        if self.till_occurs_times.is_none() {
            let output = self.current_ret();
            if !output.is_empty() {
                debug!(event = %self.core, occurrences = output.len(), "collection window closed");
                return self.core.set_result(output);
            }
        }
        self.core.on_timeout(self.is_command(), info)
    }
}
