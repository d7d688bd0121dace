//! The parse chain: ordered line handlers where the first match wins.

use std::fmt;

use tether_connection::Connection;
use tracing::trace;

use crate::regex_helper::RegexHelper;
use crate::Result;

/// Outcome of running one handler against a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    /// The handler recognised the line; no further handler sees it.
    Consumed,
    /// The line is not for this handler.
    NotConsumed,
}

impl Parsed {
    /// True for `Consumed`.
    pub fn is_consumed(&self) -> bool {
        matches!(self, Parsed::Consumed)
    }
}

/// What a handler may use besides the line itself.
pub struct LineContext<'a> {
    regex: &'a mut RegexHelper,
    connection: &'a dyn Connection,
    command_string: &'a str,
}

impl<'a> LineContext<'a> {
    /// Bundles the per-observer helpers for one line.
    pub fn new(regex: &'a mut RegexHelper, connection: &'a dyn Connection, command_string: &'a str) -> Self {
        Self {
            regex,
            connection,
            command_string,
        }
    }

    /// The observer's own regex helper.
    pub fn regex(&mut self) -> &mut RegexHelper {
        self.regex
    }

    /// Searches `line` with the observer's helper, caching the match.
    pub fn search(&mut self, regex: &regex::Regex, line: &str) -> bool {
        self.regex.search(regex, line)
    }

    /// Group `n` of the last successful search (`""` if absent).
    pub fn group(&self, n: usize) -> &str {
        self.regex.group(n)
    }

    /// Named group of the last successful search (`""` if absent).
    pub fn named(&self, name: &str) -> &str {
        self.regex.named(name)
    }

    /// The connection the observer is attached to.
    pub fn connection(&self) -> &dyn Connection {
        self.connection
    }

    /// Sends a line back to the device (answers to interactive prompts).
    pub fn sendline(&self, data: &str) -> Result<()> {
        self.connection.sendline(data)?;
        Ok(())
    }

    /// The command string that was sent, empty for non-command observers.
    pub fn command_string(&self) -> &str {
        self.command_string
    }
}

/// A single parse handler.
pub type LineHandler<S> = fn(&mut S, &str, &mut LineContext<'_>) -> Result<Parsed>;

/// Ordered list of handlers; `dispatch` stops at the first `Consumed`.
pub struct ParseChain<S> {
    handlers: Vec<(&'static str, LineHandler<S>)>,
}

impl<S> fmt::Debug for ParseChain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<S> Default for ParseChain<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ParseChain<S> {
    /// An empty chain.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Appends a handler; declaration order is dispatch order.
    pub fn handler(mut self, name: &'static str, handler: LineHandler<S>) -> Self {
        self.handlers.push((name, handler));
        self
    }

    /// Handler names in dispatch order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|(name, _)| *name)
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs handlers in order until one consumes the line.
    ///
    /// An error from a handler stops the chain and is returned as is.
    pub fn dispatch(&self, state: &mut S, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        for (name, handler) in &self.handlers {
            if handler(state, line, ctx)?.is_consumed() {
                trace!(handler = name, line = %line, "line consumed");
                return Ok(Parsed::Consumed);
            }
        }
        Ok(Parsed::NotConsumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::sync::OnceLock;
    use tether_connection::FifoBuffer;

    use crate::ObserverError;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        numbers: Vec<String>,
    }

    fn digits() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(\d+)").unwrap())
    }

    fn parse_number(state: &mut Recorder, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
        state.calls.push("number");
        if ctx.search(digits(), line) {
            state.numbers.push(ctx.group(1).to_string());
            return Ok(Parsed::Consumed);
        }
        Ok(Parsed::NotConsumed)
    }

    fn parse_anything(state: &mut Recorder, _line: &str, _ctx: &mut LineContext<'_>) -> Result<Parsed> {
        state.calls.push("anything");
        Ok(Parsed::Consumed)
    }

    fn parse_failing(_state: &mut Recorder, line: &str, _ctx: &mut LineContext<'_>) -> Result<Parsed> {
        Err(ObserverError::InvalidSize(line.to_string()))
    }

    #[test]
    fn test_first_match_wins() {
        let buffer = FifoBuffer::new("mem");
        let connection = buffer.connection();
        let mut regex = RegexHelper::new();
        let mut ctx = LineContext::new(&mut regex, connection.as_ref(), "");
        let chain = ParseChain::new()
            .handler("number", parse_number)
            .handler("anything", parse_anything);
        let mut state = Recorder::default();

        assert_eq!(chain.dispatch(&mut state, "size 42", &mut ctx).unwrap(), Parsed::Consumed);
        assert_eq!(state.calls, vec!["number"]);
        assert_eq!(state.numbers, vec!["42"]);

        assert_eq!(chain.dispatch(&mut state, "no digits", &mut ctx).unwrap(), Parsed::Consumed);
        assert_eq!(state.calls, vec!["number", "number", "anything"]);
    }

    #[test]
    fn test_unclaimed_line_falls_through() {
        let buffer = FifoBuffer::new("mem");
        let connection = buffer.connection();
        let mut regex = RegexHelper::new();
        let mut ctx = LineContext::new(&mut regex, connection.as_ref(), "");
        let chain = ParseChain::new().handler("number", parse_number);
        let mut state = Recorder::default();

        assert_eq!(chain.dispatch(&mut state, "text", &mut ctx).unwrap(), Parsed::NotConsumed);
    }

    #[test]
    fn test_error_stops_chain() {
        let buffer = FifoBuffer::new("mem");
        let connection = buffer.connection();
        let mut regex = RegexHelper::new();
        let mut ctx = LineContext::new(&mut regex, connection.as_ref(), "");
        let chain = ParseChain::new()
            .handler("failing", parse_failing)
            .handler("anything", parse_anything);
        let mut state = Recorder::default();

        assert!(chain.dispatch(&mut state, "bad", &mut ctx).is_err());
        assert!(state.calls.is_empty());
    }

    #[test]
    fn test_names_in_order() {
        let chain: ParseChain<Recorder> = ParseChain::new()
            .handler("number", parse_number)
            .handler("anything", parse_anything);
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["number", "anything"]);
        assert_eq!(chain.len(), 2);
    }
}
