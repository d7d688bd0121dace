//! Commands: observers that send a command line and parse its output.
//!
//! A [`Command`] owns a [`CommandParser`] and drives it line by line:
//!
//! 1. Data is split into lines by a [`LineBuffer`] and terminal escape codes
//!    are stripped.
//! 2. Until the command echo shows up in a full line, nothing is parsed, so
//!    the previous prompt never completes the command.
//! 3. Full lines go through the parser's [`ParseChain`]; partial lines go to
//!    [`CommandParser::on_partial_line`].
//! 4. A line nobody consumed that matches the prompt completes the command
//!    with [`CommandParser::result`].
//!
//! Parser errors are stored on the command and surface through `result()`;
//! they never escape `data_received`.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tether_connection::Connection;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::line_buffer::LineBuffer;
use crate::observer::{lock, ConnectionObserver, ObserverCore};
use crate::parse::{LineContext, ParseChain};
use crate::regex_helper::RegexHelper;
use crate::text::remove_escape_codes;

/// Prompt pattern matching typical unix shells (`$`, `%`, `#`, `>` or `~` at the end).
pub const DEFAULT_PROMPT: &str = r"^[^<]*[$%#>~]\s*$";

/// Default time budget for a command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-command parsing logic.
pub trait CommandParser: Sized + Send + 'static {
    /// Structured result handed out when the command completes.
    type Output: Clone + Send + 'static;

    /// The command line to send, built once at construction.
    fn command_string(&self) -> String;

    /// Handlers for full lines, in dispatch order.
    fn parse_chain(&self) -> ParseChain<Self>;

    /// Sees every partial line (prompts waiting for input never end with a newline).
    fn on_partial_line(&mut self, _line: &str, _ctx: &mut LineContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called when the prompt closes the output; an error fails the command.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Snapshot of the accumulated result.
    fn result(&self) -> Self::Output;
}

/// Construction options shared by all commands.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Regex marking the end of the command output.
    pub prompt: String,
    /// Characters that terminate a line.
    pub newline_chars: Vec<char>,
    /// Time budget.
    pub timeout: Duration,
    /// Ignore output until the command echo is seen.
    pub expect_echo: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            newline_chars: vec!['\n', '\r'],
            timeout: DEFAULT_COMMAND_TIMEOUT,
            expect_echo: true,
        }
    }
}

impl CommandOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prompt regex.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the line terminators.
    pub fn with_newline_chars(mut self, chars: impl IntoIterator<Item = char>) -> Self {
        self.newline_chars = chars.into_iter().collect();
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables waiting for the command echo.
    pub fn with_expect_echo(mut self, expect_echo: bool) -> Self {
        self.expect_echo = expect_echo;
        self
    }
}

struct ParseState<P: CommandParser> {
    parser: P,
    chain: ParseChain<P>,
    buffer: LineBuffer,
    regex: RegexHelper,
    echo: Regex,
    output_started: bool,
}

/// A command running over a connection.
pub struct Command<P: CommandParser> {
    core: ObserverCore<P::Output>,
    command_string: String,
    prompt: Regex,
    state: Mutex<ParseState<P>>,
}

impl<P: CommandParser> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("core", &self.core)
            .field("command_string", &self.command_string)
            .field("prompt", &self.prompt.as_str())
            .finish()
    }
}

impl<P: CommandParser> fmt::Display for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.core, f)
    }
}

impl<P: CommandParser> Command<P> {
    /// Builds a command bound to `connection`. Fails if the prompt does not compile.
    pub fn new(connection: Arc<dyn Connection>, parser: P, options: CommandOptions) -> Result<Self> {
        let command_string = parser.command_string();
        let prompt = Regex::new(&options.prompt)?;
        let echo = Regex::new(&regex::escape(&command_string))?;
        let chain = parser.parse_chain();
        let name = format!("Command '{}'", command_string);

        Ok(Self {
            core: ObserverCore::new(name, connection, options.timeout),
            command_string,
            prompt,
            state: Mutex::new(ParseState {
                parser,
                chain,
                buffer: LineBuffer::new(options.newline_chars),
                regex: RegexHelper::new(),
                echo,
                output_started: !options.expect_echo,
            }),
        })
    }

    /// The command line sent to the device.
    pub fn command_string(&self) -> &str {
        &self.command_string
    }

    /// The result accumulated so far, available even while pending.
    pub fn current_ret(&self) -> P::Output {
        lock(&self.state).parser.result()
    }

    /// Runs `f` with shared access to the parser.
    pub fn with_parser<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&lock(&self.state).parser)
    }

    fn process_line(&self, state: &mut ParseState<P>, line: &str, is_full_line: bool) -> Result<()> {
        if !state.output_started {
            if is_full_line && state.echo.is_match(line) {
                trace!(command = %self.core, "command echo seen");
                state.output_started = true;
            }
            return Ok(());
        }

        let ParseState {
            parser,
            chain,
            regex,
            ..
        } = state;
        let connection = self.core.connection();
        let mut ctx = LineContext::new(regex, connection.as_ref(), &self.command_string);

        if is_full_line {
            if chain.dispatch(parser, line, &mut ctx)?.is_consumed() {
                return Ok(());
            }
        } else {
            parser.on_partial_line(line, &mut ctx)?;
        }

        // Partial lines count too: a fragment ending in a prompt character completes.
        if !self.core.done() && self.prompt.is_match(line) {
            parser.validate()?;
            debug!(command = %self.core, "prompt found, command complete");
            self.core.set_result(parser.result());
        }
        Ok(())
    }
}

impl<P: CommandParser> ConnectionObserver for Command<P> {
    type Output = P::Output;

    fn core(&self) -> &ObserverCore<P::Output> {
        &self.core
    }

    fn is_command(&self) -> bool {
        true
    }

    fn on_start(&self) -> Result<()> {
        debug!(command = %self.core, "sending command");
        self.core.connection().sendline(&self.command_string)?;
        Ok(())
    }

    // Handlers may send through the connection while the parse state is
    // locked, so transports must not deliver data synchronously from `send`.
    fn data_received(&self, data: &str, _received_at: DateTime<Utc>) {
        if self.done() {
            return;
        }
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        for line in state.buffer.feed(data) {
            if self.done() {
                break;
            }
            let text = remove_escape_codes(&line.text);
            if let Err(err) = self.process_line(state, &text, line.is_full_line) {
                warn!(command = %self.core, error = %err, line = %text, "command failed while parsing");
                self.core.set_error(err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::subscribe;
    use crate::parse::Parsed;
    use crate::ObserverError;
    use std::sync::OnceLock;
    use tether_connection::FifoBuffer;

    #[derive(Default)]
    struct Pwd {
        path: Option<String>,
        partials: Vec<String>,
    }

    fn path_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^(/\S*)$").unwrap())
    }

    fn error_re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"^ERROR: (.*)$").unwrap())
    }

    impl Pwd {
        fn parse_error(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
            if ctx.search(error_re(), line) {
                return Err(ObserverError::CommandFailure {
                    command: ctx.command_string().to_string(),
                    reason: ctx.group(1).to_string(),
                });
            }
            Ok(Parsed::NotConsumed)
        }

        fn parse_path(&mut self, line: &str, ctx: &mut LineContext<'_>) -> Result<Parsed> {
            if ctx.search(path_re(), line) {
                self.path = Some(ctx.group(1).to_string());
                return Ok(Parsed::Consumed);
            }
            Ok(Parsed::NotConsumed)
        }
    }

    impl CommandParser for Pwd {
        type Output = Option<String>;

        fn command_string(&self) -> String {
            "pwd".to_string()
        }

        fn parse_chain(&self) -> ParseChain<Self> {
            ParseChain::new()
                .handler("error", Pwd::parse_error)
                .handler("path", Pwd::parse_path)
        }

        fn on_partial_line(&mut self, line: &str, _ctx: &mut LineContext<'_>) -> Result<()> {
            self.partials.push(line.to_string());
            Ok(())
        }

        fn result(&self) -> Option<String> {
            self.path.clone()
        }
    }

    fn pwd(buffer: &FifoBuffer, options: CommandOptions) -> Arc<Command<Pwd>> {
        let cmd = Arc::new(Command::new(buffer.connection(), Pwd::default(), options).unwrap());
        subscribe(&cmd).unwrap();
        cmd
    }

    #[test]
    fn test_on_start_sends_command_line() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        cmd.on_start().unwrap();

        assert_eq!(buffer.sent(), vec!["pwd\n".to_string()]);
        assert_eq!(cmd.to_string(), format!("Command 'pwd'(id:{})", cmd.core().id()));
    }

    #[test]
    fn test_completes_on_prompt() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\n/root\nhost:~ # "]);

        assert!(cmd.done());
        assert_eq!(cmd.result().unwrap(), Some("/root".to_string()));
    }

    #[test]
    fn test_fragmented_output() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # p", "wd\r\n/ro", "ot\r\nhost", ":~ #"]);

        assert_eq!(cmd.result().unwrap(), Some("/root".to_string()));
        assert_eq!(cmd.with_parser(|p| p.partials.clone()), vec!["/ro", "host", "host:~ #"]);
    }

    #[test]
    fn test_prompt_like_partial_line_completes_command() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        // A chunk cut right after "->" looks like a prompt.
        buffer.inject(["host:~ # pwd\n", "/root/link ->"]);
        assert!(cmd.done());
        assert_eq!(cmd.result().unwrap(), None);

        buffer.inject([" /bcn\nhost:~ # "]);
        assert_eq!(cmd.result().unwrap(), None);
    }

    #[test]
    fn test_partial_line_without_prompt_char_waits() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\n", "/root/li"]);
        assert!(!cmd.done());

        buffer.inject(["nk\nhost:~ # "]);
        assert_eq!(cmd.result().unwrap(), Some("/root/link".to_string()));
    }

    #[test]
    fn test_previous_prompt_ignored_until_echo() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # \n"]);
        assert!(!cmd.done());

        buffer.inject(["host:~ # pwd\n/tmp\nhost:~ # "]);
        assert_eq!(cmd.result().unwrap(), Some("/tmp".to_string()));
    }

    #[test]
    fn test_without_echo() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default().with_expect_echo(false));

        buffer.inject(["/srv\n$ "]);

        assert_eq!(cmd.result().unwrap(), Some("/srv".to_string()));
    }

    #[test]
    fn test_escape_codes_removed() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\n\x1b[1;34m/root\x1b[0m\nhost:~ # "]);

        assert_eq!(cmd.result().unwrap(), Some("/root".to_string()));
    }

    #[test]
    fn test_parse_error_is_stored_not_raised() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\nERROR: no cwd\n"]);
        buffer.inject(["/root\nhost:~ # "]);

        let err = cmd.result().unwrap_err();
        assert!(matches!(err, ObserverError::CommandFailure { ref reason, .. } if reason == "no cwd"));
    }

    #[test]
    fn test_current_ret_while_pending() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\n/var\n"]);

        assert!(!cmd.done());
        assert_eq!(cmd.current_ret(), Some("/var".to_string()));
        assert!(matches!(cmd.result(), Err(ObserverError::ResultNotAvailableYet(_))));
    }

    #[test]
    fn test_custom_prompt() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default().with_prompt(r"^router>$"));

        buffer.inject(["router> pwd\n/flash\nhost:~ # \n"]);
        assert!(!cmd.done());

        buffer.inject(["router>"]);
        assert_eq!(cmd.result().unwrap(), Some("/flash".to_string()));
    }

    #[test]
    fn test_invalid_prompt() {
        let buffer = FifoBuffer::new("mem");
        let err = Command::new(
            buffer.connection(),
            Pwd::default(),
            CommandOptions::default().with_prompt("(unclosed"),
        )
        .unwrap_err();

        assert!(matches!(err, ObserverError::InvalidPattern(_)));
    }

    #[test]
    fn test_data_after_completion_ignored() {
        let buffer = FifoBuffer::new("mem");
        let cmd = pwd(&buffer, CommandOptions::default());

        buffer.inject(["host:~ # pwd\n/root\nhost:~ # "]);
        buffer.inject(["\n/other\nhost:~ # \n"]);

        assert_eq!(cmd.result().unwrap(), Some("/root".to_string()));
    }
}
