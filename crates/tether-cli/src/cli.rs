//! Command-line interface definition using clap.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tether_core::MatchMode;

/// Version shown by `--version`: package version, git revision and build date.
pub fn version_string() -> &'static str {
    static VERSION: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION.get_or_init(|| {
        format!(
            "{} (rev {}, built {})",
            env!("CARGO_PKG_VERSION"),
            env!("TETHER_GIT_REV"),
            env!("TETHER_BUILD_DATE")
        )
    })
}

/// Tether - replay recorded device sessions through commands and events
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Runner backend feeding the observer
    #[arg(long, value_enum, default_value_t = RunnerKind::Thread, env = "TETHER_RUNNER", global = true)]
    pub runner: RunnerKind,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Runner backends selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunnerKind {
    /// One thread per observer
    Thread,
    /// Tokio worker pool
    Pool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run `ls` against a recorded transcript and print the parsed listing
    Ls {
        #[command(flatten)]
        replay: ReplayArgs,

        /// Options passed to ls (e.g. -l, -lh)
        #[arg(short, long, allow_hyphen_values = true)]
        options: Option<String>,

        /// Prompt regex ending the command output
        #[arg(short, long)]
        prompt: Option<String>,

        /// Parse output even if the command echo never appears
        #[arg(long)]
        no_echo: bool,
    },

    /// Wait for lines matching patterns in a recorded transcript
    Wait4 {
        #[command(flatten)]
        replay: ReplayArgs,

        /// Pattern to detect (repeatable)
        #[arg(short, long = "pattern", required = true)]
        patterns: Vec<String>,

        /// How patterns combine (any, all, sequence)
        #[arg(short, long, default_value = "any")]
        mode: MatchMode,

        /// Occurrences to wait for; 0 collects until the timeout
        #[arg(short, long, default_value_t = 1)]
        times: usize,
    },
}

/// How a transcript is fed to the in-memory connection.
#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Transcript file (`~` and environment variables are expanded)
    pub transcript: String,

    /// Timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Bytes per injected chunk; 0 injects line by line
    #[arg(long, default_value_t = 0)]
    pub chunk: usize,

    /// Delay between chunks in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,

    /// Line terminators, escapes allowed (e.g. '\n' or '\r\n')
    #[arg(long)]
    pub newline: Option<String>,
}

impl ReplayArgs {
    /// The timeout as a duration, if one was given.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Delay between chunks.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Line terminators with `\n`, `\r` and `\t` escapes resolved.
    pub fn newline_chars(&self) -> Option<Vec<char>> {
        self.newline.as_deref().map(unescape).filter(|chars| !chars.is_empty())
    }
}

fn unescape(raw: &str) -> Vec<char> {
    let mut chars = Vec::new();
    let mut iter = raw.chars();
    while let Some(c) = iter.next() {
        if c != '\\' {
            chars.push(c);
            continue;
        }
        match iter.next() {
            Some('n') => chars.push('\n'),
            Some('r') => chars.push('\r'),
            Some('t') => chars.push('\t'),
            Some(other) => chars.push(other),
            None => chars.push('\\'),
        }
    }
    chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_ls() {
        let cli = Cli::parse_from(["tether", "ls", "session.log", "--options", "-lh", "--chunk", "16"]);
        match cli.command {
            Commands::Ls { replay, options, prompt, no_echo } => {
                assert_eq!(replay.transcript, "session.log");
                assert_eq!(replay.chunk, 16);
                assert_eq!(options.as_deref(), Some("-lh"));
                assert!(prompt.is_none());
                assert!(!no_echo);
            }
            _ => panic!("Expected Ls command"),
        }
        assert_eq!(cli.runner, RunnerKind::Thread);
    }

    #[test]
    fn test_cli_parse_wait4() {
        let cli = Cli::parse_from([
            "tether", "wait4", "boot.log", "-p", "login:", "-p", r"link (\w+)", "--mode", "Sequence", "--runner",
            "pool",
        ]);
        match cli.command {
            Commands::Wait4 { patterns, mode, times, .. } => {
                assert_eq!(patterns, ["login:", r"link (\w+)"]);
                assert_eq!(mode, MatchMode::Sequence);
                assert_eq!(times, 1);
            }
            _ => panic!("Expected Wait4 command"),
        }
        assert_eq!(cli.runner, RunnerKind::Pool);
    }

    #[test]
    fn test_wait4_requires_pattern() {
        assert!(Cli::try_parse_from(["tether", "wait4", "boot.log"]).is_err());
        assert!(Cli::try_parse_from(["tether", "wait4", "boot.log", "-p", "x", "--mode", "most"]).is_err());
    }

    #[test]
    fn test_cli_verbose() {
        let cli = Cli::parse_from(["tether", "ls", "x.log", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_replay_args() {
        let cli = Cli::parse_from([
            "tether", "ls", "x.log", "--timeout", "0.5", "--delay-ms", "20", "--newline", r"\r\n",
        ]);
        let Commands::Ls { replay, .. } = cli.command else {
            panic!("Expected Ls command");
        };
        assert_eq!(replay.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(replay.delay(), Duration::from_millis(20));
        assert_eq!(replay.newline_chars(), Some(vec!['\r', '\n']));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r"\n"), vec!['\n']);
        assert_eq!(unescape(r";\t\\"), vec![';', '\t', '\\']);
        assert_eq!(unescape("\\"), vec!['\\']);
    }

    #[test]
    fn test_version_string_carries_build_metadata() {
        let version = version_string();
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(version.contains(" (rev "));
        assert!(version.contains(", built "));
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
