//! Command handlers for CLI subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tether_commands::Ls;
use tether_connection::FifoBuffer;
use tether_core::{Command, CommandOptions, ConnectionObserver, LineEvent};
use tether_runner::{PoolRunner, Runner, RunnerConfig, ThreadRunner};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, ReplayArgs, RunnerKind};

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Execute a CLI command and return the rendered JSON result.
pub fn execute(cli: &Cli) -> Result<String> {
    let config = RunnerConfig::from_env();
    match cli.runner {
        RunnerKind::Thread => execute_on(&ThreadRunner::new(config), &cli.command),
        RunnerKind::Pool => execute_on(&PoolRunner::new(config)?, &cli.command),
    }
}

fn execute_on<R: Runner>(runner: &R, command: &Commands) -> Result<String> {
    match command {
        Commands::Ls {
            replay,
            options,
            prompt,
            no_echo,
        } => cmd_ls(runner, replay, options.as_deref(), prompt.as_deref(), *no_echo),
        Commands::Wait4 {
            replay,
            patterns,
            mode,
            times,
        } => {
            let buffer = connection(replay);
            let mut event = LineEvent::new(buffer.connection(), patterns)?
                .with_mode(*mode)
                .with_till_occurs_times(Some(*times));
            if let Some(chars) = replay.newline_chars() {
                event = event.with_newline_chars(chars);
            }
            if let Some(timeout) = replay.timeout() {
                event = event.with_timeout(timeout);
            }
            render(&run_replay(runner, &buffer, &Arc::new(event), replay)?)
        }
    }
}

fn cmd_ls<R: Runner>(
    runner: &R,
    replay: &ReplayArgs,
    options: Option<&str>,
    prompt: Option<&str>,
    no_echo: bool,
) -> Result<String> {
    let mut parser = Ls::new();
    if let Some(options) = options {
        parser = parser.with_options(options);
    }

    let mut command_options = CommandOptions::default().with_expect_echo(!no_echo);
    if let Some(prompt) = prompt {
        command_options = command_options.with_prompt(prompt);
    }
    if let Some(chars) = replay.newline_chars() {
        command_options = command_options.with_newline_chars(chars);
    }
    if let Some(timeout) = replay.timeout() {
        command_options = command_options.with_timeout(timeout);
    }

    let buffer = connection(replay);
    let ls = Arc::new(Command::new(buffer.connection(), parser, command_options)?);
    render(&run_replay(runner, &buffer, &ls, replay)?)
}

fn connection(replay: &ReplayArgs) -> FifoBuffer {
    FifoBuffer::new(format!("replay:{}", replay.transcript))
}

/// Submits `observer`, replays the transcript as device output and waits.
fn run_replay<R: Runner, O: ConnectionObserver>(
    runner: &R,
    buffer: &FifoBuffer,
    observer: &Arc<O>,
    replay: &ReplayArgs,
) -> Result<O::Output> {
    let transcript = load_transcript(&replay.transcript)?;
    let chunks = split_transcript(&transcript, replay.chunk);
    info!(
        observer = %observer.core(),
        chunks = chunks.len(),
        delay_ms = replay.delay_ms,
        "replaying transcript"
    );

    let handle = runner.submit(observer)?;
    let responder = buffer.inject_response(chunks, replay.delay());
    let result = runner.wait_for(observer, &handle, None);
    if responder.join().is_err() {
        warn!("transcript replay thread panicked");
    }
    debug!(sent = ?buffer.sent(), "data sent to device");
    Ok(result?)
}

fn load_transcript(path: &str) -> Result<String> {
    let expanded = PathBuf::from(shellexpand::full(path)?.as_ref());
    std::fs::read_to_string(&expanded)
        .map_err(|e| format!("Cannot read transcript {}: {}", expanded.display(), e).into())
}

/// Splits a transcript into injected chunks: whole lines (terminators kept)
/// when `chunk` is 0, otherwise pieces of at most `chunk` bytes.
pub fn split_transcript(text: &str, chunk: usize) -> Vec<String> {
    if chunk == 0 {
        return text.split_inclusive('\n').map(str::to_string).collect();
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if !current.is_empty() && current.len() + c.len_utf8() > chunk {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
