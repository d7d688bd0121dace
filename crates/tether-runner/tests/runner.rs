//! End-to-end runner scenarios over the in-memory transport.

use std::sync::{Arc, OnceLock};
use std::task::Poll;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tether_connection::{Connection, FifoBuffer};
use tether_core::{
    Command, CommandOptions, CommandParser, ConnectionObserver, LineContext, LineEvent, ObserverError,
    ObserverState, ParseChain, Parsed, Result as ObserverResult, TimeoutKind,
};
use tether_runner::{start_channel, FeedHandle, PoolRunner, Runner, RunnerConfig, RunnerError, ThreadRunner};

/// `uname -s -r` reduced to its release field.
#[derive(Default)]
struct Uname {
    release: Option<String>,
}

fn uname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Linux\s+(\S+)$").unwrap())
}

impl Uname {
    fn parse_release(&mut self, line: &str, ctx: &mut LineContext<'_>) -> ObserverResult<Parsed> {
        if ctx.search(uname_re(), line) {
            self.release = Some(ctx.group(1).to_string());
            return Ok(Parsed::Consumed);
        }
        Ok(Parsed::NotConsumed)
    }
}

impl CommandParser for Uname {
    type Output = Option<String>;

    fn command_string(&self) -> String {
        "uname -s -r".to_string()
    }

    fn parse_chain(&self) -> ParseChain<Self> {
        ParseChain::new().handler("release", Uname::parse_release)
    }

    fn result(&self) -> Option<String> {
        self.release.clone()
    }
}

const UNAME_OUTPUT: [&str; 3] = ["host:~ # uname -s -r\n", "Linux 6.1.0-rt\n", "host:~ # "];

fn config() -> RunnerConfig {
    RunnerConfig::default()
        .with_workers(2)
        .with_wait_tick(Duration::from_millis(10))
        .with_shutdown_grace(Duration::from_millis(500))
}

fn uname(buffer: &FifoBuffer) -> Arc<Command<Uname>> {
    Arc::new(Command::new(buffer.connection(), Uname::default(), CommandOptions::default()).unwrap())
}

fn ready_event(buffer: &FifoBuffer) -> Arc<LineEvent> {
    Arc::new(
        LineEvent::new(buffer.connection(), ["ready"])
            .unwrap()
            .with_till_occurs_times(Some(1)),
    )
}

fn command_succeeds<R: Runner>(runner: &R) {
    let buffer = FifoBuffer::new("mem");
    let cmd = uname(&buffer);

    let handle = runner.submit(&cmd).unwrap();
    assert_eq!(buffer.sent(), vec!["uname -s -r\n".to_string()]);

    let responder = buffer.inject_response(UNAME_OUTPUT, Duration::from_millis(10));
    let release = runner.wait_for(&cmd, &handle, None).unwrap();
    responder.join().unwrap();

    assert_eq!(release.as_deref(), Some("6.1.0-rt"));
    assert_eq!(buffer.connection().subscriber_count(), 0);
}

#[test]
fn test_command_succeeds_on_thread_runner() {
    command_succeeds(&ThreadRunner::new(config()));
}

#[test]
fn test_command_succeeds_on_pool_runner() {
    command_succeeds(&PoolRunner::new(config()).unwrap());
}

#[test]
fn test_run_submits_and_waits() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let event = ready_event(&buffer);

    let responder = buffer.inject_response(["booting\n", "system ready\n"], Duration::from_millis(30));
    let found = runner.run(&event, Some(Duration::from_secs(2))).unwrap();
    responder.join().unwrap();

    assert_eq!(found.len(), 1);
}

#[test]
fn test_cancel_during_feed() {
    let runner = PoolRunner::new(config()).unwrap();
    let buffer = FifoBuffer::new("mem");
    let event = ready_event(&buffer);

    let handle = runner.submit(&event).unwrap();
    assert!(handle.cancel());

    let err = runner.wait_for(&event, &handle, None).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(event.core().state(), ObserverState::Cancelled);
    assert_eq!(buffer.connection().subscriber_count(), 0);
}

#[test]
fn test_command_timeout_while_awaited() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let cmd = uname(&buffer);

    let handle = runner.submit(&cmd).unwrap();
    let err = runner
        .wait_for(&cmd, &handle, Some(Duration::from_millis(50)))
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        RunnerError::Observer(ObserverError::CommandTimeout { kind: TimeoutKind::AwaitDone, .. })
    ));
    assert_eq!(buffer.connection().subscriber_count(), 0);
    assert_eq!(cmd.core().state(), ObserverState::Failed);
}

#[test]
fn test_unawaited_feed_enforces_observer_timeout() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let event = Arc::new(
        LineEvent::new(buffer.connection(), ["never"])
            .unwrap()
            .with_till_occurs_times(Some(1))
            .with_timeout(Duration::from_millis(30)),
    );

    let handle = runner.submit(&event).unwrap();
    thread::sleep(Duration::from_millis(150));

    assert!(handle.is_finished());
    assert!(matches!(
        event.result(),
        Err(ObserverError::ObservationTimeout { kind: TimeoutKind::Feed, .. })
    ));
}

#[test]
fn test_extended_timeout_moves_deadline() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let event = Arc::new(
        LineEvent::new(buffer.connection(), ["ready"])
            .unwrap()
            .with_till_occurs_times(Some(1))
            .with_timeout(Duration::from_millis(100)),
    );

    let handle = runner.submit(&event).unwrap();
    let extender = {
        let event = Arc::clone(&event);
        let connection = buffer.connection();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            event.set_timeout(Duration::from_secs(2));
            thread::sleep(Duration::from_millis(200));
            connection.data_received(b"ready\n");
        })
    };

    let found = runner.wait_for(&event, &handle, None).unwrap();
    extender.join().unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(event.timeout(), Duration::from_secs(2));
}

#[test]
fn test_completion_wins_over_expiry() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let event = ready_event(&buffer);

    let handle = runner.submit(&event).unwrap();
    buffer.inject(["ready\n"]);

    let found = runner.wait_for(&event, &handle, Some(Duration::ZERO)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(event.core().state(), ObserverState::Succeeded);
}

#[test]
fn test_backend_startup_failure_allows_resubmit() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let runner = PoolRunner::with_handle(
        rt.handle().clone(),
        config().with_start_grace(Duration::from_millis(50)),
    );
    let buffer = FifoBuffer::new("mem");
    let cmd = uname(&buffer);

    // The only runtime thread is blocked inside submit, so the feed never starts.
    let err = rt.block_on(async { runner.submit(&cmd) }).unwrap_err();
    assert!(matches!(err, RunnerError::BackendStartup { .. }));

    drop(rt);
    assert_eq!(cmd.core().state(), ObserverState::Pending);
    assert!(buffer.sent().is_empty());
    assert_eq!(runner.active_feeds(), 0);
    assert_eq!(buffer.connection().subscriber_count(), 0);

    let retry = ThreadRunner::new(config());
    let handle = retry.submit(&cmd).unwrap();
    assert_eq!(buffer.sent(), vec!["uname -s -r\n".to_string()]);
    buffer.inject(UNAME_OUTPUT);
    let release = retry.wait_for(&cmd, &handle, Some(Duration::from_secs(2))).unwrap();
    assert_eq!(release.as_deref(), Some("6.1.0-rt"));
}

#[test]
fn test_zero_start_grace_never_sends_behind_a_failed_submit() {
    let runner = ThreadRunner::new(config().with_start_grace(Duration::ZERO));

    for _ in 0..20 {
        let buffer = FifoBuffer::new("mem");
        let cmd = uname(&buffer);
        match runner.submit(&cmd) {
            Ok(handle) => {
                assert_eq!(buffer.sent().len(), 1);
                handle.cancel();
            }
            Err(err) => {
                assert!(matches!(err, RunnerError::BackendStartup { .. }));
                thread::sleep(Duration::from_millis(20));
                assert!(buffer.sent().is_empty());
                assert_eq!(cmd.core().state(), ObserverState::Pending);
            }
        }
    }
}

#[test]
fn test_shutdown_cancels_and_refuses_new_work() {
    let runner = PoolRunner::new(config()).unwrap();
    let buffer = FifoBuffer::new("mem");
    let first = ready_event(&buffer);
    let second = Arc::new(LineEvent::new(buffer.connection(), ["login:"]).unwrap());

    let first_handle = runner.submit(&first).unwrap();
    let second_handle = runner.submit(&second).unwrap();
    assert_eq!(runner.active_feeds(), 2);

    runner.shutdown();

    assert!(first_handle.is_finished());
    assert!(second_handle.is_finished());
    assert_eq!(first.core().state(), ObserverState::Cancelled);
    assert_eq!(second.core().state(), ObserverState::Cancelled);
    assert_eq!(buffer.connection().subscriber_count(), 0);
    assert!(matches!(runner.submit(&ready_event(&buffer)), Err(RunnerError::ShutDown)));
}

#[test]
fn test_wait_for_iterator() {
    let runner = ThreadRunner::new(config());
    let buffer = FifoBuffer::new("mem");
    let event = ready_event(&buffer);

    let handle = runner.submit(&event).unwrap();
    let mut polls = runner.wait_for_iterator(&handle);
    assert!(matches!(polls.next(), Some(Poll::Pending)));

    buffer.inject(["ready\n"]);

    let mut result = None;
    for poll in polls.by_ref().take(200) {
        match poll {
            Poll::Ready(found) => {
                result = Some(found);
                break;
            }
            Poll::Pending => thread::sleep(Duration::from_millis(5)),
        }
    }

    assert_eq!(result.unwrap().unwrap().len(), 1);
    assert!(polls.next().is_none());
}

#[test]
fn test_feed_command_on_scoped_thread() {
    let runner = PoolRunner::new(config()).unwrap();
    let buffer = FifoBuffer::new("mem");
    let cmd = uname(&buffer);
    let handle = FeedHandle::new(cmd.to_string());
    let (signal, started) = start_channel();

    let release = thread::scope(|s| {
        let feeder = s.spawn(|| runner.feed(&cmd, &handle, signal));
        started.wait(&handle, Duration::from_secs(1)).unwrap();
        buffer.inject(UNAME_OUTPUT);
        feeder.join().unwrap()
    });

    assert_eq!(release.unwrap().as_deref(), Some("6.1.0-rt"));
    assert_eq!(buffer.sent(), vec!["uname -s -r\n".to_string()]);
}
