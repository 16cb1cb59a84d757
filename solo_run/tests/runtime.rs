//! End-to-end tests of the runtime's suspension, reuse, composition, and teardown rules.
//!
//! Each test drives its own private runtime; there is no shared loop between them.

use mio::event::Source;
use mio::{Interest, Registry, Token};
use solo_run::io::{AsyncReader, ReadOutcome};
use solo_run::runtime::{RunError, Runtime};
use solo_run::task::JoinError;
use solo_run::timer::Timer;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn runtime() -> Runtime {
    Runtime::new(false).expect("runtime should initialize")
}

#[test]
fn timers_resume_in_program_order() {
    let mut rt = runtime();
    let handle = rt.handle();
    let order: Arc<Mutex<Vec<&str>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = order.clone();
    let start = Instant::now();

    rt.block_on(async move {
        let mut first = Timer::new(&handle, Duration::from_millis(30));
        let mut second = Timer::new(&handle, Duration::from_millis(20));
        first.wait().await;
        recorded.lock().unwrap().push("first");
        second.wait().await;
        recorded.lock().unwrap().push("second");
    })
    .expect("main task should complete");

    assert!(
        start.elapsed() >= Duration::from_millis(50),
        "both durations must elapse in sequence"
    );
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn timer_reuse_rearms_from_each_wait() {
    let mut rt = runtime();
    let handle = rt.handle();
    let start = Instant::now();

    let fired = rt
        .block_on(async move {
            let mut timer = Timer::new(&handle, Duration::from_millis(15));
            let mut fired = 0;
            for _ in 0..4 {
                timer.wait().await;
                fired += 1;
            }
            fired
        })
        .expect("main task should complete");

    assert_eq!(fired, 4);
    assert!(
        start.elapsed() >= Duration::from_millis(60),
        "each wait must be measured from its own arm, not from construction"
    );
}

#[test]
fn read_resumes_with_injected_bytes() {
    let mut rt = runtime();
    let handle = rt.handle();
    let (mut sender, receiver) = mio::unix::pipe::new().expect("pipe");

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sender.write_all(b"ping\n").expect("write side");
        sender
    });

    let outcome = rt
        .block_on(async move {
            let mut reader = AsyncReader::new(&handle, receiver);
            reader.read().await
        })
        .expect("main task should complete")
        .expect("read should succeed");

    assert_eq!(outcome, ReadOutcome::Data("ping\n".into()));
    drop(writer.join().expect("writer thread"));
}

#[test]
fn fired_watcher_is_disarmed_until_the_next_read() {
    let mut rt = runtime();
    let handle = rt.handle();
    let (mut sender, receiver) = mio::unix::pipe::new().expect("pipe");
    sender.write_all(b"one\n").expect("write side");

    let (first, second) = rt
        .block_on(async move {
            let mut reader = AsyncReader::new(&handle, receiver);
            let first = reader.read().await?;

            // The watcher is disarmed now. Bytes arriving here raise a readiness event that
            // must not resume the completed wait while we sit in an unrelated timer.
            sender.write_all(b"two\n")?;
            let mut pause = Timer::new(&handle, Duration::from_millis(20));
            pause.wait().await;

            let second = reader.read().await?;
            Ok::<_, io::Error>((first, second))
        })
        .expect("main task should complete")
        .expect("reads should succeed");

    assert_eq!(first, ReadOutcome::Data("one\n".into()));
    assert_eq!(second, ReadOutcome::Data("two\n".into()));
}

#[test]
fn dropping_an_armed_timer_disarms_its_watcher() {
    let mut rt = runtime();
    let handle = rt.handle();
    let start = Instant::now();

    rt.block_on(async move {
        let mut quick = Timer::new(&handle, Duration::from_millis(10));
        let mut slow = Timer::new(&handle, Duration::from_secs(60));
        // The losing wait is dropped while armed; its watcher must be released.
        futures::future::select(quick.wait(), slow.wait()).await;
        drop(slow);
    })
    .expect("main task should complete");

    assert!(
        start.elapsed() < Duration::from_secs(5),
        "a dangling timer watcher would keep the runtime alive for a minute"
    );
}

#[test]
fn dropping_an_armed_reader_disarms_its_watcher() {
    let mut rt = runtime();
    let handle = rt.handle();
    let (sender, receiver) = mio::unix::pipe::new().expect("pipe");
    let start = Instant::now();

    rt.block_on(async move {
        let mut reader = AsyncReader::new(&handle, receiver);
        let mut timeout = Timer::new(&handle, Duration::from_millis(10));
        futures::future::select(timeout.wait(), reader.read()).await;
        drop(reader);
    })
    .expect("main task should complete");

    // Readiness after destruction has nothing to resume and nothing to crash into.
    let mut sender = sender;
    let _ = sender.write_all(b"late\n");
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn nested_task_observes_three_leaf_awaits_in_order() {
    let mut rt = runtime();
    let handle = rt.handle();
    let (mut sender, receiver) = mio::unix::pipe::new().expect("pipe");
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        sender.write_all(b"go\n").expect("write side");
        sender
    });

    rt.block_on(async move {
        let inner_handle = handle.clone();
        let inner_events = recorded.clone();
        let inner = handle.spawn(async move {
            let mut tick = Timer::new(&inner_handle, Duration::from_millis(10));
            tick.wait().await;
            inner_events.lock().unwrap().push("tick one".into());
            tick.wait().await;
            inner_events.lock().unwrap().push("tick two".into());

            let mut reader = AsyncReader::new(&inner_handle, receiver);
            let outcome = reader.read().await.expect("read leaf");
            assert_eq!(outcome, ReadOutcome::Data("go\n".into()));
            inner_events.lock().unwrap().push("read".into());
        });
        inner.await.expect("inner task");
        recorded.lock().unwrap().push("outer resumed".into());
    })
    .expect("main task should complete");

    drop(writer.join().expect("writer thread"));
    assert_eq!(
        *events.lock().unwrap(),
        vec!["tick one", "tick two", "read", "outer resumed"]
    );
}

#[test]
fn synchronous_inner_task_finishes_before_the_outer_observes_it() {
    let mut rt = runtime();
    let handle = rt.handle();

    let value = rt
        .block_on(async move {
            let inner = handle.spawn(async { 21 + 21 });
            // Eager start: a body with no suspension point is already done here.
            assert!(inner.is_finished());
            inner.await.expect("inner task")
        })
        .expect("main task should complete");

    assert_eq!(value, 42);
}

#[test]
fn synchronous_main_task_needs_no_reactor() {
    let mut rt = runtime();
    let value = rt.block_on(async { "done" }).expect("main task");
    assert_eq!(value, "done");
}

#[test]
fn end_of_stream_is_distinct_and_ends_the_read_loop() {
    let mut rt = runtime();
    let handle = rt.handle();
    let (mut sender, receiver) = mio::unix::pipe::new().expect("pipe");
    sender.write_all(b"bye\n").expect("write side");
    drop(sender);

    let outcomes = rt
        .block_on(async move {
            let mut reader = AsyncReader::new(&handle, receiver);
            let mut outcomes = Vec::new();
            loop {
                let outcome = reader.read().await?;
                let done = outcome == ReadOutcome::Eof;
                outcomes.push(outcome);
                if done {
                    break;
                }
            }
            Ok::<_, io::Error>(outcomes)
        })
        .expect("main task should complete")
        .expect("reads should succeed");

    assert_eq!(
        outcomes,
        vec![ReadOutcome::Data("bye\n".into()), ReadOutcome::Eof]
    );
}

#[test]
fn detached_tasks_keep_the_runtime_alive_until_quiescent() {
    let mut rt = runtime();
    let handle = rt.handle();
    let flag = Arc::new(Mutex::new(false));
    let seen = flag.clone();

    let detached = rt.spawn(async move {
        let mut nap = Timer::new(&handle, Duration::from_millis(25));
        nap.wait().await;
        *seen.lock().unwrap() = true;
    });

    // An empty main task: the loop still runs until the detached timer resolves.
    rt.block_on(async {}).expect("main task");

    assert!(detached.is_finished());
    assert!(*flag.lock().unwrap());
}

#[test]
fn task_panic_is_reported_to_the_awaiting_task() {
    let mut rt = runtime();
    let handle = rt.handle();

    let result = rt
        .block_on(async move { handle.spawn(async { panic!("boom") }).await })
        .expect("main task should survive the inner panic");

    match result {
        Err(JoinError::Panicked(message)) => assert!(message.contains("boom")),
        Ok(()) => panic!("panicking task must not report success"),
    }
}

#[test]
fn main_task_panic_surfaces_as_a_run_error() {
    let mut rt = runtime();
    match rt.block_on(async { panic!("kaboom") }) {
        Err(RunError::Join(JoinError::Panicked(message))) => assert!(message.contains("kaboom")),
        other => panic!("expected a join error, got {other:?}"),
    }
}

#[test]
fn stalled_main_task_is_reported_not_spun() {
    let mut rt = runtime();
    match rt.block_on(futures::future::pending::<()>()) {
        Err(RunError::Stalled) => {}
        other => panic!("expected a stall, got {other:?}"),
    }
}

/// A source whose registration is always refused by the backend.
struct BrokenSource;

impl Source for BrokenSource {
    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "watcher refused",
        ))
    }

    fn reregister(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "watcher refused",
        ))
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for BrokenSource {
    fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

#[test]
fn registration_failure_is_surfaced_not_swallowed() {
    let mut rt = runtime();
    let handle = rt.handle();

    let err = rt
        .block_on(async move {
            let mut reader = AsyncReader::new(&handle, BrokenSource);
            reader.read().await
        })
        .expect("main task should complete")
        .expect_err("a refused registration must surface");

    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
}
