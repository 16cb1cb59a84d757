use log::trace;
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::Instant;

/// Manages timer and I/O readiness events for suspended tasks.
///
/// The reactor uses system-level event notification (e.g., epoll on Linux, kqueue on macOS)
/// to detect when resources become available, and a deadline table for timers. Ready watchers
/// fire the waker of the task that armed them.
///
/// # Architecture
///
/// - **Registry**: Central collection point where byte sources are registered for monitoring
/// - **Waker maps**: Map tokens to the wakers that should be invoked when readiness occurs
/// - **Turn**: One blocking iteration of the loop, driven by [`crate::runtime::Runtime`]
///
/// A watcher is armed by storing a waker under its token and disarmed by removing it; firing
/// removes the entry as well, so a watcher never fires twice for one arming.
pub struct Reactor {
    /// Shared registry so awaitables can register their sources.
    registry: Registry,
    io_wakers: Mutex<HashMap<Token, Waker>>,
    timers: Mutex<HashMap<Token, TimerEntry>>,
    next_token: AtomicUsize,
}

struct TimerEntry {
    deadline: Instant,
    waker: Waker,
}

impl Reactor {
    /// Creates a new reactor with a poll instance.
    ///
    /// Returns the reactor for shared ownership and the OS-level poller the runtime will
    /// drive, or an IO error if initialization fails.
    pub(crate) fn new() -> io::Result<(Arc<Self>, Poll)> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let reactor = Arc::new(Self {
            registry,
            io_wakers: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(0),
        });

        Ok((reactor, poll))
    }

    /// Allocates a fresh token for a watcher.
    pub(crate) fn token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, source: &mut impl Source, token: Token) -> io::Result<()> {
        self.registry.register(source, token, Interest::READABLE)
    }

    /// Re-registers an already-known source. Readiness that is already pending is re-delivered
    /// on the next poll, so a source with buffered data does not get stuck waiting for a new
    /// edge.
    pub(crate) fn reregister(&self, source: &mut impl Source, token: Token) -> io::Result<()> {
        self.registry.reregister(source, token, Interest::READABLE)
    }

    pub(crate) fn deregister(&self, source: &mut impl Source) -> io::Result<()> {
        self.registry.deregister(source)
    }

    /// Associates a waker with a readiness token, replacing any previous waker.
    ///
    /// When the reactor sees an event for the token, the stored waker is invoked once and the
    /// entry is removed.
    pub(crate) fn add_io_waker(&self, token: Token, waker: Waker) {
        let mut wakers = self.io_wakers.lock().unwrap();
        wakers.insert(token, waker);
    }

    pub(crate) fn io_armed(&self, token: Token) -> bool {
        self.io_wakers.lock().unwrap().contains_key(&token)
    }

    pub(crate) fn cancel_io(&self, token: Token) {
        let mut wakers = self.io_wakers.lock().unwrap();
        wakers.remove(&token);
    }

    /// Arms (or re-arms) a timer watcher for the given deadline.
    pub(crate) fn arm_timer(&self, token: Token, deadline: Instant, waker: Waker) {
        let mut timers = self.timers.lock().unwrap();
        timers.insert(token, TimerEntry { deadline, waker });
    }

    /// Refreshes the stored waker of a still-armed timer without moving its deadline.
    pub(crate) fn update_timer_waker(&self, token: Token, waker: Waker) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(entry) = timers.get_mut(&token) {
            entry.waker = waker;
        }
    }

    pub(crate) fn timer_armed(&self, token: Token) -> bool {
        self.timers.lock().unwrap().contains_key(&token)
    }

    pub(crate) fn cancel_timer(&self, token: Token) {
        let mut timers = self.timers.lock().unwrap();
        timers.remove(&token);
    }

    /// True when no watcher of either kind remains armed.
    pub(crate) fn is_idle(&self) -> bool {
        self.io_wakers.lock().unwrap().is_empty() && self.timers.lock().unwrap().is_empty()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.deadline)
            .min()
    }

    fn fire_io(&self, token: Token) {
        // Single-shot: the watcher is disarmed the moment it fires. Events for tokens with no
        // stored waker (already fired, or disarmed by a drop) are ignored.
        let waker = self.io_wakers.lock().unwrap().remove(&token);
        if let Some(waker) = waker {
            trace!("readiness watcher {token:?} fired");
            waker.wake();
        }
    }

    fn fire_due_timers(&self, now: Instant) {
        let due: Vec<(Token, Waker)> = {
            let mut timers = self.timers.lock().unwrap();
            let tokens: Vec<Token> = timers
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(token, _)| *token)
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| timers.remove(&token).map(|entry| (token, entry.waker)))
                .collect()
        };
        // Wake outside the lock: a resumed task may re-arm the same token.
        for (token, waker) in due {
            trace!("timer watcher {token:?} fired");
            waker.wake();
        }
    }
}

/// Runs one iteration of the event loop.
///
/// Blocks until the OS signals readiness or the nearest timer deadline passes, then fires the
/// waker of every ready watcher, synchronously and one at a time. Firing order among fds in
/// the same iteration follows the backend's reported order; due timers fire after. Callers
/// must not rely on priority between the two watcher kinds.
pub(crate) fn turn(poll: &mut Poll, events: &mut Events, reactor: &Reactor) -> io::Result<()> {
    let timeout = reactor
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()));

    // Block here until something is ready. 0% CPU while waiting.
    if let Err(e) = poll.poll(events, timeout) {
        if e.kind() != io::ErrorKind::Interrupted {
            return Err(e);
        }
    }

    for event in events.iter() {
        reactor.fire_io(event.token());
    }

    reactor.fire_due_timers(Instant::now());

    Ok(())
}
