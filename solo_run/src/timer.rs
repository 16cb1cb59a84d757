//! Timer awaitable backed by a reactor timer watcher.

use log::trace;
use mio::Token;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::reactor::Reactor;
use crate::runtime::Handle;

/// A reusable timer bound to a runtime.
///
/// A timer never resolves synchronously: every [`Timer::wait`] suspends the calling task and
/// arms the underlying watcher for the configured duration, measured from that call. The same
/// instance may be waited on repeatedly (e.g., in a loop); each wait re-arms the same watcher.
///
/// Dropping the timer, or an in-flight wait, disarms the watcher unconditionally, so a
/// reactor turn can never wake into a destroyed timer.
pub struct Timer {
    reactor: Arc<Reactor>,
    duration: Duration,
    token: Token,
}

impl Timer {
    /// Creates a timer for `duration`. Nothing is armed until [`Timer::wait`] is called.
    pub fn new(handle: &Handle, duration: Duration) -> Self {
        let reactor = handle.reactor().clone();
        let token = reactor.token();
        trace!("timer {token:?} created for {duration:?}");
        Self {
            reactor,
            duration,
            token,
        }
    }

    /// Waits for the configured duration, measured from this call.
    ///
    /// The `&mut` receiver makes a second suspension while one is in flight unrepresentable:
    /// exactly one wait per timer can hold the watcher at a time.
    pub fn wait(&mut self) -> TimerWait<'_> {
        TimerWait {
            timer: self,
            armed: false,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        // Unconditional, even if never armed.
        self.reactor.cancel_timer(self.token);
        trace!("timer {:?} disarmed on drop", self.token);
    }
}

/// The leaf future for one wait on a [`Timer`].
pub struct TimerWait<'a> {
    timer: &'a mut Timer,
    armed: bool,
}

impl Future for TimerWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        let timer = &mut *this.timer;

        if !this.armed {
            // LEAF LOGIC: arm the watcher and leave our waker with the reactor.
            let deadline = Instant::now() + timer.duration;
            timer
                .reactor
                .arm_timer(timer.token, deadline, cx.waker().clone());
            this.armed = true;
            trace!("timer {:?} armed for {:?}", timer.token, timer.duration);
            return Poll::Pending;
        }

        if timer.reactor.timer_armed(timer.token) {
            // Polled before the deadline; keep the newest waker.
            timer
                .reactor
                .update_timer_waker(timer.token, cx.waker().clone());
            return Poll::Pending;
        }

        trace!("timer {:?} resumed after {:?}", timer.token, timer.duration);
        Poll::Ready(())
    }
}

impl Drop for TimerWait<'_> {
    fn drop(&mut self) {
        if self.armed {
            // An in-flight wait that is dropped must release the watcher.
            self.timer.reactor.cancel_timer(self.timer.token);
        }
    }
}
