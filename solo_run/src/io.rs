//! Readiness awaitable over byte-oriented sources.
//!
//! Works with anything that the reactor can watch for readability and that can be read from:
//! pipes, sockets, standard input. The awaitable assumes nothing beyond
//! [`mio::event::Source`] + [`std::io::Read`].

use log::{debug, trace};
use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::future::Future;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::reactor::Reactor;
use crate::runtime::Handle;

/// Bytes read per completed wait.
pub const READ_BUF_SIZE: usize = 1024;

/// Outcome of one bounded read after the source reported readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Up to [`READ_BUF_SIZE`] bytes, decoded lossily as UTF-8.
    Data(String),
    /// The source reached end-of-stream. Distinct from an empty read and from an error;
    /// callers should leave their read loop on this.
    Eof,
}

/// Awaits readability of a byte source and performs one bounded read per wait.
///
/// Each [`AsyncReader::read`] arms an fd-readiness watcher and suspends; readiness never
/// resolves synchronously. The watcher is single-shot: it is disarmed the moment it fires and
/// must be re-armed by the next `read` call, so a later readiness event cannot resume an
/// already-completed wait.
pub struct AsyncReader<S: Source> {
    reactor: Arc<Reactor>,
    source: S,
    token: Token,
    registered: bool,
}

impl<S: Source + Read> AsyncReader<S> {
    pub fn new(handle: &Handle, source: S) -> Self {
        let reactor = handle.reactor().clone();
        let token = reactor.token();
        Self {
            reactor,
            source,
            token,
            registered: false,
        }
    }

    /// Suspends until the source is readable, then reads once.
    ///
    /// Resolves to [`ReadOutcome::Data`] on bytes, [`ReadOutcome::Eof`] at end-of-stream, or
    /// the underlying error; the caller decides what each means. The `&mut` receiver keeps a
    /// second wait from racing the one in flight.
    pub fn read(&mut self) -> ReadWait<'_, S> {
        ReadWait {
            reader: self,
            armed: false,
        }
    }

    fn arm(&mut self, waker: Waker) -> io::Result<()> {
        if self.registered {
            // Re-delivers readiness that arrived while we were not waiting.
            self.reactor.reregister(&mut self.source, self.token)?;
        } else {
            self.reactor.register(&mut self.source, self.token)?;
            self.registered = true;
        }
        self.reactor.add_io_waker(self.token, waker);
        Ok(())
    }
}

impl<S: Source> Drop for AsyncReader<S> {
    fn drop(&mut self) {
        self.reactor.cancel_io(self.token);
        if self.registered {
            if let Err(err) = self.reactor.deregister(&mut self.source) {
                debug!("deregister of {:?} failed: {err}", self.token);
            }
        }
    }
}

/// The leaf future for one wait on an [`AsyncReader`].
pub struct ReadWait<'a, S: Source> {
    reader: &'a mut AsyncReader<S>,
    armed: bool,
}

impl<S: Source + Read> Future for ReadWait<'_, S> {
    type Output = io::Result<ReadOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let reader = &mut *this.reader;

        if !this.armed {
            // LEAF LOGIC: arm the watcher and leave our waker with the reactor.
            reader.arm(cx.waker().clone())?;
            this.armed = true;
            trace!("readiness watcher {:?} armed", reader.token);
            return Poll::Pending;
        }

        if reader.reactor.io_armed(reader.token) {
            // Polled before the watcher fired; keep the newest waker.
            reader.reactor.add_io_waker(reader.token, cx.waker().clone());
            return Poll::Pending;
        }

        let mut buf = [0u8; READ_BUF_SIZE];
        match reader.source.read(&mut buf) {
            Ok(0) => Poll::Ready(Ok(ReadOutcome::Eof)),
            Ok(n) => {
                trace!("readiness watcher {:?} resumed with {n} bytes", reader.token);
                Poll::Ready(Ok(ReadOutcome::Data(
                    String::from_utf8_lossy(&buf[..n]).into_owned(),
                )))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // The readiness was consumed elsewhere; arm again and wait.
                reader.arm(cx.waker().clone())?;
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl<S: Source> Drop for ReadWait<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            // An in-flight wait that is dropped must release the watcher.
            self.reader.reactor.cancel_io(self.reader.token);
        }
    }
}

/// Standard input as a reactor-watchable source.
pub struct Stdin(io::Stdin);

impl Stdin {
    pub fn new() -> Self {
        Self(io::stdin())
    }
}

impl Default for Stdin {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for Stdin {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        SourceFd(&self.0.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.0.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.0.as_raw_fd()).deregister(registry)
    }
}

impl Read for Stdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}
