use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// A cheaply clonable flag that signals long running operations to stop.
///
/// All clones share the same state: cancelling one of them cancels all of them. Cancellation is
/// permanent.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Constructs a new token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation observing this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if [`CancellationToken::cancel`] was called on this token or any of its
    /// clones.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns an error if the token has been cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The error returned when an operation observed a cancelled [`CancellationToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the operation was cancelled")]
pub struct Cancelled;

impl From<Cancelled> for io::Error {
    fn from(err: Cancelled) -> Self {
        io::Error::other(err)
    }
}

/// Returns true if the given I/O error was produced because an operation was cancelled.
pub fn is_cancelled(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<Cancelled>().is_some())
}

/// Wraps a reader so that reads fail once a [`CancellationToken`] is cancelled.
///
/// The reader is sticky: once it returned end of stream or a cancellation error it keeps
/// returning the same result without calling the inner reader again.
#[derive(Debug)]
pub struct Cancellable<R> {
    inner: R,
    token: CancellationToken,
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Finished,
    Cancelled,
}

impl<R> Cancellable<R> {
    /// Wraps `inner` and observes `token` before every read.
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self {
            inner,
            token,
            state: State::Reading,
        }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state {
            State::Finished => return Ok(0),
            State::Cancelled => return Err(Cancelled.into()),
            State::Reading => {}
        }

        if self.token.is_cancelled() {
            self.state = State::Cancelled;
            return Err(Cancelled.into());
        }

        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.state = State::Finished;
        }
        Ok(n)
    }
}
