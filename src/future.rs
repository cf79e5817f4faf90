//! A single-assignment future shared between the caller and the session's event loop.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type FailureCallback = Box<dyn FnOnce(&Error) + Send>;
type CancelCallback = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending,
    Done(T),
    Failed(Error),
    Cancelled,
}

struct Inner<T> {
    state: State<T>,
    on_success: Option<SuccessCallback<T>>,
    on_failure: Option<FailureCallback>,
    on_cancel: Option<CancelCallback>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

/// The eventual result of an asynchronous IMAP operation.
///
/// An `ImapFuture` holds exactly one of: nothing yet, a value, an error, or a cancellation. The
/// first terminal assignment wins; every later [`done`](ImapFuture::done),
/// [`done_with_error`](ImapFuture::done_with_error) or [`cancel`](ImapFuture::cancel) is a no-op.
/// This is what lets racing failure paths inside the session resolve a command at most once.
///
/// Handles are cheap to clone and all clones observe the same state. [`get`](ImapFuture::get)
/// blocks the calling thread and may be called from any thread, any number of times.
pub struct ImapFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ImapFuture<T> {
    fn clone(&self) -> Self {
        ImapFuture {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ImapFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lock().state {
            State::Pending => "pending",
            State::Done(_) => "done",
            State::Failed(_) => "failed",
            State::Cancelled => "cancelled",
        };
        f.debug_struct("ImapFuture").field("state", &state).finish()
    }
}

impl<T> Default for ImapFuture<T> {
    fn default() -> Self {
        ImapFuture::new()
    }
}

impl<T> ImapFuture<T> {
    /// Creates a pending future.
    pub fn new() -> Self {
        ImapFuture {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Pending,
                    on_success: None,
                    on_failure: None,
                    on_cancel: None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the future reached a terminal state, cancellation included.
    pub fn is_done(&self) -> bool {
        !matches!(self.lock().state, State::Pending)
    }

    /// Whether the future was cancelled before anything else completed it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.lock().state, State::Cancelled)
    }

    /// Fails the future with `err`.
    ///
    /// Returns `false`, and does nothing, if the future was already terminal.
    pub fn done_with_error(&self, err: Error) -> bool {
        let callback = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.on_success = None;
            inner.on_cancel = None;
            let callback = inner.on_failure.take();
            inner.state = State::Failed(err.clone());
            callback
        };
        self.shared.cond.notify_all();
        if let Some(callback) = callback {
            callback(&err);
        }
        true
    }

    /// Cancels the future.
    ///
    /// Only the caller-visible handle is affected: work already handed to the session keeps
    /// running and its eventual result is dropped. Returns `false` if the future was already
    /// terminal. `may_interrupt` is accepted for API parity and has no further effect.
    pub fn cancel(&self, _may_interrupt: bool) -> bool {
        let callback = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.state = State::Cancelled;
            inner.on_success = None;
            inner.on_failure = None;
            inner.on_cancel.take()
        };
        self.shared.cond.notify_all();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Registers a callback fired when the future fails.
    ///
    /// Fires immediately if the future already failed. Never fires for a cancelled future.
    pub fn on_failure<F>(&self, callback: F)
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        let err = {
            let mut inner = self.lock();
            if matches!(inner.state, State::Pending) {
                inner.on_failure = Some(Box::new(callback));
                return;
            }
            match &inner.state {
                State::Failed(err) => err.clone(),
                _ => return,
            }
        };
        callback(&err);
    }

    /// Registers a callback fired when the future is cancelled.
    ///
    /// Fires immediately if the future is already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.lock();
            if matches!(inner.state, State::Pending) {
                inner.on_cancel = Some(Box::new(callback));
                return;
            }
            if !matches!(inner.state, State::Cancelled) {
                return;
            }
        }
        callback();
    }
}

impl<T: Clone> ImapFuture<T> {
    /// Creates a future that already holds `value`.
    pub fn completed(value: T) -> Self {
        let future = ImapFuture::new();
        future.done(value);
        future
    }

    /// Creates a future that already failed with `err`.
    pub fn failed(err: Error) -> Self {
        let future = ImapFuture::new();
        future.done_with_error(err);
        future
    }

    /// Completes the future with `value`.
    ///
    /// Returns `false`, and does nothing, if the future was already terminal.
    pub fn done(&self, value: T) -> bool {
        let (callback, value) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.on_failure = None;
            inner.on_cancel = None;
            match inner.on_success.take() {
                Some(callback) => {
                    inner.state = State::Done(value.clone());
                    (Some(callback), Some(value))
                }
                None => {
                    inner.state = State::Done(value);
                    (None, None)
                }
            }
        };
        self.shared.cond.notify_all();
        if let (Some(callback), Some(value)) = (callback, value) {
            callback(&value);
        }
        true
    }

    /// Completes the future from a `Result`.
    pub fn resolve(&self, result: Result<T>) -> bool {
        match result {
            Ok(value) => self.done(value),
            Err(err) => self.done_with_error(err),
        }
    }

    /// Registers a callback fired when the future completes successfully.
    ///
    /// Fires immediately if the future already holds a value.
    pub fn on_success<F>(&self, callback: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut inner = self.lock();
            if matches!(inner.state, State::Pending) {
                inner.on_success = Some(Box::new(callback));
                return;
            }
            match &inner.state {
                State::Done(value) => value.clone(),
                _ => return,
            }
        };
        callback(&value);
    }

    fn outcome(state: &State<T>) -> Option<Result<T>> {
        match state {
            State::Pending => None,
            State::Done(value) => Some(Ok(value.clone())),
            State::Failed(err) => Some(Err(err.clone())),
            State::Cancelled => Some(Err(Error::Cancelled)),
        }
    }

    /// Blocks until the future is terminal and returns its outcome.
    ///
    /// A cancelled future yields [`Error::Cancelled`].
    pub fn get(&self) -> Result<T> {
        let mut inner = self.lock();
        loop {
            if let Some(outcome) = Self::outcome(&inner.state) {
                return outcome;
            }
            inner = self
                .shared
                .cond
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`get`](ImapFuture::get), but gives up after `timeout` with [`Error::Timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let inner = self.lock();
        let (inner, _) = self
            .shared
            .cond
            .wait_timeout_while(inner, timeout, |inner| {
                matches!(inner.state, State::Pending)
            })
            .unwrap_or_else(PoisonError::into_inner);
        Self::outcome(&inner.state).unwrap_or(Err(Error::Timeout(timeout)))
    }
}
