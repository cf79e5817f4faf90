//! The contract every request sent through a session satisfies.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::response::ImapResponse;

/// Sink receiving every untagged record while a streaming command is pending.
pub type StreamingQueue = mpsc::Sender<ImapResponse>;

/// A command shared between the caller and the session executing it.
///
/// The session identifies the pending command by pointer identity of this `Arc`, which is what
/// [`ImapAsyncSession::terminate`](crate::ImapAsyncSession::terminate) relies on.
pub type CommandRef = Arc<Mutex<dyn ImapCommand>>;

/// One protocol unit sent through an [`ImapAsyncSession`](crate::ImapAsyncSession).
///
/// The session owns the tag and the wire; a command only produces bytes when asked to. Lines
/// returned from every method must be complete, CRLF included. The session prefixes the
/// command line with the tag and a space.
pub trait ImapCommand: Send {
    /// Name used in logs.
    fn command_type(&self) -> &'static str;

    /// The untagged bytes to send first. Called once.
    ///
    /// An error here aborts the command before anything is written.
    fn command_line(&mut self) -> Result<Vec<u8>>;

    /// The line logged for this command when debug logging is on.
    ///
    /// Commands carrying secrets must mask them.
    fn debug_line(&self) -> String {
        self.command_type().to_string()
    }

    /// The bytes answering a `+` continuation, or `None` if there is nothing more to send.
    fn next_line_after_continuation(&mut self, _response: &ImapResponse) -> Result<Option<Vec<u8>>> {
        Err(Error::UnsupportedOperation(
            "command does not accept continuation requests",
        ))
    }

    /// The line ending a streaming command; only used by
    /// [`ImapAsyncSession::terminate`](crate::ImapAsyncSession::terminate).
    fn terminate_line(&mut self) -> Result<Vec<u8>> {
        Err(Error::UnsupportedOperation("command cannot be terminated"))
    }

    /// Where untagged records are forwarded while the command is pending.
    fn streaming_queue(&self) -> Option<StreamingQueue> {
        None
    }

    /// Whether a tagged `OK` for this command switches the connection to compression.
    fn is_compression_requested(&self) -> bool {
        false
    }

    /// Drops everything the command holds. Must be idempotent.
    fn cleanup(&mut self);
}

/// Wraps a command so it can be handed to a session.
pub fn shared<C: ImapCommand + 'static>(command: C) -> Arc<Mutex<C>> {
    Arc::new(Mutex::new(command))
}

pub(crate) fn lock<C: ?Sized>(command: &Mutex<C>) -> MutexGuard<'_, C> {
    command.lock().unwrap_or_else(PoisonError::into_inner)
}
