//! IMAP session error types.

use std::io::Error as IoError;
use std::result;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "native-tls")]
use native_tls::Error as TlsError;
use thiserror::Error;

/// A convenience wrapper around `Result` for `imap_engine::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur in the IMAP session engine.
///
/// Every failure of an operation is delivered through the future bound to that operation, so
/// errors are cheap to clone: each caller of [`ImapFuture::get`](crate::ImapFuture::get) sees
/// the same value.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The input given to a command cannot be sent to the server.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A character in a quoted argument cannot be represented on the wire.
    #[error(transparent)]
    Validate(#[from] ValidateError),
    /// The command does not support the requested operation.
    #[error("operation not supported: {0}")]
    UnsupportedOperation(&'static str),
    /// The session is not in a state where the command may be issued.
    #[error("command not allowed in the current session state")]
    CommandNotAllowed,
    /// The channel is no longer active.
    #[error("operation prohibited on closed channel")]
    OperationProhibitedOnClosedChannel,
    /// Writing to the channel failed.
    #[error("channel exception: {0}")]
    ChannelException(String),
    /// The server closed the connection while a command was pending.
    #[error("channel disconnected")]
    ChannelDisconnected,
    /// No traffic was observed within the configured inactivity period.
    #[error("channel timeout")]
    ChannelTimeout,
    /// The transport reported a failure while closing.
    #[error("closing connection failed: {0}")]
    ClosingConnectionFailed(String),
    /// The future was cancelled by the caller.
    #[error("future was cancelled")]
    Cancelled,
    /// The future did not complete within the given duration.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The connection could not be established.
    #[error("cannot connect to {0}")]
    ConnectionFailed(String),
    /// The server greeted us with something other than `OK` or `PREAUTH`.
    #[error("server rejected the connection: {0}")]
    GreetingRejected(String),
    /// The inbound byte stream could not be split into response records.
    #[error("cannot frame server response: {0}")]
    Framing(String),
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error(transparent)]
    Io(Arc<IoError>),
    /// An error from the `native_tls` library.
    #[cfg(feature = "native-tls")]
    #[error(transparent)]
    Tls(Arc<TlsError>),
}

impl Error {
    /// Returns `true` for the failures raised by the channel itself rather than by a command.
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Error::ChannelException(_)
                | Error::ChannelDisconnected
                | Error::ChannelTimeout
                | Error::OperationProhibitedOnClosedChannel
        )
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(Arc::new(err))
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(Arc::new(err))
    }
}

/// An invalid character was found in a quoted argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid character in input: {0:?}")]
pub struct ValidateError(pub char);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_error_prints_debug_char() {
        let err = Error::from(ValidateError('\n'));
        assert_eq!(err.to_string(), "invalid character in input: '\\n'");
    }

    #[test]
    fn io_errors_are_cloneable() {
        let err = Error::from(IoError::new(std::io::ErrorKind::BrokenPipe, "gone"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn channel_errors() {
        assert!(Error::ChannelTimeout.is_channel_error());
        assert!(Error::ChannelDisconnected.is_channel_error());
        assert!(!Error::CommandNotAllowed.is_channel_error());
    }
}
