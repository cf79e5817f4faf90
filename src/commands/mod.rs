//! A working set of commands built on [`ImapCommand`](crate::ImapCommand).
//!
//! Each command only knows how to put itself on the wire. Mapping the records a command
//! completes with onto typed results is left to the caller.

mod authenticate;
mod basic;
mod compress;
mod idle;

pub use self::authenticate::AuthPlainCommand;
pub use self::basic::{
    AppendCommand, CapabilityCommand, LoginCommand, LogoutCommand, NoopCommand, SelectCommand,
};
pub use self::compress::CompressCommand;
pub use self::idle::IdleCommand;

/// Error returned by commands asked for their line after [`cleanup`](crate::ImapCommand::cleanup).
pub(crate) fn cleaned_up() -> crate::Error {
    crate::Error::InvalidInput("command was already cleaned up".to_string())
}
