//! A pipelined IMAP session engine.
//!
//! An [`ImapAsyncSession`] owns one connection and keeps at most one command in flight on it.
//! Commands implement [`ImapCommand`]: they produce their line, answer the server's continuation
//! requests, and, for streaming commands such as IDLE, know how to end themselves. Every
//! operation hands back an [`ImapFuture`] that completes exactly once, with every record the
//! server sent for the command.
//!
//! Only the framing of responses is understood here; what a record means is up to the caller.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::mpsc;
//! use imap_engine::commands::{IdleCommand, LoginCommand, SelectCommand};
//! use imap_engine::{shared, ImapAsyncClient, SessionConfig};
//!
//! # fn main() -> Result<(), imap_engine::Error> {
//! let config = SessionConfig::new("imap.example.com", 993);
//! let session = ImapAsyncClient::new().create_session(&config).get()?;
//!
//! session.execute(shared(LoginCommand::new("user", "password")))?.get()?;
//! session.execute(shared(SelectCommand::select("INBOX")))?.get()?;
//!
//! let (tx, rx) = mpsc::channel();
//! let idle = shared(IdleCommand::new(tx));
//! session.execute(idle.clone())?;
//! let update = rx.recv().expect("server went away");
//! println!("mailbox changed: {}", update);
//! let responses = session.terminate(&idle)?.get()?;
//! println!("{} records", responses.len());
//!
//! session.close().get()?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod client;
mod codec;
mod command;
mod compress;
mod conn;
mod future;
mod response;
mod session;
mod transport;
mod utils;

pub mod commands;
pub mod error;

pub use crate::client::{ImapAsyncClient, Security, SessionConfig};
pub use crate::codec::{
    parse_record, ResponseDecoder, DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_LITERAL_SIZE,
};
pub use crate::command::{shared, CommandRef, ImapCommand, StreamingQueue};
pub use crate::compress::{Deflater, Inflater};
pub use crate::conn::{Connection, ImapConnection, SetReadTimeout};
pub use crate::error::{Error, Result};
pub use crate::future::ImapFuture;
pub use crate::response::{ImapResponse, ResponseKind, Status};
pub use crate::session::{DebugMode, ImapAsyncSession, ImapResponses, Phase, SessionState};
pub use crate::transport::{
    CloseSignal, Direction, FilterPosition, StreamFilter, Transport, WriteSignal,
    DEFLATER_FILTER, INFLATER_FILTER, TLS_FILTER,
};
pub use crate::utils::{quote, validate_str};

#[cfg(test)]
mod mock_transport;
