//! What the session needs from the connection underneath it.

use std::fmt;
use std::io;

use crate::error::Result;
use crate::future::ImapFuture;

/// Name of the TLS layer in a transport's filter chain.
pub const TLS_FILTER: &str = "ssl";
/// Name of the inbound decompression filter.
pub const INFLATER_FILTER: &str = "inflater";
/// Name of the outbound compression filter.
pub const DEFLATER_FILTER: &str = "deflater";

/// Completes once bytes handed to [`Transport::write`] reached the socket, or failed to.
pub type WriteSignal = ImapFuture<()>;
/// Completes once the transport closed.
pub type CloseSignal = ImapFuture<()>;

/// Which way through the chain a filter transforms bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes coming from the server.
    Inbound,
    /// Bytes going to the server.
    Outbound,
}

/// Where a filter is inserted in the chain.
///
/// The chain is ordered from the raw socket towards the record framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPosition {
    /// Nearest to the raw socket.
    First,
    /// Directly after the named filter.
    After(&'static str),
}

/// A byte transformation spliced into the transport's chain.
pub trait StreamFilter: Send {
    fn direction(&self) -> Direction;

    /// Transforms one chunk of bytes.
    fn process(&mut self, input: &[u8]) -> io::Result<Vec<u8>>;
}

impl fmt::Debug for dyn StreamFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamFilter({:?})", self.direction())
    }
}

/// A live connection to an IMAP server.
///
/// Events flow the other way: the transport reports records, inactivity, failures and the
/// connection going away through the session's `on_response_record`, `handle_idle_event`,
/// `handle_exception` and `handle_channel_closed`.
pub trait Transport: Send {
    /// Queues `bytes` for sending.
    fn write(&mut self, bytes: Vec<u8>) -> WriteSignal;

    /// Whether the connection is still usable.
    fn is_active(&self) -> bool;

    /// Starts closing the connection.
    fn close(&mut self) -> CloseSignal;

    /// Inserts `filter` under `name` at `position`.
    fn insert_filter(
        &mut self,
        position: FilterPosition,
        name: &'static str,
        filter: Box<dyn StreamFilter>,
    ) -> Result<()>;

    /// Whether a filter called `name` is part of the chain.
    fn has_filter(&self, name: &str) -> bool;
}
