//! `COMPRESS DEFLATE` from [RFC 4978](https://tools.ietf.org/html/rfc4978).

use crate::command::ImapCommand;
use crate::error::Result;

/// Asks the server to compress the rest of the connection.
///
/// Once the server answers with a tagged `OK` the session splices DEFLATE filters into its
/// transport; see [`ImapAsyncSession::start_compression`](crate::ImapAsyncSession::start_compression).
#[derive(Debug, Default, Clone, Copy)]
pub struct CompressCommand;

impl CompressCommand {
    pub fn new() -> Self {
        CompressCommand
    }
}

impl ImapCommand for CompressCommand {
    fn command_type(&self) -> &'static str {
        "COMPRESS"
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        Ok(b"COMPRESS DEFLATE\r\n".to_vec())
    }

    fn is_compression_requested(&self) -> bool {
        true
    }

    fn cleanup(&mut self) {}
}
