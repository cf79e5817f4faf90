//! The IMAP IDLE command specified in [RFC 2177](https://tools.ietf.org/html/rfc2177).

use crate::command::{ImapCommand, StreamingQueue};
use crate::error::{Error, Result};
use crate::response::ImapResponse;

const DONE: &[u8] = b"DONE\r\n";

/// Asks the server to push mailbox changes as they happen.
///
/// The server acknowledges with a continuation, after which every untagged record is forwarded
/// to the queue given to [`IdleCommand::new`]. The command stays pending until
/// [`ImapAsyncSession::terminate`](crate::ImapAsyncSession::terminate) sends `DONE` and the
/// server answers with the tagged response.
///
/// Note that the server MAY consider a client inactive if it has an IDLE command running, and if
/// such a server has an inactivity timeout it MAY log the client off implicitly at the end of its
/// timeout period. Clients are advised to terminate the IDLE and re-issue it at least every 29
/// minutes.
#[derive(Debug)]
pub struct IdleCommand {
    queue: Option<StreamingQueue>,
    done_sent: bool,
}

impl IdleCommand {
    pub fn new(queue: StreamingQueue) -> Self {
        IdleCommand {
            queue: Some(queue),
            done_sent: false,
        }
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.queue.is_none()
    }
}

impl ImapCommand for IdleCommand {
    fn command_type(&self) -> &'static str {
        "IDLE"
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        // The IDLE command takes no arguments.
        Ok(b"IDLE\r\n".to_vec())
    }

    fn next_line_after_continuation(&mut self, _response: &ImapResponse) -> Result<Option<Vec<u8>>> {
        // "+ idling": nothing to send until we are told to stop.
        Ok(None)
    }

    fn terminate_line(&mut self) -> Result<Vec<u8>> {
        if self.done_sent {
            return Err(Error::UnsupportedOperation("IDLE was already terminated"));
        }
        self.done_sent = true;
        Ok(DONE.to_vec())
    }

    fn streaming_queue(&self) -> Option<StreamingQueue> {
        self.queue.clone()
    }

    fn cleanup(&mut self) {
        self.queue = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_record;
    use std::sync::mpsc;

    #[test]
    fn idle_lines() {
        let (tx, _rx) = mpsc::channel();
        let mut cmd = IdleCommand::new(tx);
        assert_eq!(cmd.command_line().unwrap(), b"IDLE\r\n".to_vec());
        let idling = parse_record(b"+ idling\r\n".to_vec()).unwrap();
        assert_eq!(cmd.next_line_after_continuation(&idling).unwrap(), None);
        assert_eq!(cmd.terminate_line().unwrap(), b"DONE\r\n".to_vec());
        assert!(cmd.streaming_queue().is_some());
    }

    #[test]
    fn done_is_sent_once() {
        let (tx, _rx) = mpsc::channel();
        let mut cmd = IdleCommand::new(tx);
        cmd.terminate_line().unwrap();
        assert!(matches!(
            cmd.terminate_line(),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn cleanup_drops_queue() {
        let (tx, rx) = mpsc::channel();
        let mut cmd = IdleCommand::new(tx);
        cmd.cleanup();
        assert!(cmd.is_cleaned_up());
        assert!(cmd.streaming_queue().is_none());
        // the only sender is gone
        assert!(rx.recv().is_err());
    }
}
