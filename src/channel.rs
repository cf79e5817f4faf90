//! The blocking TCP/TLS transport.
//!
//! Each session gets one event-loop thread owning the socket. The loop polls the socket with a
//! short read timeout and, between reads and between records, drains the operations the session
//! queued through its [`TcpTransport`] handle. Every engine callback for a session runs on that
//! thread, one at a time.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::codec::ResponseDecoder;
use crate::conn::{Connection, SetReadTimeout};
use crate::error::{Error, Result};
use crate::future::ImapFuture;
use crate::session::{DebugMode, ImapAsyncSession, WeakSession};
use crate::transport::{
    CloseSignal, Direction, FilterPosition, StreamFilter, Transport, WriteSignal, TLS_FILTER,
};

const READ_BUFFER_SIZE: usize = 16 * 1024;

struct Stage {
    name: &'static str,
    /// `None` for layers implemented by the stream itself, i.e. TLS.
    filter: Option<Box<dyn StreamFilter>>,
    /// Inserted since the decoder's buffered bytes were last passed through the chain.
    fresh: bool,
}

/// Named filters ordered from the socket towards the record framer.
struct FilterChain {
    stages: Vec<Stage>,
}

impl FilterChain {
    fn new(tls: bool) -> Self {
        let mut stages = Vec::new();
        if tls {
            stages.push(Stage {
                name: TLS_FILTER,
                filter: None,
                fresh: false,
            });
        }
        FilterChain { stages }
    }

    fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name == name)
    }

    fn insert(
        &mut self,
        position: FilterPosition,
        name: &'static str,
        filter: Box<dyn StreamFilter>,
    ) -> Result<()> {
        if self.contains(name) {
            return Err(Error::InvalidInput(format!("filter {} already present", name)));
        }
        let index = match position {
            FilterPosition::First => 0,
            FilterPosition::After(after) => match self.stages.iter().position(|s| s.name == after) {
                Some(i) => i + 1,
                None => return Err(Error::InvalidInput(format!("no filter named {}", after))),
            },
        };
        self.stages.insert(
            index,
            Stage {
                name,
                filter: Some(filter),
                fresh: true,
            },
        );
        Ok(())
    }

    fn outbound(&mut self, bytes: Vec<u8>) -> io::Result<Vec<u8>> {
        let mut bytes = bytes;
        for stage in self.stages.iter_mut().rev() {
            if let Some(filter) = stage.filter.as_mut() {
                if filter.direction() == Direction::Outbound {
                    bytes = filter.process(&bytes)?;
                }
            }
        }
        Ok(bytes)
    }

    fn inbound(&mut self, bytes: &[u8], only_fresh: bool) -> io::Result<Vec<u8>> {
        let mut bytes = bytes.to_vec();
        for stage in self.stages.iter_mut() {
            if only_fresh && !stage.fresh {
                continue;
            }
            stage.fresh = false;
            if let Some(filter) = stage.filter.as_mut() {
                if filter.direction() == Direction::Inbound {
                    bytes = filter.process(&bytes)?;
                }
            }
        }
        Ok(bytes)
    }

    fn has_fresh(&self) -> bool {
        self.stages.iter().any(|s| s.fresh)
    }
}

enum Op {
    Write(Vec<u8>, WriteSignal),
    Close(CloseSignal),
}

struct Shared {
    chain: Mutex<FilterChain>,
    active: AtomicBool,
}

impl Shared {
    fn chain(&self) -> MutexGuard<'_, FilterChain> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The session's handle on its event loop.
pub struct TcpTransport {
    shared: Arc<Shared>,
    ops: Sender<Op>,
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: Vec<u8>) -> WriteSignal {
        if !self.is_active() {
            return ImapFuture::failed(Error::OperationProhibitedOnClosedChannel);
        }
        // Filtering and queueing under one lock keeps compressed output in write order.
        let mut chain = self.shared.chain();
        let bytes = match chain.outbound(bytes) {
            Ok(bytes) => bytes,
            Err(err) => return ImapFuture::failed(Error::ChannelException(err.to_string())),
        };
        let signal = ImapFuture::new();
        if self.ops.send(Op::Write(bytes, signal.clone())).is_err() {
            return ImapFuture::failed(Error::ChannelDisconnected);
        }
        signal
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> CloseSignal {
        self.shared.active.store(false, Ordering::SeqCst);
        let signal = ImapFuture::new();
        if self.ops.send(Op::Close(signal.clone())).is_err() {
            // the loop already exited, taking the socket with it
            return ImapFuture::completed(());
        }
        signal
    }

    fn insert_filter(
        &mut self,
        position: FilterPosition,
        name: &'static str,
        filter: Box<dyn StreamFilter>,
    ) -> Result<()> {
        self.shared.chain().insert(position, name, filter)
    }

    fn has_filter(&self, name: &str) -> bool {
        self.shared.chain().contains(name)
    }
}

/// Event loop settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopConfig {
    pub tls: bool,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub debug: DebugMode,
}

/// Why the event loop stopped.
#[derive(Debug)]
enum Exit {
    /// The session asked to close.
    Closed,
    /// The server closed the connection.
    Eof,
    /// Every session handle was dropped.
    Dropped,
    /// Reading from the socket failed.
    ReadFailed(io::Error),
    /// Bytes arrived that could not be turned into records.
    Broken(Error),
}

struct EventLoop {
    id: u64,
    stream: Connection,
    decoder: ResponseDecoder,
    shared: Arc<Shared>,
    ops: Receiver<Op>,
    session: WeakSession,
    idle_timeout: Duration,
    last_activity: Instant,
    closing: Vec<CloseSignal>,
}

/// Binds a session to `stream` and starts its event loop.
///
/// `decoder` may already hold bytes received after the greeting.
pub(crate) fn spawn(
    stream: Connection,
    decoder: ResponseDecoder,
    config: LoopConfig,
) -> Result<ImapAsyncSession> {
    let (session, event_loop) = bind(stream, decoder, config)?;
    thread::Builder::new()
        .name(format!("imap-session-{}", session.id()))
        .spawn(move || event_loop.run())?;
    Ok(session)
}

fn bind(
    mut stream: Connection,
    decoder: ResponseDecoder,
    config: LoopConfig,
) -> Result<(ImapAsyncSession, EventLoop)> {
    stream.set_read_timeout(Some(config.poll_interval))?;
    let shared = Arc::new(Shared {
        chain: Mutex::new(FilterChain::new(config.tls)),
        active: AtomicBool::new(true),
    });
    let (tx, rx) = mpsc::channel();
    let transport = TcpTransport {
        shared: Arc::clone(&shared),
        ops: tx,
    };
    let session = ImapAsyncSession::new(Box::new(transport), config.debug);
    let event_loop = EventLoop {
        id: session.id(),
        stream,
        decoder,
        shared,
        ops: rx,
        session: session.downgrade(),
        idle_timeout: config.idle_timeout,
        last_activity: Instant::now(),
        closing: Vec::new(),
    };
    Ok((session, event_loop))
}

impl EventLoop {
    fn run(mut self) {
        debug!(session = self.id, "event loop started");
        let exit = self.poll();
        self.finish(exit);
    }

    fn poll(&mut self) -> Exit {
        // records that arrived together with the greeting
        match self.dispatch() {
            Ok(Some(exit)) => return exit,
            Ok(None) => {}
            Err(err) => return Exit::Broken(err),
        }
        let mut buf = vec![0; READ_BUFFER_SIZE];
        loop {
            if let Some(exit) = self.drain_ops() {
                return exit;
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return Exit::Eof,
                Ok(n) => {
                    self.last_activity = Instant::now();
                    trace!(session = self.id, bytes = n, "read");
                    match self.receive(&buf[..n]) {
                        Ok(Some(exit)) => return exit,
                        Ok(None) => {}
                        Err(err) => return Exit::Broken(err),
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if let Some(exit) = self.check_idle() {
                        return exit;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Exit::ReadFailed(e),
            }
        }
    }

    fn receive(&mut self, bytes: &[u8]) -> Result<Option<Exit>> {
        let bytes = self
            .shared
            .chain()
            .inbound(bytes, false)
            .map_err(|e| Error::ChannelException(e.to_string()))?;
        self.decoder.feed(&bytes);
        self.dispatch()
    }

    /// Hands buffered records to the session, one at a time.
    fn dispatch(&mut self) -> Result<Option<Exit>> {
        while let Some(record) = self.decoder.decode()? {
            let session = match self.session.upgrade() {
                Some(session) => session,
                None => return Ok(Some(Exit::Dropped)),
            };
            session.on_response_record(record);
            if let Some(exit) = self.drain_ops() {
                return Ok(Some(exit));
            }
            self.refilter_buffered()?;
        }
        Ok(None)
    }

    /// Passes bytes buffered before a filter was inserted through that filter.
    fn refilter_buffered(&mut self) -> Result<()> {
        let mut chain = self.shared.chain();
        if !chain.has_fresh() {
            return Ok(());
        }
        let buffered = self.decoder.take_buffered();
        let filtered = chain
            .inbound(&buffered, true)
            .map_err(|e| Error::ChannelException(e.to_string()))?;
        self.decoder.feed(&filtered);
        Ok(())
    }

    fn drain_ops(&mut self) -> Option<Exit> {
        loop {
            match self.ops.try_recv() {
                Ok(Op::Write(bytes, signal)) => {
                    let written = self
                        .stream
                        .write_all(&bytes)
                        .and_then(|()| self.stream.flush());
                    match written {
                        Ok(()) => {
                            self.last_activity = Instant::now();
                            trace!(session = self.id, bytes = bytes.len(), "wrote");
                            signal.done(());
                        }
                        Err(err) => {
                            signal.done_with_error(Error::from(err));
                        }
                    }
                }
                Ok(Op::Close(signal)) => {
                    self.closing.push(signal);
                    return Some(Exit::Closed);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Exit::Dropped),
            }
        }
    }

    fn check_idle(&mut self) -> Option<Exit> {
        if self.last_activity.elapsed() < self.idle_timeout {
            return None;
        }
        self.last_activity = Instant::now();
        match self.session.upgrade() {
            Some(session) => {
                session.handle_idle_event();
                None
            }
            None => Some(Exit::Dropped),
        }
    }

    fn finish(mut self, exit: Exit) {
        self.shared.active.store(false, Ordering::SeqCst);
        let session = self.session.upgrade();
        match exit {
            Exit::Closed => debug!(session = self.id, "closing connection"),
            Exit::Eof => debug!(session = self.id, "server closed the connection"),
            Exit::Dropped => debug!(session = self.id, "session dropped"),
            Exit::ReadFailed(err) => warn!(session = self.id, %err, "read failed"),
            Exit::Broken(err) => {
                if let Some(session) = &session {
                    session.handle_exception(err);
                }
            }
        }
        if let Err(err) = self.stream.shutdown() {
            trace!(session = self.id, %err, "shutdown failed");
        }
        if let Some(session) = &session {
            session.handle_channel_closed();
        }
        // whatever was queued after the loop stopped
        while let Ok(op) = self.ops.try_recv() {
            match op {
                Op::Write(_, signal) => {
                    signal.done_with_error(Error::ChannelDisconnected);
                }
                Op::Close(signal) => self.closing.push(signal),
            }
        }
        for signal in self.closing.drain(..) {
            signal.done(());
        }
        debug!(session = self.id, "event loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::shared;
    use crate::commands::NoopCommand;
    use crate::compress::{Deflater, Inflater};
    use crate::transport::{DEFLATER_FILTER, INFLATER_FILTER};

    fn names(chain: &FilterChain) -> Vec<&'static str> {
        chain.stages.iter().map(|s| s.name).collect()
    }

    #[test]
    fn insert_positions() {
        let mut chain = FilterChain::new(true);
        chain
            .insert(FilterPosition::After(TLS_FILTER), INFLATER_FILTER, Box::new(Inflater::new()))
            .unwrap();
        chain
            .insert(FilterPosition::After(TLS_FILTER), DEFLATER_FILTER, Box::new(Deflater::new()))
            .unwrap();
        assert_eq!(names(&chain), vec![TLS_FILTER, DEFLATER_FILTER, INFLATER_FILTER]);

        let mut plain = FilterChain::new(false);
        plain
            .insert(FilterPosition::First, INFLATER_FILTER, Box::new(Inflater::new()))
            .unwrap();
        assert_eq!(names(&plain), vec![INFLATER_FILTER]);
    }

    #[test]
    fn insert_rejects_unknown_anchor_and_duplicates() {
        let mut chain = FilterChain::new(false);
        assert!(chain
            .insert(FilterPosition::After(TLS_FILTER), INFLATER_FILTER, Box::new(Inflater::new()))
            .is_err());
        chain
            .insert(FilterPosition::First, INFLATER_FILTER, Box::new(Inflater::new()))
            .unwrap();
        assert!(chain
            .insert(FilterPosition::First, INFLATER_FILTER, Box::new(Inflater::new()))
            .is_err());
    }

    #[test]
    fn compressed_chain_roundtrip() {
        let mut client = FilterChain::new(false);
        client
            .insert(FilterPosition::First, INFLATER_FILTER, Box::new(Inflater::new()))
            .unwrap();
        client
            .insert(FilterPosition::First, DEFLATER_FILTER, Box::new(Deflater::new()))
            .unwrap();
        let wire = client.outbound(b"a2 NOOP\r\n".to_vec()).unwrap();
        assert_ne!(wire, b"a2 NOOP\r\n".to_vec());

        let mut server = Inflater::new();
        assert_eq!(server.process(&wire).unwrap(), b"a2 NOOP\r\n".to_vec());

        let mut server = Deflater::new();
        let reply = server.process(b"a2 OK done\r\n").unwrap();
        assert_eq!(client.inbound(&reply, false).unwrap(), b"a2 OK done\r\n".to_vec());
    }

    #[test]
    fn fresh_filters_apply_once() {
        let mut chain = FilterChain::new(false);
        chain
            .insert(FilterPosition::First, INFLATER_FILTER, Box::new(Inflater::new()))
            .unwrap();
        assert!(chain.has_fresh());
        let compressed = Deflater::new().process(b"* OK\r\n").unwrap();
        assert_eq!(chain.inbound(&compressed, true).unwrap(), b"* OK\r\n".to_vec());
        assert!(!chain.has_fresh());
        assert_eq!(chain.inbound(b"", true).unwrap(), Vec::<u8>::new());
    }

    /// Stream that records writes and never has anything to read.
    #[derive(Clone, Default)]
    struct Memory {
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Memory {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for Memory {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SetReadTimeout for Memory {
        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn bind_memory() -> (Memory, ImapAsyncSession, EventLoop) {
        let memory = Memory::default();
        let (session, event_loop) = bind(
            Box::new(memory.clone()),
            ResponseDecoder::default(),
            LoopConfig {
                tls: false,
                poll_interval: Duration::from_millis(1),
                idle_timeout: Duration::from_secs(60),
                debug: DebugMode::DebugOff,
            },
        )
        .unwrap();
        (memory, session, event_loop)
    }

    #[test]
    fn bytes_behind_compression_ok_are_inflated() {
        let (memory, session, mut event_loop) = bind_memory();
        let compress = session.start_compression().unwrap();
        assert!(event_loop.drain_ops().is_none());
        assert_eq!(&memory.written.lock().unwrap()[..], b"a1 COMPRESS DEFLATE\r\n");

        // the server starts compressing right behind its OK, in the same segment
        let mut server = Deflater::new();
        let mut segment = b"a1 OK DEFLATE active\r\n".to_vec();
        segment.extend(server.process(b"* 5 EXI").unwrap());
        assert!(event_loop.receive(&segment).unwrap().is_none());
        assert!(compress.get().unwrap()[0].is_ok());

        memory.written.lock().unwrap().clear();
        let noop = session.execute(shared(NoopCommand::new())).unwrap();
        assert!(event_loop.drain_ops().is_none());
        let sent = memory.written.lock().unwrap().clone();
        assert_eq!(Inflater::new().process(&sent).unwrap(), b"a2 NOOP\r\n".to_vec());

        let segment = server.process(b"STS\r\na2 OK NOOP completed\r\n").unwrap();
        assert!(event_loop.receive(&segment).unwrap().is_none());
        let responses = noop.get().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].text(), "* 5 EXISTS");
        assert!(responses[1].is_ok());
    }

    #[test]
    fn close_stops_loop() {
        let (_memory, session, mut event_loop) = bind_memory();
        let closed = session.close();
        assert!(matches!(event_loop.drain_ops(), Some(Exit::Closed)));
        event_loop.finish(Exit::Closed);
        assert!(closed.get().unwrap());
        assert!(session.is_closed());
    }

    #[test]
    fn framing_error_fails_pending_command() {
        let (_memory, session, mut event_loop) = bind_memory();
        let noop = session.execute(shared(NoopCommand::new())).unwrap();
        assert!(event_loop.drain_ops().is_none());
        let err = event_loop.receive(b"garbage\r\n").unwrap_err();
        event_loop.finish(Exit::Broken(err));
        assert!(matches!(noop.get(), Err(Error::ChannelException(_))));
        assert!(session.is_closed());
    }

    #[test]
    fn dropped_session_stops_loop() {
        let (_memory, session, mut event_loop) = bind_memory();
        drop(session);
        assert!(matches!(event_loop.drain_ops(), Some(Exit::Dropped)));
    }
}
