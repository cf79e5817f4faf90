//! The session engine: one connection, at most one command in flight.
//!
//! An [`ImapAsyncSession`] is driven from two sides. Callers submit commands through
//! [`execute`](ImapAsyncSession::execute), [`terminate`](ImapAsyncSession::terminate) and
//! [`close`](ImapAsyncSession::close); the transport reports what happens on the wire through
//! [`on_response_record`](ImapAsyncSession::on_response_record),
//! [`handle_idle_event`](ImapAsyncSession::handle_idle_event),
//! [`handle_exception`](ImapAsyncSession::handle_exception) and
//! [`handle_channel_closed`](ImapAsyncSession::handle_channel_closed).
//!
//! Both sides go through one mutex. Each transition computes its [`Effects`] with the lock held
//! and applies them after releasing it, so callbacks registered on the returned futures may call
//! back into the session.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace, warn};

use crate::command::{self, CommandRef, ImapCommand};
use crate::commands::CompressCommand;
use crate::compress::{Deflater, Inflater};
use crate::error::{Error, Result};
use crate::future::ImapFuture;
use crate::response::{ImapResponse, ResponseKind, Status};
use crate::transport::{
    CloseSignal, FilterPosition, Transport, WriteSignal, DEFLATER_FILTER, INFLATER_FILTER,
    TLS_FILTER,
};

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u64 = 0;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Every record received for a command, in receipt order, tagged completion last.
pub type ImapResponses = Vec<ImapResponse>;

/// Whether the session logs the traffic it handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DebugMode {
    #[default]
    DebugOff,
    DebugOn,
}

impl DebugMode {
    pub fn is_on(self) -> bool {
        self == DebugMode::DebugOn
    }
}

/// Where the pending command is in its exchange with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bytes were handed to the transport and have not reached the socket yet.
    Writing,
    /// Everything was written; waiting for the server.
    Awaiting,
}

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, nothing in flight: commands are admitted.
    Idle,
    /// Open with a pending command.
    Busy(Phase),
    /// The connection is gone.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
}

struct PendingCommand {
    tag: String,
    command: CommandRef,
    responses: ImapResponses,
    /// The future handed out last comes last; earlier ones were superseded by `terminate`.
    futures: Vec<ImapFuture<ImapResponses>>,
    phase: Phase,
    /// Set once the termination line was sent.
    terminated: bool,
}

/// Side effects of a transition, applied once the session lock is released.
#[derive(Default)]
#[must_use]
struct Effects {
    completion: Option<(Vec<ImapFuture<ImapResponses>>, Result<ImapResponses>)>,
    watch_write: Option<(u64, WriteSignal)>,
    close_result: Option<(ImapFuture<bool>, Result<bool>)>,
    close: bool,
}

impl Effects {
    fn and_close(mut self) -> Self {
        self.close = true;
        self
    }
}

struct Engine {
    id: u64,
    lifecycle: Lifecycle,
    transport: Option<Box<dyn Transport>>,
    debug: DebugMode,
    pending: Option<PendingCommand>,
    tag: u64,
    /// Sequence number of the last write; signals of older writes are ignored.
    writes: u64,
    closing: Option<ImapFuture<bool>>,
}

impl Engine {
    fn check_admission(&self) -> Result<()> {
        let active = self.lifecycle == Lifecycle::Open
            && self.transport.as_ref().map_or(false, |t| t.is_active());
        if !active {
            return Err(Error::OperationProhibitedOnClosedChannel);
        }
        if self.pending.is_some() {
            return Err(Error::CommandNotAllowed);
        }
        Ok(())
    }

    fn next_tag(&mut self) -> String {
        self.tag = self.tag.wrapping_add(1);
        format!("{}{}", TAG_PREFIX, self.tag)
    }

    fn write(&mut self, bytes: Vec<u8>) -> Result<(u64, WriteSignal)> {
        match self.transport.as_mut() {
            Some(transport) => {
                let signal = transport.write(bytes);
                self.writes += 1;
                Ok((self.writes, signal))
            }
            None => Err(Error::OperationProhibitedOnClosedChannel),
        }
    }

    /// Removes the pending command, releasing what its command holds.
    fn take_pending(&mut self) -> Option<PendingCommand> {
        let pending = self.pending.take()?;
        command::lock(&pending.command).cleanup();
        Some(pending)
    }

    fn fail_pending(&mut self, err: Error) -> Effects {
        match self.take_pending() {
            Some(pending) => {
                debug!(session = self.id, tag = %pending.tag, %err, "command failed");
                Effects {
                    completion: Some((pending.futures, Err(err))),
                    ..Effects::default()
                }
            }
            None => Effects::default(),
        }
    }

    fn complete_pending(&mut self) -> Effects {
        match self.take_pending() {
            Some(pending) => Effects {
                completion: Some((pending.futures, Ok(pending.responses))),
                ..Effects::default()
            },
            None => Effects::default(),
        }
    }

    /// Writes more bytes for the pending command.
    fn write_pending(&mut self, bytes: Vec<u8>) -> Effects {
        match self.write(bytes) {
            Ok(write) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.phase = Phase::Writing;
                }
                Effects {
                    watch_write: Some(write),
                    ..Effects::default()
                }
            }
            Err(err) => self.fail_pending(err),
        }
    }

    fn send_command_line(&mut self) -> Effects {
        let (tag, command) = match &self.pending {
            Some(pending) => (pending.tag.clone(), Arc::clone(&pending.command)),
            None => return Effects::default(),
        };
        let (line, debug_line) = {
            let mut command = command::lock(&command);
            (command.command_line(), command.debug_line())
        };
        let line = match line {
            Ok(line) => line,
            Err(err) => return self.fail_pending(err),
        };
        if self.debug.is_on() {
            debug!(session = self.id, "C: {} {}", tag, debug_line);
        }
        let mut bytes = Vec::with_capacity(tag.len() + 1 + line.len());
        bytes.extend_from_slice(tag.as_bytes());
        bytes.push(b' ');
        bytes.extend_from_slice(&line);
        self.write_pending(bytes)
    }

    fn handle_record(&mut self, record: ImapResponse) -> Effects {
        let command = match self.pending.as_mut() {
            Some(pending) => {
                if record.is_tagged() && record.tag() != Some(pending.tag.as_str()) {
                    // e.g. the late completion of a command that already timed out
                    warn!(
                        session = self.id,
                        expected = %pending.tag,
                        got = ?record.tag(),
                        "dropping tagged response for another command"
                    );
                    return Effects::default();
                }
                pending.responses.push(record.clone());
                Arc::clone(&pending.command)
            }
            None => return Effects::default(),
        };

        match record.kind() {
            ResponseKind::Untagged => {
                let queue = command::lock(&command).streaming_queue();
                if let Some(queue) = queue {
                    // a dropped receiver only means nobody listens anymore
                    let _ = queue.send(record);
                }
                Effects::default()
            }
            ResponseKind::Continuation => {
                let next = command::lock(&command).next_line_after_continuation(&record);
                match next {
                    Ok(Some(bytes)) => {
                        if self.debug.is_on() {
                            debug!(session = self.id, "C: <{} bytes of continuation data>", bytes.len());
                        }
                        self.write_pending(bytes)
                    }
                    Ok(None) => Effects::default(),
                    // The server may still expect data we will never send.
                    Err(err) => self.fail_pending(err).and_close(),
                }
            }
            ResponseKind::Tagged(status) => {
                let compress =
                    status == Status::Ok && command::lock(&command).is_compression_requested();
                if compress {
                    if let Err(err) = self.insert_compression_filters() {
                        return self.fail_pending(err).and_close();
                    }
                }
                self.complete_pending()
            }
        }
    }

    /// Splices the DEFLATE filters in on the plaintext side of the connection.
    fn insert_compression_filters(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::OperationProhibitedOnClosedChannel)?;
        let position = if transport.has_filter(TLS_FILTER) {
            FilterPosition::After(TLS_FILTER)
        } else {
            FilterPosition::First
        };
        transport.insert_filter(position.clone(), INFLATER_FILTER, Box::new(Inflater::new()))?;
        transport.insert_filter(position, DEFLATER_FILTER, Box::new(Deflater::new()))?;
        debug!(session = self.id, "compression enabled");
        Ok(())
    }

    fn mark_closed(&mut self) -> Effects {
        let mut effects = self.fail_pending(Error::ChannelDisconnected);
        self.lifecycle = Lifecycle::Closed;
        self.transport = None;
        if let Some(closing) = self.closing.take() {
            effects.close_result = Some((closing, Ok(true)));
        }
        effects
    }
}

/// A session bound to one live connection.
///
/// Handles are cheap to clone and may be shared between threads.
#[derive(Clone)]
pub struct ImapAsyncSession {
    id: u64,
    engine: Arc<Mutex<Engine>>,
}

impl std::fmt::Debug for ImapAsyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapAsyncSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl ImapAsyncSession {
    /// Binds a session to a live transport.
    pub fn new(transport: Box<dyn Transport>, debug: DebugMode) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        ImapAsyncSession {
            id,
            engine: Arc::new(Mutex::new(Engine {
                id,
                lifecycle: Lifecycle::Open,
                transport: Some(transport),
                debug,
                pending: None,
                tag: INITIAL_TAG,
                writes: 0,
                closing: None,
            })),
        }
    }

    fn from_weak(id: u64, engine: &Weak<Mutex<Engine>>) -> Option<Self> {
        engine.upgrade().map(|engine| ImapAsyncSession { id, engine })
    }

    /// A handle that does not keep the session alive.
    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession {
            id: self.id,
            engine: Arc::downgrade(&self.engine),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opaque identifier, also used as the `session` field in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        let engine = self.lock();
        match (engine.lifecycle, &engine.pending) {
            (Lifecycle::Closed, _) => SessionState::Closed,
            (Lifecycle::Open, None) => SessionState::Idle,
            (Lifecycle::Open, Some(pending)) => SessionState::Busy(pending.phase),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn set_debug_mode(&self, mode: DebugMode) {
        self.lock().debug = mode;
    }

    pub fn is_debug_enabled(&self) -> bool {
        self.lock().debug.is_on()
    }

    /// Sends `command` and returns a future resolving with every record it received.
    ///
    /// Fails right away, writing nothing, if the channel is inactive
    /// ([`Error::OperationProhibitedOnClosedChannel`]) or another command is pending
    /// ([`Error::CommandNotAllowed`]). Everything else, including the command refusing to
    /// produce its line, is reported through the returned future.
    ///
    /// A tagged `NO` or `BAD` is not a failure of the future: the records are returned and
    /// interpreting them is up to the caller.
    pub fn execute<C>(&self, command: Arc<Mutex<C>>) -> Result<ImapFuture<ImapResponses>>
    where
        C: ImapCommand + 'static,
    {
        self.execute_ref(command)
    }

    /// Like [`execute`](ImapAsyncSession::execute), for an already type-erased command.
    pub fn execute_ref(&self, command: CommandRef) -> Result<ImapFuture<ImapResponses>> {
        let future = ImapFuture::new();
        let effects = {
            let mut engine = self.lock();
            engine.check_admission()?;
            let tag = engine.next_tag();
            engine.pending = Some(PendingCommand {
                tag,
                command,
                responses: Vec::new(),
                futures: vec![future.clone()],
                phase: Phase::Writing,
                terminated: false,
            });
            engine.send_command_line()
        };
        self.apply(effects);
        Ok(future)
    }

    /// Ends a streaming command such as IDLE.
    ///
    /// `command` must be the pending command, with everything written so far on the wire. Its
    /// termination line is sent and a new future is returned that resolves on the next tagged
    /// record with every record received since the command started. The future returned by
    /// `execute` resolves with the same outcome.
    pub fn terminate<C>(&self, command: &Arc<Mutex<C>>) -> Result<ImapFuture<ImapResponses>>
    where
        C: ImapCommand + 'static,
    {
        let future = ImapFuture::new();
        let effects = {
            let mut engine = self.lock();
            let id = engine.id;
            let debug = engine.debug;
            let pending = engine
                .pending
                .as_mut()
                .filter(|p| ptr::addr_eq(Arc::as_ptr(&p.command), Arc::as_ptr(command)))
                .filter(|p| p.phase == Phase::Awaiting && !p.terminated)
                .ok_or(Error::CommandNotAllowed)?;
            let line = command::lock(&pending.command).terminate_line()?;
            pending.terminated = true;
            pending.futures.push(future.clone());
            if debug.is_on() {
                debug!(session = id, "C: {}", String::from_utf8_lossy(&line).trim_end());
            }
            engine.write_pending(line)
        };
        self.apply(effects);
        Ok(future)
    }

    /// Issues `COMPRESS DEFLATE`; on a tagged `OK` every later byte is compressed.
    pub fn start_compression(&self) -> Result<ImapFuture<ImapResponses>> {
        self.execute(command::shared(CompressCommand::new()))
    }

    /// Closes the connection.
    ///
    /// Resolves with `true` once the transport reports it closed, or with
    /// [`Error::ClosingConnectionFailed`]. Closing a closed session resolves immediately.
    pub fn close(&self) -> ImapFuture<bool> {
        let (future, signal) = {
            let mut engine = self.lock();
            if engine.lifecycle == Lifecycle::Closed {
                return ImapFuture::completed(true);
            }
            if let Some(closing) = &engine.closing {
                return closing.clone();
            }
            debug!(session = engine.id, "closing session");
            let future = ImapFuture::new();
            engine.closing = Some(future.clone());
            let signal = match engine.transport.as_mut() {
                Some(transport) => transport.close(),
                None => CloseSignal::completed(()),
            };
            (future, signal)
        };
        self.watch_close(signal);
        future
    }

    /// A record arrived from the server.
    pub fn on_response_record(&self, record: ImapResponse) {
        let effects = {
            let mut engine = self.lock();
            if engine.debug.is_on() {
                debug!(session = engine.id, "S: {}", record.text());
            }
            engine.handle_record(record)
        };
        self.apply(effects);
    }

    /// The connection saw no traffic for the configured inactivity period.
    pub fn handle_idle_event(&self) {
        let effects = {
            let mut engine = self.lock();
            trace!(session = engine.id, "channel idle");
            engine.fail_pending(Error::ChannelTimeout)
        };
        self.apply(effects);
    }

    /// The transport failed in a way that leaves the connection unusable.
    pub fn handle_exception(&self, err: Error) {
        let effects = {
            let mut engine = self.lock();
            warn!(session = engine.id, %err, "channel exception");
            engine
                .fail_pending(Error::ChannelException(err.to_string()))
                .and_close()
        };
        self.apply(effects);
    }

    /// The connection went away.
    pub fn handle_channel_closed(&self) {
        let effects = {
            let mut engine = self.lock();
            debug!(session = engine.id, "channel closed");
            engine.mark_closed()
        };
        self.apply(effects);
    }

    fn handle_write_done(&self, write: u64, result: Result<()>) {
        let effects = {
            let mut engine = self.lock();
            if write != engine.writes {
                return;
            }
            match result {
                Ok(()) => {
                    if let Some(pending) = engine.pending.as_mut() {
                        pending.phase = Phase::Awaiting;
                    }
                    Effects::default()
                }
                Err(err) => {
                    warn!(session = engine.id, %err, "write failed");
                    engine
                        .fail_pending(Error::ChannelException(err.to_string()))
                        .and_close()
                }
            }
        };
        self.apply(effects);
    }

    fn handle_close_done(&self, result: Result<()>) {
        let effects = {
            let mut engine = self.lock();
            match result {
                Ok(()) => engine.mark_closed(),
                Err(err) => {
                    warn!(session = engine.id, %err, "close failed");
                    let mut effects = Effects::default();
                    if let Some(closing) = engine.closing.take() {
                        effects.close_result =
                            Some((closing, Err(Error::ClosingConnectionFailed(err.to_string()))));
                    }
                    effects
                }
            }
        };
        self.apply(effects);
    }

    fn watch_write(&self, write: u64, signal: WriteSignal) {
        let (id, on_success, on_failure) = (
            self.id,
            Arc::downgrade(&self.engine),
            Arc::downgrade(&self.engine),
        );
        signal.on_success(move |_| {
            if let Some(session) = Self::from_weak(id, &on_success) {
                session.handle_write_done(write, Ok(()));
            }
        });
        signal.on_failure(move |err| {
            if let Some(session) = Self::from_weak(id, &on_failure) {
                session.handle_write_done(write, Err(err.clone()));
            }
        });
    }

    fn watch_close(&self, signal: CloseSignal) {
        let (id, on_success, on_failure) = (
            self.id,
            Arc::downgrade(&self.engine),
            Arc::downgrade(&self.engine),
        );
        signal.on_success(move |_| {
            if let Some(session) = Self::from_weak(id, &on_success) {
                session.handle_close_done(Ok(()));
            }
        });
        signal.on_failure(move |err| {
            if let Some(session) = Self::from_weak(id, &on_failure) {
                session.handle_close_done(Err(err.clone()));
            }
        });
    }

    fn apply(&self, effects: Effects) {
        if let Some((futures, result)) = effects.completion {
            for future in futures {
                future.resolve(result.clone());
            }
        }
        if let Some((future, result)) = effects.close_result {
            future.resolve(result);
        }
        if let Some((write, signal)) = effects.watch_write {
            self.watch_write(write, signal);
        }
        if effects.close {
            let _ = self.close();
        }
    }
}

/// Event sink held by a transport, gone once every [`ImapAsyncSession`] handle is dropped.
#[derive(Clone)]
pub(crate) struct WeakSession {
    id: u64,
    engine: Weak<Mutex<Engine>>,
}

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<ImapAsyncSession> {
        ImapAsyncSession::from_weak(self.id, &self.engine)
    }
}
