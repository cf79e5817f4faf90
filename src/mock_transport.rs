use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::future::ImapFuture;
use crate::transport::{
    CloseSignal, FilterPosition, StreamFilter, Transport, WriteSignal, TLS_FILTER,
};

#[derive(Default)]
struct MockState {
    written: Vec<Vec<u8>>,
    filters: Vec<&'static str>,
    held_writes: Vec<WriteSignal>,
    inactive: bool,
    hold_writes: bool,
    fail_writes: bool,
    fail_close: bool,
    hold_close: Option<CloseSignal>,
    closes: usize,
}

/// Transport recording everything the session asks of it.
///
/// Clones share their state, so a test keeps one clone to inspect what the session did with the
/// other.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    pub fn with_tls(self) -> MockTransport {
        self.lock().filters.push(TLS_FILTER);
        self
    }

    pub fn inactive(self) -> MockTransport {
        self.lock().inactive = true;
        self
    }

    /// Leaves write signals pending until `release_writes` is called.
    pub fn holding_writes(self) -> MockTransport {
        self.lock().hold_writes = true;
        self
    }

    pub fn failing_writes(self) -> MockTransport {
        self.lock().fail_writes = true;
        self
    }

    pub fn failing_close(self) -> MockTransport {
        self.lock().fail_close = true;
        self
    }

    /// Leaves the close signal pending until `release_close` is called.
    pub fn holding_close(self) -> MockTransport {
        self.lock().hold_close = Some(ImapFuture::new());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn written(&self) -> Vec<String> {
        self.lock()
            .written
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn filters(&self) -> Vec<&'static str> {
        self.lock().filters.clone()
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn release_writes(&self) {
        let held: Vec<_> = self.lock().held_writes.drain(..).collect();
        for signal in held {
            signal.done(());
        }
    }

    pub fn release_close(&self) {
        let signal = self.lock().hold_close.take();
        if let Some(signal) = signal {
            signal.done(());
        }
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: Vec<u8>) -> WriteSignal {
        let mut state = self.lock();
        state.written.push(bytes);
        if state.fail_writes {
            ImapFuture::failed(Error::ChannelException("connection reset".to_string()))
        } else if state.hold_writes {
            let signal = ImapFuture::new();
            state.held_writes.push(signal.clone());
            signal
        } else {
            ImapFuture::completed(())
        }
    }

    fn is_active(&self) -> bool {
        !self.lock().inactive
    }

    fn close(&mut self) -> CloseSignal {
        let mut state = self.lock();
        state.closes += 1;
        if state.fail_close {
            return ImapFuture::failed(Error::ChannelException("close failed".to_string()));
        }
        if let Some(signal) = &state.hold_close {
            return signal.clone();
        }
        state.inactive = true;
        ImapFuture::completed(())
    }

    fn insert_filter(
        &mut self,
        position: FilterPosition,
        name: &'static str,
        _filter: Box<dyn StreamFilter>,
    ) -> Result<()> {
        let mut state = self.lock();
        let index = match position {
            FilterPosition::First => 0,
            FilterPosition::After(after) => {
                match state.filters.iter().position(|&f| f == after) {
                    Some(i) => i + 1,
                    None => return Err(Error::UnsupportedOperation("no such filter")),
                }
            }
        };
        state.filters.insert(index, name);
        Ok(())
    }

    fn has_filter(&self, name: &str) -> bool {
        self.lock().filters.iter().any(|&f| f == name)
    }
}
