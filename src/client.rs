use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

#[cfg(feature = "native-tls")]
use native_tls::TlsConnector;
use tracing::{debug, warn};

use crate::channel::{self, LoopConfig};
use crate::codec::{ResponseDecoder, DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_LITERAL_SIZE};
use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::future::ImapFuture;
use crate::response::ImapResponse;
use crate::session::{DebugMode, ImapAsyncSession};

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Security {
    /// Plain TCP.
    None,
    /// TLS from the first byte (usually port 993).
    #[default]
    Tls,
}

/// Where and how to open a session.
///
/// ```no_run
/// # use imap_engine::{ImapAsyncClient, SessionConfig};
/// # fn main() -> Result<(), imap_engine::Error> {
/// let mut config = SessionConfig::new("imap.example.com", 993);
/// config.idle_timeout(std::time::Duration::from_secs(600));
/// let session = ImapAsyncClient::new().create_session(&config).get()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    /// Bounds connecting, the TLS handshake and waiting for the greeting.
    pub connect_timeout: Duration,
    /// Inactivity after which a pending command fails with [`Error::ChannelTimeout`].
    pub idle_timeout: Duration,
    /// How long the event loop blocks in a read before looking at queued writes.
    pub poll_interval: Duration,
    pub max_line_length: usize,
    /// Records announcing more literal octets than this fail with [`Error::Framing`].
    pub max_literal_size: usize,
    pub debug: DebugMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            host: "localhost".to_string(),
            port: 993,
            security: Security::Tls,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(29 * 60),
            poll_interval: Duration::from_millis(20),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_literal_size: DEFAULT_MAX_LITERAL_SIZE,
            debug: DebugMode::DebugOff,
        }
    }
}

impl SessionConfig {
    /// Make a new `SessionConfig` using the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        SessionConfig {
            host: host.into(),
            port,
            ..SessionConfig::default()
        }
    }

    pub fn security(&mut self, security: Security) -> &mut Self {
        self.security = security;
        self
    }

    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_line_length(&mut self, length: usize) -> &mut Self {
        self.max_line_length = length;
        self
    }

    pub fn max_literal_size(&mut self, size: usize) -> &mut Self {
        self.max_literal_size = size;
        self
    }

    pub fn debug(&mut self, debug: DebugMode) -> &mut Self {
        self.debug = debug;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidInput("host must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opens sessions.
#[derive(Debug, Clone, Default)]
pub struct ImapAsyncClient {
    #[cfg(feature = "native-tls")]
    tls: Option<TlsConnector>,
}

impl ImapAsyncClient {
    pub fn new() -> Self {
        ImapAsyncClient::default()
    }

    /// Use `connector` for TLS sessions instead of one with the platform defaults.
    #[cfg(feature = "native-tls")]
    pub fn with_tls_connector(connector: TlsConnector) -> Self {
        ImapAsyncClient {
            tls: Some(connector),
        }
    }

    /// Connects, waits for the server greeting and starts the session's event loop.
    ///
    /// Connecting happens on a background thread; the returned future resolves with the ready
    /// session or with the reason it could not be opened.
    pub fn create_session(&self, config: &SessionConfig) -> ImapFuture<ImapAsyncSession> {
        if let Err(err) = config.validate() {
            return ImapFuture::failed(err);
        }
        let future = ImapFuture::new();
        let result = {
            let future = future.clone();
            let client = self.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("imap-connect".to_string())
                .spawn(move || {
                    let session = client.open(&config);
                    if let Err(err) = &session {
                        warn!(host = %config.host, port = config.port, %err, "cannot open session");
                    }
                    future.resolve(session);
                })
        };
        if let Err(err) = result {
            future.done_with_error(Error::from(err));
        }
        future
    }

    fn open(&self, config: &SessionConfig) -> Result<ImapAsyncSession> {
        let tcp = connect_tcp(config)?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(config.connect_timeout))?;
        tcp.set_write_timeout(Some(config.connect_timeout))?;
        let mut stream = self.secure(config, tcp)?;

        let mut decoder = ResponseDecoder::new(config.max_line_length)
            .with_max_literal_size(config.max_literal_size);
        let greeting = read_greeting(&mut stream, &mut decoder)?;
        check_greeting(&greeting)?;
        if config.debug.is_on() {
            debug!(host = %config.host, "S: {}", greeting.text());
        }

        let session = channel::spawn(
            stream,
            decoder,
            LoopConfig {
                tls: config.security == Security::Tls,
                poll_interval: config.poll_interval,
                idle_timeout: config.idle_timeout,
                debug: config.debug,
            },
        )?;
        debug!(session = session.id(), host = %config.host, port = config.port, "session opened");
        Ok(session)
    }

    #[cfg(feature = "native-tls")]
    fn secure(&self, config: &SessionConfig, tcp: TcpStream) -> Result<Connection> {
        match config.security {
            Security::None => Ok(Box::new(tcp)),
            Security::Tls => {
                let connector = match &self.tls {
                    Some(connector) => connector.clone(),
                    None => TlsConnector::builder().build()?,
                };
                let tls = connector
                    .connect(&config.host, tcp)
                    .map_err(|e| Error::ConnectionFailed(format!("{}: {}", config.host, e)))?;
                Ok(Box::new(tls))
            }
        }
    }

    #[cfg(not(feature = "native-tls"))]
    fn secure(&self, config: &SessionConfig, tcp: TcpStream) -> Result<Connection> {
        match config.security {
            Security::None => Ok(Box::new(tcp)),
            Security::Tls => Err(Error::UnsupportedOperation(
                "TLS requires the native-tls feature",
            )),
        }
    }
}

fn connect_tcp(config: &SessionConfig) -> Result<TcpStream> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| Error::ConnectionFailed(format!("{}: {}", config.host, e)))?;
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => last = Some(err),
        }
    }
    Err(Error::ConnectionFailed(match last {
        Some(err) => format!("{}:{}: {}", config.host, config.port, err),
        None => format!("{}:{}: no address", config.host, config.port),
    }))
}

fn read_greeting(stream: &mut Connection, decoder: &mut ResponseDecoder) -> Result<ImapResponse> {
    let mut buf = [0; 1024];
    loop {
        if let Some(record) = decoder.decode()? {
            return Ok(record);
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(Error::ConnectionFailed(
                "connection closed before greeting".to_string(),
            ));
        }
        decoder.feed(&buf[..n]);
    }
}

fn check_greeting(greeting: &ImapResponse) -> Result<()> {
    if greeting.is_untagged() {
        let rest = greeting.rest();
        let status = rest.split(' ').next().unwrap_or_default();
        if status.eq_ignore_ascii_case("OK") || status.eq_ignore_ascii_case("PREAUTH") {
            return Ok(());
        }
    }
    Err(Error::GreetingRejected(greeting.text().into_owned()))
}
