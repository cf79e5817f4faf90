use crate::command::ImapCommand;
use crate::error::{Error, Result};
use crate::response::ImapResponse;
use crate::utils::{iter_join, line, validate_str, CRLF};

use super::cleaned_up;

macro_rules! fixed_command {
    ($(#[$doc:meta])* $name:ident, $line:expr) => {
        $(#[$doc])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl $name {
            pub fn new() -> Self {
                $name
            }
        }

        impl ImapCommand for $name {
            fn command_type(&self) -> &'static str {
                $line
            }

            fn command_line(&mut self) -> Result<Vec<u8>> {
                Ok(line([$line]))
            }

            fn cleanup(&mut self) {}
        }
    };
}

fixed_command!(
    /// Requests a listing of capabilities that the server supports.
    CapabilityCommand,
    "CAPABILITY"
);
fixed_command!(
    /// Does nothing, which gives the server a chance to send pending updates.
    NoopCommand,
    "NOOP"
);
fixed_command!(
    /// Informs the server that the client is done with the connection.
    LogoutCommand,
    "LOGOUT"
);

/// Logs in with a user name and a password sent as quoted strings.
#[derive(Debug)]
pub struct LoginCommand {
    username: Option<String>,
    password: Option<String>,
}

impl LoginCommand {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        LoginCommand {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Whether the credentials are still held.
    pub fn holds_credentials(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

impl ImapCommand for LoginCommand {
    fn command_type(&self) -> &'static str {
        "LOGIN"
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(line([
                "LOGIN".to_string(),
                validate_str(username)?,
                validate_str(password)?,
            ])),
            _ => Err(cleaned_up()),
        }
    }

    fn debug_line(&self) -> String {
        match &self.username {
            Some(username) => format!("LOGIN FOR USER:{}", username),
            None => "LOGIN".to_string(),
        }
    }

    fn cleanup(&mut self) {
        self.username = None;
        self.password = None;
    }
}

/// Selects a mailbox, or examines it when opened read-only.
#[derive(Debug)]
pub struct SelectCommand {
    mailbox: Option<String>,
    read_only: bool,
}

impl SelectCommand {
    pub fn select(mailbox: impl Into<String>) -> Self {
        SelectCommand {
            mailbox: Some(mailbox.into()),
            read_only: false,
        }
    }

    /// Identical to `select`, but the mailbox is opened read-only.
    pub fn examine(mailbox: impl Into<String>) -> Self {
        SelectCommand {
            mailbox: Some(mailbox.into()),
            read_only: true,
        }
    }

    pub fn mailbox(&self) -> Option<&str> {
        self.mailbox.as_deref()
    }
}

impl ImapCommand for SelectCommand {
    fn command_type(&self) -> &'static str {
        if self.read_only {
            "EXAMINE"
        } else {
            "SELECT"
        }
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        let mailbox = self.mailbox.as_deref().ok_or_else(cleaned_up)?;
        Ok(line([
            self.command_type().to_string(),
            validate_str(mailbox)?,
        ]))
    }

    fn debug_line(&self) -> String {
        format!(
            "{} {}",
            self.command_type(),
            self.mailbox.as_deref().unwrap_or_default()
        )
    }

    fn cleanup(&mut self) {
        self.mailbox = None;
    }
}

/// Appends a message to a mailbox.
///
/// The message travels as a synchronizing literal: the command line announces its size and the
/// octets follow once the server sends a continuation.
#[derive(Debug)]
pub struct AppendCommand {
    mailbox: Option<String>,
    flags: Option<Vec<String>>,
    message: Option<Vec<u8>>,
}

impl AppendCommand {
    pub fn new(mailbox: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        AppendCommand {
            mailbox: Some(mailbox.into()),
            flags: Some(Vec::new()),
            message: Some(message.into()),
        }
    }

    /// Sets the flags stored with the message, e.g. `\Seen`.
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = Some(flags.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.mailbox.is_none() && self.flags.is_none() && self.message.is_none()
    }
}

impl ImapCommand for AppendCommand {
    fn command_type(&self) -> &'static str {
        "APPEND"
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        let (mailbox, flags, message) = match (&self.mailbox, &self.flags, &self.message) {
            (Some(mailbox), Some(flags), Some(message)) => (mailbox, flags, message),
            _ => return Err(cleaned_up()),
        };
        if let Some(flag) = flags
            .iter()
            .find(|f| f.is_empty() || f.contains(|c: char| c.is_whitespace() || c == ')' || c == '('))
        {
            return Err(Error::InvalidInput(format!("invalid flag {:?}", flag)));
        }
        let mut parts = vec!["APPEND".to_string(), validate_str(mailbox)?];
        if !flags.is_empty() {
            parts.push(format!("({})", iter_join(flags, " ")));
        }
        parts.push(format!("{{{}}}", message.len()));
        Ok(line(parts))
    }

    fn next_line_after_continuation(&mut self, _response: &ImapResponse) -> Result<Option<Vec<u8>>> {
        match self.message.take() {
            Some(mut message) => {
                message.extend_from_slice(CRLF);
                Ok(Some(message))
            }
            None => Err(Error::InvalidInput(
                "message literal was already sent".to_string(),
            )),
        }
    }

    fn debug_line(&self) -> String {
        format!(
            "APPEND {} ({} octets)",
            self.mailbox.as_deref().unwrap_or_default(),
            self.message.as_ref().map_or(0, Vec::len)
        )
    }

    fn cleanup(&mut self) {
        self.mailbox = None;
        self.flags = None;
        self.message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_record;

    #[test]
    fn fixed_commands() {
        assert_eq!(CapabilityCommand::new().command_line().unwrap(), b"CAPABILITY\r\n");
        assert_eq!(NoopCommand::new().command_line().unwrap(), b"NOOP\r\n");
        assert_eq!(LogoutCommand::new().command_line().unwrap(), b"LOGOUT\r\n");
        assert!(NoopCommand::new().terminate_line().is_err());
        assert!(!NoopCommand::new().is_compression_requested());
    }

    #[test]
    fn login() {
        let mut cmd = LoginCommand::new("username", "pass\"word");
        assert_eq!(
            cmd.command_line().unwrap(),
            b"LOGIN \"username\" \"pass\\\"word\"\r\n".to_vec()
        );
        assert_eq!(cmd.debug_line(), "LOGIN FOR USER:username");
        assert!(!cmd.debug_line().contains("pass"));
    }

    #[test]
    fn login_rejects_newline() {
        let mut cmd = LoginCommand::new("user\nname", "password");
        assert!(matches!(cmd.command_line(), Err(Error::Validate(_))));
    }

    #[test]
    fn login_cleanup_drops_credentials() {
        let mut cmd = LoginCommand::new("username", "password");
        cmd.cleanup();
        cmd.cleanup();
        assert!(!cmd.holds_credentials());
        assert!(matches!(cmd.command_line(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn select_and_examine() {
        assert_eq!(
            SelectCommand::select("INBOX").command_line().unwrap(),
            b"SELECT \"INBOX\"\r\n".to_vec()
        );
        assert_eq!(
            SelectCommand::examine("Sent Items").command_line().unwrap(),
            b"EXAMINE \"Sent Items\"\r\n".to_vec()
        );
    }

    #[test]
    fn append_sends_literal_after_continuation() {
        let mut cmd = AppendCommand::new("INBOX", "hello").with_flags(["\\Seen"]);
        assert_eq!(
            cmd.command_line().unwrap(),
            b"APPEND \"INBOX\" (\\Seen) {5}\r\n".to_vec()
        );
        let ready = parse_record(b"+ Ready for literal data\r\n".to_vec()).unwrap();
        assert_eq!(
            cmd.next_line_after_continuation(&ready).unwrap(),
            Some(b"hello\r\n".to_vec())
        );
        assert!(cmd.next_line_after_continuation(&ready).is_err());
        cmd.cleanup();
        assert!(cmd.is_cleaned_up());
    }

    #[test]
    fn append_rejects_bad_flag() {
        let mut cmd = AppendCommand::new("INBOX", "x").with_flags(["\\Seen)"]);
        assert!(matches!(cmd.command_line(), Err(Error::InvalidInput(_))));
    }
}
