use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::command::ImapCommand;
use crate::error::{Error, Result};
use crate::response::ImapResponse;
use crate::utils::CRLF;

use super::cleaned_up;

/// `AUTHENTICATE PLAIN` ([RFC 4616](https://tools.ietf.org/html/rfc4616)).
///
/// When the server advertises `SASL-IR` the credentials ride along with the command line.
/// Otherwise they are sent in answer to the server's first continuation request. Any further
/// continuation request cancels the exchange with `*`.
#[derive(Debug)]
pub struct AuthPlainCommand {
    authorization_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    sasl_ir: bool,
    responded: bool,
}

impl AuthPlainCommand {
    pub fn new(username: impl Into<String>, password: impl Into<String>, sasl_ir: bool) -> Self {
        AuthPlainCommand {
            authorization_id: None,
            username: Some(username.into()),
            password: Some(password.into()),
            sasl_ir,
            responded: false,
        }
    }

    /// Acts on behalf of `authorization_id` instead of the authenticated user.
    pub fn with_authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = Some(authorization_id.into());
        self
    }

    /// Whether any credential is still held.
    pub fn holds_credentials(&self) -> bool {
        self.authorization_id.is_some() || self.username.is_some() || self.password.is_some()
    }

    fn initial_response(&self) -> Result<String> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(username), Some(password)) => (username, password),
            _ => return Err(cleaned_up()),
        };
        let authorization_id = self.authorization_id.as_deref().unwrap_or_default();
        if [authorization_id, username.as_str(), password.as_str()]
            .iter()
            .any(|part| part.contains('\0'))
        {
            return Err(Error::InvalidInput(
                "credentials must not contain NUL".to_string(),
            ));
        }
        let message = format!("{}\0{}\0{}", authorization_id, username, password);
        Ok(STANDARD.encode(message))
    }
}

impl ImapCommand for AuthPlainCommand {
    fn command_type(&self) -> &'static str {
        "AUTHENTICATE"
    }

    fn command_line(&mut self) -> Result<Vec<u8>> {
        let mut line = b"AUTHENTICATE PLAIN".to_vec();
        if self.sasl_ir {
            let response = self.initial_response()?;
            line.push(b' ');
            line.extend_from_slice(response.as_bytes());
            self.responded = true;
        } else if self.username.is_none() {
            return Err(cleaned_up());
        }
        line.extend_from_slice(CRLF);
        Ok(line)
    }

    fn next_line_after_continuation(&mut self, _response: &ImapResponse) -> Result<Option<Vec<u8>>> {
        if self.responded {
            return Ok(Some(b"*\r\n".to_vec()));
        }
        let mut line = self.initial_response()?.into_bytes();
        line.extend_from_slice(CRLF);
        self.responded = true;
        Ok(Some(line))
    }

    fn debug_line(&self) -> String {
        format!(
            "AUTHENTICATE PLAIN FOR USER:{}",
            self.username.as_deref().unwrap_or_default()
        )
    }

    fn cleanup(&mut self) {
        self.authorization_id = None;
        self.username = None;
        self.password = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_record;

    fn continuation() -> ImapResponse {
        parse_record(b"+\r\n".to_vec()).unwrap()
    }

    #[test]
    fn plain_without_sasl_ir() {
        let mut cmd = AuthPlainCommand::new("user", "pass", false);
        assert_eq!(cmd.command_line().unwrap(), b"AUTHENTICATE PLAIN\r\n".to_vec());
        assert_eq!(
            cmd.next_line_after_continuation(&continuation()).unwrap(),
            Some(b"AHVzZXIAcGFzcw==\r\n".to_vec())
        );
        assert_eq!(
            cmd.next_line_after_continuation(&continuation()).unwrap(),
            Some(b"*\r\n".to_vec())
        );
    }

    #[test]
    fn plain_with_sasl_ir() {
        let mut cmd = AuthPlainCommand::new("user", "pass", true);
        assert_eq!(
            cmd.command_line().unwrap(),
            b"AUTHENTICATE PLAIN AHVzZXIAcGFzcw==\r\n".to_vec()
        );
    }

    #[test]
    fn authorization_id() {
        let mut cmd = AuthPlainCommand::new("user", "pass", true).with_authorization_id("admin");
        let expected = format!(
            "AUTHENTICATE PLAIN {}\r\n",
            STANDARD.encode("admin\0user\0pass")
        );
        assert_eq!(cmd.command_line().unwrap(), expected.into_bytes());
    }

    #[test]
    fn nul_in_credentials() {
        let mut cmd = AuthPlainCommand::new("us\0er", "pass", true);
        assert!(matches!(cmd.command_line(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn debug_line_hides_password() {
        let cmd = AuthPlainCommand::new("user", "secret", false);
        assert!(!cmd.debug_line().contains("secret"));
    }

    #[test]
    fn cleanup_nulls_fields() {
        let mut cmd = AuthPlainCommand::new("user", "pass", false).with_authorization_id("admin");
        cmd.cleanup();
        assert!(!cmd.holds_credentials());
        assert!(cmd.command_line().is_err());
        assert!(cmd.next_line_after_continuation(&continuation()).is_err());
    }
}
