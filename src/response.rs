//! Response records as handed to the session by the record framer.

use std::borrow::Cow;
use std::fmt;

/// Completion status carried by a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The command completed successfully.
    Ok,
    /// The command failed.
    No,
    /// The command was not understood, or its arguments were invalid.
    Bad,
}

/// What kind of line a record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// A `+` line: the server awaits more client data.
    Continuation,
    /// A `*` line carrying server data that is not tied to a tag.
    Untagged,
    /// A line starting with a command tag, completing that command.
    Tagged(Status),
}

/// One response record from the server.
///
/// `raw` holds the complete record as received, including the trailing CRLF and any literal
/// octets it carries. Records are immutable once produced.
#[derive(Clone, PartialEq, Eq)]
pub struct ImapResponse {
    tag: Option<String>,
    kind: ResponseKind,
    raw: Vec<u8>,
}

impl ImapResponse {
    /// Builds a record; `tag` is only meaningful for tagged records.
    pub fn new(tag: Option<String>, kind: ResponseKind, raw: Vec<u8>) -> Self {
        let tag = match kind {
            ResponseKind::Tagged(_) => tag,
            _ => None,
        };
        ImapResponse { tag, kind, raw }
    }

    /// The tag of a tagged record.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// The status of a tagged record.
    pub fn status(&self) -> Option<Status> {
        match self.kind {
            ResponseKind::Tagged(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.kind == ResponseKind::Continuation
    }

    pub fn is_untagged(&self) -> bool {
        self.kind == ResponseKind::Untagged
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self.kind, ResponseKind::Tagged(_))
    }

    /// Whether this is a tagged `OK`.
    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Tagged(Status::Ok)
    }

    /// The record exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The record as text, without the trailing CRLF.
    pub fn text(&self) -> Cow<'_, str> {
        let end = if self.raw.ends_with(b"\r\n") {
            self.raw.len() - 2
        } else if self.raw.ends_with(b"\n") {
            self.raw.len() - 1
        } else {
            self.raw.len()
        };
        String::from_utf8_lossy(&self.raw[..end])
    }

    /// Everything after the leading `+ `, `* ` or `<tag> <status> ` marker.
    pub fn rest(&self) -> Cow<'_, str> {
        let text = self.text();
        let skip = match self.kind {
            ResponseKind::Continuation | ResponseKind::Untagged => 1,
            ResponseKind::Tagged(_) => 2,
        };
        match text.splitn(skip + 1, ' ').nth(skip) {
            Some(rest) => Cow::Owned(rest.to_string()),
            None => Cow::Borrowed(""),
        }
    }
}

impl fmt::Debug for ImapResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapResponse")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("text", &self.text())
            .finish()
    }
}

impl fmt::Display for ImapResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
