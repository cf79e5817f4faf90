//! Encoding helpers shared by the command implementations.

use crate::error::{Result, ValidateError};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Wraps `value` in double quotes, escaping backslashes and quotes.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', r"\\").replace('"', "\\\""))
}

/// Quotes `value`, refusing characters a quoted string cannot carry.
pub fn validate_str(value: &str) -> Result<String> {
    if let Some(c) = value.chars().find(|&c| c == '\r' || c == '\n' || c == '\0') {
        return Err(ValidateError(c).into());
    }
    Ok(quote(value))
}

/// Joins an iterator of [std::fmt::Display]'ables with `delim`.
pub fn iter_join<I, T>(iter: I, delim: &str) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    use std::fmt::Write;

    let mut s = String::new();
    let mut it = iter.into_iter().peekable();
    while let Some(n) = it.next() {
        let _ = write!(s, "{}", n);
        if it.peek().is_some() {
            s.push_str(delim);
        }
    }
    s
}

/// Builds a CRLF-terminated line from its parts.
pub(crate) fn line<I, T>(parts: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut bytes = iter_join(parts, " ").into_bytes();
    bytes.extend_from_slice(CRLF);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn quote_backslash() {
        assert_eq!("\"test\\\\text\"", quote(r"test\text"));
    }

    #[test]
    fn quote_dquote() {
        assert_eq!("\"test\\\"text\"", quote("test\"text"));
    }

    #[test]
    fn validate_random() {
        assert_eq!(
            "\"~iCQ_k;>[&\\\"sVCvUW`e<<P!wJ\"",
            &validate_str("~iCQ_k;>[&\"sVCvUW`e<<P!wJ").unwrap()
        );
    }

    #[test]
    fn validate_newline() {
        match validate_str("test\nstring") {
            Err(Error::Validate(ValidateError(c))) => assert_eq!(c, '\n'),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validate_carriage_return() {
        match validate_str("test\rstring") {
            Err(Error::Validate(ValidateError(c))) => assert_eq!(c, '\r'),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn join_and_line() {
        assert_eq!(iter_join(["a", "b", "c"], ","), "a,b,c");
        assert_eq!(iter_join(Vec::<u32>::new(), ","), "");
        assert_eq!(line(["SELECT", "\"INBOX\""]), b"SELECT \"INBOX\"\r\n".to_vec());
    }
}
