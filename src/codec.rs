//! Splits the inbound byte stream into response records.
//!
//! Only the framing the session needs is understood here: CRLF-terminated lines, literals
//! announced by a trailing `{n}` (or `{n+}`), and the leading marker that tells continuation,
//! untagged and tagged records apart. Interpreting a record's content is up to its consumer.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::character::complete::{char, u32 as literal_size};
use nom::combinator::{all_consuming, map, opt};
use nom::sequence::{delimited, pair, separated_pair};
use nom::IResult;

use crate::error::{Error, Result};
use crate::response::{ImapResponse, ResponseKind, Status};

/// Default upper bound for a single line, literals excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default upper bound for the literal octets of a single record.
pub const DEFAULT_MAX_LITERAL_SIZE: usize = 64 * 1024 * 1024;

const LF: u8 = 0x0a;

fn is_tag_char(c: u8) -> bool {
    c > 0x20 && c < 0x7f && !b"(){%*\"\\+".contains(&c)
}

fn status(input: &[u8]) -> IResult<&[u8], Status> {
    alt((
        map(tag_no_case("OK"), |_| Status::Ok),
        map(tag_no_case("NO"), |_| Status::No),
        map(tag_no_case("BAD"), |_| Status::Bad),
    ))(input)
}

fn marker(input: &[u8]) -> IResult<&[u8], (Option<&[u8]>, ResponseKind)> {
    alt((
        map(tag("+"), |_| (None, ResponseKind::Continuation)),
        map(tag("*"), |_| (None, ResponseKind::Untagged)),
        map(
            separated_pair(take_while1(is_tag_char), char(' '), status),
            |(t, s)| (Some(t), ResponseKind::Tagged(s)),
        ),
    ))(input)
}

fn literal(input: &[u8]) -> IResult<&[u8], u32> {
    map(
        all_consuming(delimited(
            char('{'),
            pair(literal_size, opt(char('+'))),
            char('}'),
        )),
        |(size, _)| size,
    )(input)
}

/// Returns the size of the literal announced at the end of `line`, if any.
fn trailing_literal(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if !line.ends_with(b"}") {
        return None;
    }
    let open = line.iter().rposition(|&c| c == b'{')?;
    literal(&line[open..])
        .ok()
        .map(|(_, size)| size as usize)
}

/// Classifies a complete record.
pub fn parse_record(raw: Vec<u8>) -> Result<ImapResponse> {
    let (tag, kind) = match marker(&raw) {
        Ok((_, (tag, kind))) => (
            tag.map(|t| String::from_utf8_lossy(t).into_owned()),
            kind,
        ),
        Err(_) => {
            return Err(Error::Framing(format!(
                "unrecognized response line: {:?}",
                String::from_utf8_lossy(&raw)
            )))
        }
    };
    Ok(ImapResponse::new(tag, kind, raw))
}

/// Incremental record framer.
#[derive(Debug)]
pub struct ResponseDecoder {
    buffer: Vec<u8>,
    max_line_length: usize,
    max_literal_size: usize,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        ResponseDecoder::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl ResponseDecoder {
    pub fn new(max_line_length: usize) -> Self {
        ResponseDecoder {
            buffer: Vec::new(),
            max_line_length,
            max_literal_size: DEFAULT_MAX_LITERAL_SIZE,
        }
    }

    /// Caps the literal octets a record may announce; larger records fail with
    /// [`Error::Framing`] before anything is buffered for them.
    pub fn with_max_literal_size(mut self, max_literal_size: usize) -> Self {
        self.max_literal_size = max_literal_size;
        self
    }

    /// Appends inbound bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Takes every buffered byte that is not yet part of a decoded record.
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Returns the next complete record, or `None` if more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<ImapResponse>> {
        let mut pos = 0;
        let mut literals = 0usize;
        let end = loop {
            let line_end = match self.buffer[pos..].iter().position(|&c| c == LF) {
                Some(i) => pos + i + 1,
                None => {
                    if self.buffer.len() - pos > self.max_line_length {
                        return Err(Error::Framing(format!(
                            "line exceeds {} bytes",
                            self.max_line_length
                        )));
                    }
                    return Ok(None);
                }
            };
            if line_end - pos > self.max_line_length {
                return Err(Error::Framing(format!(
                    "line exceeds {} bytes",
                    self.max_line_length
                )));
            }
            match trailing_literal(&self.buffer[pos..line_end]) {
                Some(size) => {
                    literals = literals.saturating_add(size);
                    if literals > self.max_literal_size {
                        return Err(Error::Framing(format!(
                            "literal of {} bytes exceeds {} bytes",
                            size, self.max_literal_size
                        )));
                    }
                    if self.buffer.len() < line_end + size {
                        return Ok(None);
                    }
                    pos = line_end + size;
                }
                None => break line_end,
            }
        };
        let raw: Vec<u8> = self.buffer.drain(..end).collect();
        parse_record(raw).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<ImapResponse> {
        let mut decoder = ResponseDecoder::default();
        decoder.feed(input);
        let mut records = Vec::new();
        while let Some(record) = decoder.decode().unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn classifies_lines() {
        let records = decode_all(b"+ idling\r\n* 4 EXISTS\r\na12 OK IDLE terminated\r\n");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind(), ResponseKind::Continuation);
        assert_eq!(records[1].kind(), ResponseKind::Untagged);
        assert_eq!(records[2].kind(), ResponseKind::Tagged(Status::Ok));
        assert_eq!(records[2].tag(), Some("a12"));
    }

    #[test]
    fn tagged_failures() {
        let records = decode_all(b"a1 NO nope\r\na2 bad what\r\n");
        assert_eq!(records[0].status(), Some(Status::No));
        assert_eq!(records[1].status(), Some(Status::Bad));
    }

    #[test]
    fn literal_spans_lines() {
        let input = b"* 2 FETCH (BODY[TEXT] {5}\r\nfo\r\no)\r\na3 OK done\r\n";
        let records = decode_all(input);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].raw(), &b"* 2 FETCH (BODY[TEXT] {5}\r\nfo\r\no)\r\n"[..]);
        assert!(records[1].is_ok());
    }

    #[test]
    fn waits_for_literal_octets() {
        let mut decoder = ResponseDecoder::default();
        decoder.feed(b"* 1 FETCH (RFC822 {10}\r\n01234");
        assert!(decoder.decode().unwrap().is_none());
        decoder.feed(b"56789)\r\n");
        let record = decoder.decode().unwrap().unwrap();
        assert!(record.is_untagged());
        assert!(!decoder.has_buffered());
    }

    #[test]
    fn partial_line() {
        let mut decoder = ResponseDecoder::default();
        decoder.feed(b"* OK Dovecot");
        assert!(decoder.decode().unwrap().is_none());
        decoder.feed(b" ready.\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap().text(), "* OK Dovecot ready.");
    }

    #[test]
    fn non_synchronizing_literal() {
        assert_eq!(trailing_literal(b"* 1 FETCH (BODY[] {3+}\r\n"), Some(3));
        assert_eq!(trailing_literal(b"* OK {not a literal}\r\n"), None);
    }

    #[test]
    fn overlong_line() {
        let mut decoder = ResponseDecoder::new(8);
        decoder.feed(b"* 0123456789");
        assert!(matches!(decoder.decode(), Err(Error::Framing(_))));
    }

    #[test]
    fn oversized_literal() {
        let mut decoder = ResponseDecoder::new(1024).with_max_literal_size(4);
        decoder.feed(b"* 1 FETCH (RFC822 {10}\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Framing(_))));

        let mut decoder = ResponseDecoder::default();
        decoder.feed(b"* 1 FETCH (RFC822 {4294967295}\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Framing(_))));
    }

    #[test]
    fn literals_within_the_cap() {
        let mut decoder = ResponseDecoder::new(1024).with_max_literal_size(6);
        decoder.feed(b"* 1 FETCH (A {3}\r\nabc B {3}\r\ndef)\r\n");
        assert!(decoder.decode().unwrap().unwrap().is_untagged());

        // the cap covers every literal of one record
        decoder.feed(b"* 2 FETCH (A {4}\r\nabcd B {4}\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Framing(_))));
    }

    #[test]
    fn garbage_line() {
        let mut decoder = ResponseDecoder::default();
        decoder.feed(b"(garbage\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Framing(_))));
    }

    #[test]
    fn take_buffered_leaves_decoder_empty() {
        let mut decoder = ResponseDecoder::default();
        decoder.feed(b"a1 OK done\r\nxyz");
        assert!(decoder.decode().unwrap().unwrap().is_ok());
        assert_eq!(decoder.take_buffered(), b"xyz".to_vec());
        assert!(!decoder.has_buffered());
    }
}
