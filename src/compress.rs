//! Raw DEFLATE filters for the `COMPRESS=DEFLATE` extension
//! ([RFC 4978](https://tools.ietf.org/html/rfc4978)).

use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::transport::{Direction, StreamFilter};

const CHUNK: usize = 4096;

/// Compresses outbound bytes. Every chunk is sync-flushed so the server can decode each
/// command as soon as it arrives.
pub struct Deflater {
    compress: Compress,
}

impl Default for Deflater {
    fn default() -> Self {
        Deflater::new()
    }
}

impl Deflater {
    pub fn new() -> Self {
        Deflater {
            compress: Compress::new(Compression::default(), false),
        }
    }
}

impl StreamFilter for Deflater {
    fn direction(&self) -> Direction {
        Direction::Outbound
    }

    fn process(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() + 64);
        let mut consumed = 0;
        loop {
            if output.capacity() - output.len() < 64 {
                output.reserve(CHUNK);
            }
            let before = self.compress.total_in();
            self.compress
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            consumed += (self.compress.total_in() - before) as usize;
            // The sync flush is complete once all input is in and the output was not filled up.
            if consumed == input.len() && output.len() < output.capacity() {
                break;
            }
        }
        Ok(output)
    }
}

/// Decompresses inbound bytes.
pub struct Inflater {
    decompress: Decompress,
}

impl Default for Inflater {
    fn default() -> Self {
        Inflater::new()
    }
}

impl Inflater {
    pub fn new() -> Self {
        Inflater {
            decompress: Decompress::new(false),
        }
    }
}

impl StreamFilter for Inflater {
    fn direction(&self) -> Direction {
        Direction::Inbound
    }

    fn process(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        let mut output = Vec::with_capacity(input.len() * 4 + 64);
        let mut consumed = 0;
        loop {
            if output.len() == output.capacity() {
                output.reserve(CHUNK);
            }
            let before = self.decompress.total_in();
            let produced = output.len();
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::None)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let read = (self.decompress.total_in() - before) as usize;
            consumed += read;
            let stalled = read == 0 && output.len() == produced;
            if status == Status::StreamEnd
                || stalled
                || (consumed == input.len() && output.len() < output.capacity())
            {
                break;
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_across_chunks() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let first = deflater.process(b"a1 NOOP\r\n").unwrap();
        let second = deflater.process(b"a2 LOGOUT\r\n").unwrap();
        assert_ne!(first, b"a1 NOOP\r\n".to_vec());

        assert_eq!(inflater.process(&first).unwrap(), b"a1 NOOP\r\n".to_vec());
        assert_eq!(inflater.process(&second).unwrap(), b"a2 LOGOUT\r\n".to_vec());
    }

    #[test]
    fn split_input_is_decoded_incrementally() {
        let mut deflater = Deflater::new();
        let mut inflater = Inflater::new();

        let body = "* 1 FETCH (BODY[] {2048}\r\n".to_string() + &"x".repeat(2048) + ")\r\n";
        let compressed = deflater.process(body.as_bytes()).unwrap();
        let (head, tail) = compressed.split_at(compressed.len() / 2);

        let mut plain = inflater.process(head).unwrap();
        plain.extend(inflater.process(tail).unwrap());
        assert_eq!(plain, body.into_bytes());
    }

    #[test]
    fn directions() {
        assert_eq!(Deflater::new().direction(), Direction::Outbound);
        assert_eq!(Inflater::new().direction(), Direction::Inbound);
    }

    #[test]
    fn garbage_is_rejected() {
        let mut inflater = Inflater::new();
        assert!(inflater.process(&[0xff; 16]).is_err());
    }
}
