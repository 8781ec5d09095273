//! Incremental decoder for `Transfer-Encoding: chunked` response bodies
//!
//! Decoded payload bytes are kept at the front of the buffer, chunk
//! framing is stripped in place.  The decoder is fully tolerant to
//! arbitrary splits of the input, including a chunk-size line cut
//! between `\r` and `\n`.

use std::cmp::min;

use httparse::{InvalidChunkSize, parse_chunk_size};
use tk_bufstream::Buf;

/// A chunk-size line longer than this is treated as a protocol violation
/// rather than waiting for more data indefinitely.
pub const MAX_CHUNK_HEAD: usize = 128;
/// Upper bound for a single chunk body.
pub const MAX_CHUNK_SIZE: u64 = 100 << 20;

#[derive(Debug)]
pub enum ChunkError {
    Size(InvalidChunkSize),
    HeadTooLong,
    TooBig(u64),
}

impl From<InvalidChunkSize> for ChunkError {
    fn from(err: InvalidChunkSize) -> ChunkError {
        ChunkError::Size(err)
    }
}

#[derive(Debug, Clone)]
pub struct State {
    buffered: usize,
    pending: u64,
    skip: usize,
    done: bool,
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            pending: 0,
            skip: 0,
            done: false,
        }
    }

    /// Decode as much of the buffer as possible
    ///
    /// Framing bytes are removed from the buffer; `buffered()` payload
    /// bytes are left at the front for the caller to consume.
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), ChunkError> {
        loop {
            if self.skip > 0 {
                let avail = buf.len() - self.buffered;
                if avail == 0 {
                    return Ok(());
                }
                let n = min(self.skip, avail);
                buf.remove_range(self.buffered..self.buffered+n);
                self.skip -= n;
                continue;
            }
            if self.done {
                return Ok(());
            }
            if self.pending == 0 {
                if buf.len() <= self.buffered {
                    return Ok(());
                }
                use httparse::Status::*;
                match parse_chunk_size(&buf[self.buffered..])? {
                    Complete((bytes, size)) => {
                        if bytes > MAX_CHUNK_HEAD {
                            return Err(ChunkError::HeadTooLong);
                        }
                        if size > MAX_CHUNK_SIZE {
                            return Err(ChunkError::TooBig(size));
                        }
                        buf.remove_range(
                            self.buffered..self.buffered+bytes);
                        if size == 0 {
                            // `0\r\n` received; the empty trailer line
                            // still has to be dropped when it arrives
                            self.done = true;
                            self.skip = 2;
                        } else {
                            self.pending = size;
                        }
                    }
                    Partial => {
                        if buf.len() - self.buffered > MAX_CHUNK_HEAD {
                            return Err(ChunkError::HeadTooLong);
                        }
                        return Ok(());
                    }
                }
            } else {
                let avail = (buf.len() - self.buffered) as u64;
                if avail == 0 {
                    return Ok(());
                }
                if avail < self.pending {
                    self.buffered += avail as usize;
                    self.pending -= avail;
                    return Ok(());
                }
                self.buffered += self.pending as usize;
                self.pending = 0;
                // chunk body is followed by a bare CRLF
                self.skip = 2;
            }
        }
    }

    /// Number of decoded payload bytes at the front of the buffer
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// True when the final `0\r\n\r\n` has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tk_bufstream::Buf;

    use super::{State, ChunkError};

    fn decode_all(input: &[&[u8]]) -> Result<(Vec<u8>, bool), ChunkError> {
        let mut buf = Buf::new();
        let mut state = State::new();
        let mut out = Vec::new();
        for piece in input {
            buf.write_all(piece).unwrap();
            state.parse(&mut buf)?;
            let ready = state.buffered();
            out.extend_from_slice(&buf[..ready]);
            buf.consume(ready);
            state.consume(ready);
        }
        Ok((out, state.is_done()))
    }

    #[test]
    fn simple() {
        let (out, done) = decode_all(&[
            b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        ]).unwrap();
        assert_eq!(&out[..], b"hello world");
        assert!(done);
    }

    #[test]
    fn split_at_every_byte() {
        let wire: &[u8] = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        for cut in 0..wire.len() {
            let (out, done) = decode_all(&[&wire[..cut], &wire[cut..]])
                .unwrap();
            assert_eq!(&out[..], b"hello world", "cut at {}", cut);
            assert!(done, "cut at {}", cut);
        }
    }

    #[test]
    fn byte_by_byte() {
        let wire: &[u8] = b"a\r\n0123456789\r\n0\r\n\r\n";
        let pieces = wire.iter().map(|b| {
            ::std::slice::from_ref(b)
        }).collect::<Vec<_>>();
        let (out, done) = decode_all(&pieces).unwrap();
        assert_eq!(&out[..], b"0123456789");
        assert!(done);
    }

    #[test]
    fn chunk_extension() {
        let (out, done) = decode_all(&[
            b"5;ext=1\r\nhello\r\n0\r\n\r\n",
        ]).unwrap();
        assert_eq!(&out[..], b"hello");
        assert!(done);
    }

    #[test]
    fn terminator_without_trailer_bytes() {
        // `is_done` must be reported even before the final CRLF arrives
        let (out, done) = decode_all(&[b"5\r\nhello\r\n0\r\n"]).unwrap();
        assert_eq!(&out[..], b"hello");
        assert!(done);
    }

    #[test]
    fn head_of_128_bytes_is_fine() {
        // 125 leading zeroes + "5\r\n" is exactly 128 bytes
        let mut wire = vec![b'0'; 125];
        wire.extend_from_slice(b"5\r\nhello\r\n0\r\n\r\n");
        let (out, done) = decode_all(&[&wire[..]]).unwrap();
        assert_eq!(&out[..], b"hello");
        assert!(done);
    }

    #[test]
    fn head_of_129_bytes_is_rejected() {
        let mut wire = vec![b'0'; 126];
        wire.extend_from_slice(b"5\r\nhello\r\n0\r\n\r\n");
        match decode_all(&[&wire[..]]) {
            Err(ChunkError::HeadTooLong) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unterminated_head_is_rejected() {
        let wire = vec![b'0'; 129];
        match decode_all(&[&wire[..]]) {
            Err(ChunkError::HeadTooLong) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        // 100 MiB + 1
        match decode_all(&[b"6400001\r\n"]) {
            Err(ChunkError::TooBig(size)) => {
                assert_eq!(size, (100 << 20) + 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn garbage_size_is_rejected() {
        match decode_all(&[b"xyz\r\n"]) {
            Err(ChunkError::Size(..)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
