//! Download progress for the three response body framings
//!
//! The response head announces how the body ends: a declared content
//! length, chunked transfer coding, or nothing at all (the peer closes
//! the connection when it is done).  `BodyProgress` tracks one download
//! against whichever of those applies.

use tk_bufstream::ReadBuf;

use chunked::{self, ChunkError};

#[derive(Debug, Clone)]
pub enum BodyProgress {
    /// A declared content length counting down to zero
    Fixed { remaining: u64 },
    /// No framing: the body runs until the peer closes
    Eof,
    /// Chunked transfer coding, decoded in place
    Chunked(chunked::State),
}

impl BodyProgress {
    /// Pick the mode matching a parsed response head
    pub fn for_response(chunked: bool, content_length: i64)
        -> BodyProgress
    {
        if chunked {
            BodyProgress::Chunked(chunked::State::new())
        } else if content_length >= 0 {
            BodyProgress::Fixed { remaining: content_length as u64 }
        } else {
            BodyProgress::Eof
        }
    }

    /// Decode whatever sits in the input buffer
    ///
    /// Returns the number of payload bytes ready for delivery at the
    /// front of the buffer and whether the body is complete.
    pub fn advance<S>(&mut self, io: &mut ReadBuf<S>)
        -> Result<(usize, bool), ChunkError>
    {
        match *self {
            BodyProgress::Fixed { remaining } => {
                let buffered = io.in_buf.len();
                if remaining <= buffered as u64 {
                    Ok((remaining as usize, true))
                } else {
                    Ok((buffered, false))
                }
            }
            BodyProgress::Eof => Ok((io.in_buf.len(), io.done())),
            BodyProgress::Chunked(ref mut state) => {
                state.parse(&mut io.in_buf)?;
                Ok((state.buffered(), state.is_done()))
            }
        }
    }

    /// Drop `n` delivered bytes from the front of the buffer
    ///
    /// # Panics
    ///
    /// When `n` exceeds what `advance` reported as ready.
    pub fn consume<S>(&mut self, io: &mut ReadBuf<S>, n: usize) {
        io.in_buf.consume(n);
        match *self {
            BodyProgress::Fixed { ref mut remaining } => {
                assert!(*remaining >= n as u64);
                *remaining -= n as u64;
            }
            BodyProgress::Eof => {}
            BodyProgress::Chunked(ref mut state) => state.consume(n),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Read, Write};

    use futures::{Async, Poll};
    use tk_bufstream::{IoBuf, ReadBuf};
    use tokio_io::{AsyncRead, AsyncWrite};

    use super::BodyProgress;

    struct Feed {
        chunks: Vec<Vec<u8>>,
        eof: bool,
    }

    impl Read for Feed {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock,
                    "drained"));
            }
            let chunk = self.chunks.remove(0);
            assert!(buf.len() >= chunk.len());
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for Feed {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AsyncRead for Feed {}

    impl AsyncWrite for Feed {
        fn shutdown(&mut self) -> Poll<(), io::Error> {
            Ok(Async::Ready(()))
        }
    }

    fn read_buf(chunks: &[&[u8]], eof: bool) -> ReadBuf<Feed> {
        let feed = Feed {
            chunks: chunks.iter().map(|x| x.to_vec()).collect(),
            eof: eof,
        };
        let (_, read) = IoBuf::new(feed).split();
        read
    }

    #[test]
    fn mode_selection() {
        assert!(matches!(BodyProgress::for_response(true, -1),
            BodyProgress::Chunked(..)));
        assert!(matches!(BodyProgress::for_response(false, 10),
            BodyProgress::Fixed { remaining: 10 }));
        assert!(matches!(BodyProgress::for_response(false, -1),
            BodyProgress::Eof));
    }

    #[test]
    fn fixed_counts_down_to_the_boundary() {
        let mut io = read_buf(&[b"hel", b"lo!"], true);
        let mut progress = BodyProgress::for_response(false, 5);

        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (3, false));
        progress.consume(&mut io, 3);

        // the second read brings one byte more than the body holds
        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (2, true));
        progress.consume(&mut io, 2);
        assert_eq!(io.in_buf.len(), 1);
        assert!(matches!(progress,
            BodyProgress::Fixed { remaining: 0 }));
    }

    #[test]
    #[should_panic]
    fn fixed_consume_past_the_end_is_refused() {
        let mut io = read_buf(&[b"12345"], true);
        let mut progress = BodyProgress::for_response(false, 2);
        io.read().unwrap();
        progress.consume(&mut io, 3);
    }

    #[test]
    fn eof_body_drains_until_close() {
        let mut io = read_buf(&[b"data"], true);
        let mut progress = BodyProgress::for_response(false, -1);

        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (4, false));
        progress.consume(&mut io, 4);

        // only the close itself ends the body
        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (0, true));
    }

    #[test]
    fn eof_body_waits_while_the_peer_is_silent() {
        let mut io = read_buf(&[], false);
        let mut progress = BodyProgress::for_response(false, -1);
        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (0, false));
    }

    #[test]
    fn chunked_is_delegated_to_the_decoder() {
        let mut io = read_buf(&[b"4\r\nwiki\r\n0\r\n\r\n"], true);
        let mut progress = BodyProgress::for_response(true, -1);

        io.read().unwrap();
        assert_eq!(progress.advance(&mut io).unwrap(), (4, true));
        assert_eq!(&io.in_buf[..4], b"wiki");
        progress.consume(&mut io, 4);
        assert_eq!(io.in_buf.len(), 0);
    }

    #[test]
    fn chunked_errors_surface() {
        let mut io = read_buf(&[b"zz\r\n"], true);
        let mut progress = BodyProgress::for_response(true, -1);
        io.read().unwrap();
        assert!(progress.advance(&mut io).is_err());
    }
}
