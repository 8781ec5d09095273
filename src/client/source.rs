//! Request-body sources for the upload pipeline
//!
//! Exactly one source is active per upload: a file (or a pipe-separated
//! list of files, concatenated), an input object, or the outgoing
//! callback.  The callback variant is pumped by the driver itself since
//! it owns the callback cell.

use std::fs;
use std::io::Read;

use client::errors::Error;
use client::InputObject;

/// One block produced by a source
#[derive(Debug)]
pub enum Produced {
    Data(usize),
    End,
}

pub enum Source {
    File {
        paths: Vec<String>,
        current: Option<fs::File>,
        next: usize,
    },
    Object(Box<InputObject>),
    Callback { finished: bool },
}

/// Open a file source and determine the upload length
///
/// A single file reports its own size (an empty one is refused); a
/// pipe-separated list streams with an unknown length unless an
/// explicit size override is given.
pub fn file_source(list: &str, size: Option<u64>)
    -> Result<(Source, i64), Error>
{
    let paths: Vec<String> = list.split('|')
        .map(|x| x.to_string()).collect();
    let file = fs::File::open(&paths[0]).map_err(Error::File)?;
    let length = match size {
        Some(n) => n as i64,
        None => {
            if paths.len() > 1 {
                -1
            } else {
                let len = file.metadata().map_err(Error::File)?.len();
                if len == 0 {
                    return Err(Error::NoData);
                }
                len as i64
            }
        }
    };
    Ok((Source::File {
        paths: paths,
        current: Some(file),
        next: 1,
    }, length))
}

/// Wrap an input object, preferring the explicit size override
pub fn object_source(object: Box<InputObject>, size: Option<u64>)
    -> (Source, i64)
{
    let length = match size.or_else(|| object.size()) {
        Some(n) => n as i64,
        None => -1,
    };
    (Source::Object(object), length)
}

impl Source {
    /// Read the next block, at most `max` bytes, into `block`
    ///
    /// `End` is reported once every input is exhausted.  Not used for
    /// the callback variant.
    pub fn produce(&mut self, block: &mut Vec<u8>, max: usize)
        -> Result<Produced, Error>
    {
        match *self {
            Source::File { ref paths, ref mut current, ref mut next } => {
                loop {
                    if current.is_none() {
                        if *next >= paths.len() {
                            return Ok(Produced::End);
                        }
                        *current = Some(fs::File::open(&paths[*next])
                            .map_err(Error::File)?);
                        *next += 1;
                    }
                    block.resize(max, 0);
                    let bytes = current.as_mut().unwrap()
                        .read(&mut block[..]).map_err(Error::File)?;
                    block.truncate(bytes);
                    if bytes > 0 {
                        return Ok(Produced::Data(bytes));
                    }
                    // end of this file, move over to the next input
                    *current = None;
                }
            }
            Source::Object(ref mut object) => {
                block.resize(max, 0);
                let bytes = object.read(&mut block[..])
                    .map_err(Error::Io)?;
                block.truncate(bytes);
                if bytes == 0 {
                    Ok(Produced::End)
                } else {
                    Ok(Produced::Data(bytes))
                }
            }
            Source::Callback { .. } => {
                unreachable!("the callback source is pumped by the driver")
            }
        }
    }

    /// Give the input object back to the client when the upload winds
    /// down, so the next activation can use it again
    pub fn into_object(self) -> Option<Box<InputObject>> {
        match self {
            Source::Object(object) => Some(object),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    extern crate tempfile;

    use std::io::Write;

    use client::errors::Error;
    use super::{file_source, Produced, Source};

    fn write_file(dir: &self::tempfile::TempDir, name: &str, data: &[u8])
        -> String
    {
        let path = dir.path().join(name);
        let mut file = ::std::fs::File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn drain(source: &mut Source, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut block = Vec::new();
        loop {
            block.clear();
            match source.produce(&mut block, max).unwrap() {
                Produced::Data(n) => {
                    assert_eq!(n, block.len());
                    out.extend_from_slice(&block);
                }
                Produced::End => return out,
            }
        }
    }

    #[test]
    fn single_file_reports_length() {
        let dir = self::tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a", b"hello");
        let (mut source, length) = file_source(&path, None).unwrap();
        assert_eq!(length, 5);
        assert_eq!(drain(&mut source, 3), b"hello".to_vec());
    }

    #[test]
    fn empty_file_is_refused() {
        let dir = self::tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a", b"");
        match file_source(&path, None) {
            Err(Error::NoData) => {}
            other => panic!("unexpected result: {:?}",
                other.map(|_| ())),
        }
    }

    #[test]
    fn missing_file_is_a_file_error() {
        match file_source("/nonexistent/definitely/not", None) {
            Err(Error::File(..)) => {}
            other => panic!("unexpected result: {:?}",
                other.map(|_| ())),
        }
    }

    #[test]
    fn multiple_inputs_concatenate() {
        let dir = self::tempfile::tempdir().unwrap();
        let first = write_file(&dir, "a", b"hello ");
        let second = write_file(&dir, "b", b"world");
        let list = format!("{}|{}", first, second);
        let (mut source, length) = file_source(&list, None).unwrap();
        assert_eq!(length, -1);
        assert_eq!(drain(&mut source, 4), b"hello world".to_vec());
    }

    #[test]
    fn size_override_wins() {
        let dir = self::tempfile::tempdir().unwrap();
        let path = write_file(&dir, "a", b"hello");
        let (_, length) = file_source(&path, Some(3)).unwrap();
        assert_eq!(length, 3);
    }
}
