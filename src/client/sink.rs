//! Delivery of decoded body bytes to the configured sinks
//!
//! Order is fixed: output file, receive buffer, incoming callback,
//! output object.  Callbacks are invoked with the shared cell released
//! so they are free to touch the client.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::rc::Rc;

use client::client::Inner;
use client::errors::Error;
use client::flags::Flags;
use client::{Control, ObjectMode};

pub struct SinkSet {
    file: Option<File>,
}

impl SinkSet {
    pub fn new() -> SinkSet {
        SinkSet { file: None }
    }

    fn open_file(&mut self, inner: &Rc<RefCell<Inner>>)
        -> Result<(), Error>
    {
        if self.file.is_some() {
            return Ok(());
        }
        let target = {
            let inner = inner.borrow();
            inner.output_file.clone()
                .map(|path| (path, inner.flags.contains(Flags::RESUME)))
        };
        if let Some((path, resume)) = target {
            let file = if resume && path.exists() {
                let mut file = OpenOptions::new()
                    .write(true).append(true).open(&path)
                    .map_err(Error::File)?;
                file.seek(SeekFrom::End(0)).map_err(Error::File)?;
                file
            } else {
                File::create(&path).map_err(Error::File)?
            };
            self.file = Some(file);
        }
        Ok(())
    }

    /// Deliver one slice of body bytes to every configured sink
    ///
    /// `Control::Abort` is the incoming callback abandoning the request.
    pub fn deliver(&mut self, inner: &Rc<RefCell<Inner>>, data: &[u8])
        -> Result<Control, Error>
    {
        self.open_file(inner)?;
        if let Some(ref mut file) = self.file {
            file.write_all(data).map_err(Error::File)?;
        }
        {
            let mut inner = inner.borrow_mut();
            if inner.flags.contains(Flags::RECV_BUFFER) {
                // the buffer is kept NUL-terminated in place
                if !inner.recv_buffer.is_empty() {
                    inner.recv_buffer.pop();
                }
                inner.recv_buffer.extend_from_slice(data);
                inner.recv_buffer.push(0);
            }
        }
        let callback = inner.borrow_mut().incoming.take();
        if let Some(mut callback) = callback {
            let result = callback(data);
            {
                let mut inner = inner.borrow_mut();
                if inner.incoming.is_none() {
                    inner.incoming = Some(callback);
                }
            }
            if let Control::Abort = result? {
                return Ok(Control::Abort);
            }
        }
        let object = inner.borrow_mut().output_object.take();
        if let Some(mut object) = object {
            let (mode, datatype) = {
                let inner = inner.borrow();
                (inner.object_mode, inner.datatype)
            };
            let result = match mode {
                ObjectMode::DataFeed => object.data_feed(datatype, data),
                ObjectMode::ReadWrite => object.write(data),
            };
            {
                let mut inner = inner.borrow_mut();
                if inner.output_object.is_none() {
                    inner.output_object = Some(object);
                }
            }
            result.map_err(Error::Io)?;
        }
        Ok(Control::Continue)
    }

    /// Close the output file
    pub fn release(&mut self) {
        self.file = None;
    }
}

#[cfg(test)]
mod test {
    extern crate tempfile;

    use std::io;
    use std::cell::RefCell;
    use std::rc::Rc;

    use client::{Client, Control, Flags, ObjectMode, OutputObject};
    use super::SinkSet;

    struct Collector {
        feeds: Rc<RefCell<Vec<(u32, Vec<u8>)>>>,
    }

    impl OutputObject for Collector {
        fn data_feed(&mut self, datatype: u32, data: &[u8])
            -> io::Result<()>
        {
            self.feeds.borrow_mut().push((datatype, data.to_vec()));
            Ok(())
        }
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.feeds.borrow_mut().push((0, data.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn recv_buffer_is_nul_terminated() {
        let client = Client::new();
        client.set_flags(Flags::RECV_BUFFER);
        let inner = client.shared();
        let mut sinks = SinkSet::new();
        sinks.deliver(&inner, b"hello").unwrap();
        sinks.deliver(&inner, b" world").unwrap();
        assert_eq!(&inner.borrow().recv_buffer[..], b"hello world\0");
        assert_eq!(client.recv_buffer(), b"hello world".to_vec());
    }

    #[test]
    fn callback_sees_bytes_before_object() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let client = Client::new();
        {
            let order = order.clone();
            client.on_incoming(move |data| {
                order.borrow_mut().push(format!("cb:{}", data.len()));
                Ok(Control::Continue)
            });
        }
        let feeds = Rc::new(RefCell::new(Vec::new()));
        client.set_output_object(
            Box::new(Collector { feeds: feeds.clone() }),
            ObjectMode::DataFeed, 7);
        let inner = client.shared();
        let mut sinks = SinkSet::new();
        sinks.deliver(&inner, b"abc").unwrap();
        assert_eq!(&order.borrow()[..], &["cb:3".to_string()][..]);
        assert_eq!(&feeds.borrow()[..], &[(7, b"abc".to_vec())][..]);
    }

    #[test]
    fn abort_from_callback_is_reported() {
        let client = Client::new();
        client.on_incoming(|_| Ok(Control::Abort));
        let inner = client.shared();
        let mut sinks = SinkSet::new();
        let control = sinks.deliver(&inner, b"abc").unwrap();
        assert!(matches!(control, Control::Abort));
    }

    #[test]
    fn file_sink_receives_bytes() {
        let dir = self::tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let client = Client::new();
        client.set_output_file(path.to_str().unwrap());
        let inner = client.shared();
        let mut sinks = SinkSet::new();
        sinks.deliver(&inner, b"hel").unwrap();
        sinks.deliver(&inner, b"lo").unwrap();
        sinks.release();
        assert_eq!(::std::fs::read(&path).unwrap(), b"hello".to_vec());
    }
}
