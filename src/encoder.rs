use std::io::{self, Read, Write};

use netbuf::Buf;

use connection::Connection;
use error::Error;
use request::BodySource;
use version::Version;

#[derive(Debug)]
enum State {
    RequestStart,
    Headers { length: bool, chunked: bool },
    Done,
}

/// Serializer for a request head
///
/// The same buffer accumulates the request line and all headers; the
/// engine writes it to the connection in one piece. State misuse is a
/// bug in the caller and panics; bad header content is an error.
pub struct HeadWriter {
    buf: Buf,
    state: State,
}

fn invalid_value(value: &[u8]) -> bool {
    value.iter().any(|&x| x == b'\r' || x == b'\n')
}

fn invalid_name(name: &str) -> bool {
    name.is_empty() || name.bytes().any(|x| {
        x <= b' ' || x >= 0x7f || x == b':'
    })
}

impl HeadWriter {
    pub fn new() -> HeadWriter {
        HeadWriter {
            buf: Buf::new(),
            state: State::RequestStart,
        }
    }
    /// Write the request line.
    ///
    /// # Panics
    ///
    /// When the request line is already written.
    pub fn request_line(&mut self, method: &str, target: &str,
        version: Version)
    {
        match self.state {
            State::RequestStart => {
                write!(&mut self.buf, "{} {} {}\r\n", method, target, version)
                    .expect("in-memory buffer write");
                self.state = State::Headers {
                    length: false,
                    chunked: false,
                };
            }
            ref state => {
                panic!("request_line() called in state {:?}", state);
            }
        }
    }
    /// Add a header to the message.
    ///
    /// `Content-Length` and `Transfer-Encoding: chunked` must be set
    /// with `add_length` / `add_chunked`; these two are important for
    /// the security of HTTP.
    ///
    /// # Panics
    ///
    /// When called before the request line or after `done`.
    pub fn add_header(&mut self, name: &str, value: &[u8])
        -> Result<(), Error>
    {
        match self.state {
            State::Headers { .. } => {}
            ref state => panic!("add_header() called in state {:?}", state),
        }
        if invalid_name(name) || invalid_value(value) {
            return Err(Error::InvalidHeader(name.to_string()));
        }
        self.buf.write_all(name.as_bytes())
            .and_then(|_| self.buf.write_all(b": "))
            .and_then(|_| self.buf.write_all(value))
            .and_then(|_| self.buf.write_all(b"\r\n"))
            .expect("in-memory buffer write");
        Ok(())
    }
    /// Add the Content-Length header
    pub fn add_length(&mut self, n: u64) -> Result<(), Error> {
        match self.state {
            State::Headers { length: false, chunked: false } => {}
            State::Headers { .. } => {
                return Err(Error::InvalidHeader(
                    "Content-Length".to_string()));
            }
            ref state => panic!("add_length() called in state {:?}", state),
        }
        write!(&mut self.buf, "Content-Length: {}\r\n", n)
            .expect("in-memory buffer write");
        self.state = State::Headers { length: true, chunked: false };
        Ok(())
    }
    /// Set the transfer encoding to chunked
    pub fn add_chunked(&mut self) -> Result<(), Error> {
        match self.state {
            State::Headers { length: false, chunked: false } => {}
            State::Headers { .. } => {
                return Err(Error::InvalidHeader(
                    "Transfer-Encoding".to_string()));
            }
            ref state => panic!("add_chunked() called in state {:?}", state),
        }
        self.buf.write_all(b"Transfer-Encoding: chunked\r\n")
            .expect("in-memory buffer write");
        self.state = State::Headers { length: false, chunked: true };
        Ok(())
    }
    /// Close the head and return the serialized bytes
    pub fn done(mut self) -> Buf {
        match self.state {
            State::Headers { .. } => {}
            ref state => panic!("done() called in state {:?}", state),
        }
        self.buf.write_all(b"\r\n").expect("in-memory buffer write");
        self.state = State::Done;
        self.buf
    }
}

/// Counts bytes on the way to the connection so a `Builder` body can be
/// checked against its declared length
struct CountingWriter<'a> {
    conn: &'a mut Connection,
    written: u64,
}

impl<'a> Write for CountingWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_builder_body(conn: &mut Connection, len: u64,
    writer: &dyn Fn(&mut dyn Write) -> io::Result<()>)
    -> io::Result<()>
{
    let mut out = CountingWriter {
        conn: conn,
        written: 0,
    };
    writer(&mut out)?;
    if out.written != len {
        return Err(io::Error::new(io::ErrorKind::InvalidData,
            format!("body builder wrote {} bytes, declared {}",
                out.written, len)));
    }
    Ok(())
}

/// Stream exactly `len` bytes from a restartable source
pub fn write_stream_body(conn: &mut Connection, len: u64,
    source: &dyn BodySource)
    -> io::Result<()>
{
    let mut input = source.start()?;
    let mut sent = 0u64;
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = input.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        sent += n as u64;
        if sent > len {
            return Err(io::Error::new(io::ErrorKind::InvalidData,
                "body source produced more bytes than declared"));
        }
        conn.write_all(&chunk[..n])?;
    }
    if sent != len {
        return Err(io::Error::new(io::ErrorKind::InvalidData,
            format!("body source produced {} bytes, declared {}",
                sent, len)));
    }
    Ok(())
}

/// Stream a source of unknown length with chunked transfer encoding
pub fn write_chunked_body(conn: &mut Connection, source: &dyn BodySource)
    -> io::Result<()>
{
    let mut input = source.start()?;
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = input.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        conn.write_all(format!("{:x}\r\n", n).as_bytes())?;
        conn.write_all(&chunk[..n])?;
        conn.write_all(b"\r\n")?;
    }
    conn.write_all(b"0\r\n\r\n")
}
