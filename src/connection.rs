use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use native_tls::{HandshakeError, TlsConnector, TlsStream};
use netbuf::Buf;

use error::Error;

/// How much we try to read from a socket in one go
pub const READ_CHUNK: usize = 8192;

/// A live bidirectional byte stream: TCP, TLS, or a mock in tests
///
/// The deadline hook exists because the engine enforces its response
/// timeout through socket timeouts; transports that cannot time out
/// (in-memory mocks) keep the default no-op.
pub trait Transport: Read + Write + Send {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        let _ = deadline;
        Ok(())
    }
    /// Best-effort shutdown of both directions
    fn shutdown(&mut self);
}

fn stream_deadline(stream: &TcpStream, deadline: Option<Instant>)
    -> io::Result<()>
{
    let timeout = deadline.map(|d| {
        let left = d.saturating_duration_since(Instant::now());
        // zero would mean "no timeout" to the socket API
        if left > Duration::from_millis(1) { left }
        else { Duration::from_millis(1) }
    });
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;
    Ok(())
}

impl Transport for TcpStream {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        stream_deadline(self, deadline)
    }
    fn shutdown(&mut self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }
}

impl Transport for TlsStream<TcpStream> {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        stream_deadline(self.get_ref(), deadline)
    }
    fn shutdown(&mut self) {
        // close_notify first, then tear the socket down
        let _ = TlsStream::shutdown(self);
        let _ = self.get_ref().shutdown(Shutdown::Both);
    }
}

/// A connection with a pushback buffer in front of the transport
///
/// The parser uses `unread` to return bytes it received past the end of
/// the response head; framing layers use it for bytes past the end of
/// the body. The connection knows nothing about request framing.
pub struct Connection {
    transport: Box<dyn Transport>,
    pushback: Buf,
    closed: bool,
}

impl Connection {
    pub fn new<T: Transport + 'static>(transport: T) -> Connection {
        Connection {
            transport: Box::new(transport),
            pushback: Buf::new(),
            closed: false,
        }
    }
    /// Read a chunk of at most `READ_CHUNK` bytes; empty means EOF
    ///
    /// Pushed-back bytes are returned before the transport is touched.
    pub fn read(&mut self) -> io::Result<Vec<u8>> {
        if self.pushback.len() > 0 {
            let n = self.pushback.len();
            let data = self.pushback[..n].to_vec();
            self.pushback.consume(n);
            return Ok(data);
        }
        if self.closed {
            return Ok(Vec::new());
        }
        let mut chunk = vec![0u8; READ_CHUNK];
        let n = self.transport.read(&mut chunk)?;
        chunk.truncate(n);
        Ok(chunk)
    }
    /// Read exactly `n` bytes or fail with `UnexpectedEof`
    pub fn read_exactly(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(n);
        while data.len() < n {
            let chunk = self.read()?;
            if chunk.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                    "connection closed while reading"));
            }
            data.extend_from_slice(&chunk);
        }
        if data.len() > n {
            self.unread(&data[n..]);
            data.truncate(n);
        }
        Ok(data)
    }
    /// Push bytes back so the next `read` returns them first
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.pushback.len() == 0 {
            self.pushback.write_all(bytes)
                .expect("in-memory buffer write");
        } else {
            let mut buf = Buf::new();
            buf.write_all(bytes).expect("in-memory buffer write");
            buf.write_all(&self.pushback[..])
                .expect("in-memory buffer write");
            self.pushback = buf;
        }
    }
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.transport.write_all(bytes)?;
        self.transport.flush()
    }
    pub fn set_deadline(&mut self, deadline: Option<Instant>)
        -> io::Result<()>
    {
        self.transport.set_deadline(deadline)
    }
    /// Shut the transport down; further reads return EOF
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.shutdown();
        }
    }
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Dial a TCP connection, trying every resolved address
///
/// Sets `TCP_NODELAY`; honors the deadline via `connect_timeout`.
pub fn dial_tcp(host: &str, port: u16, deadline: Option<Instant>)
    -> Result<TcpStream, Error>
{
    let addrs = format!("{}:{}", host, port).to_socket_addrs()
        .map_err(Error::InternalIo)?;
    let mut last = None;
    for addr in addrs {
        let attempt = match deadline {
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                if left == Duration::from_secs(0) {
                    return Err(Error::ConnectionTimeout);
                }
                TcpStream::connect_timeout(&addr, left)
            }
            None => TcpStream::connect(&addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(Error::InternalIo)?;
                debug!("connected to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                last = Some(e);
            }
        }
    }
    match last {
        Some(ref e) if e.kind() == io::ErrorKind::TimedOut
            => Err(Error::ConnectionTimeout),
        Some(e) => Err(Error::InternalIo(e)),
        None => Err(Error::InternalIo(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", host)))),
    }
}

/// Wrap an established TCP stream into TLS toward `domain` (the SNI name)
pub fn tls_handshake(connector: &TlsConnector, domain: &str, tcp: TcpStream)
    -> Result<TlsStream<TcpStream>, Error>
{
    match connector.connect(domain, tcp) {
        Ok(stream) => Ok(stream),
        Err(HandshakeError::Failure(e)) => Err(Error::Tls(e)),
        Err(HandshakeError::WouldBlock(..)) => {
            // can't happen on a blocking socket
            Err(Error::InternalIo(io::Error::new(io::ErrorKind::WouldBlock,
                "TLS handshake would block")))
        }
    }
}

#[cfg(test)]
pub mod testutil {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};

    use super::Transport;

    /// Feeds scripted chunks one per read call, records writes
    pub struct ScriptedTransport {
        chunks: VecDeque<Vec<u8>>,
        pub written: Arc<Mutex<Vec<u8>>>,
    }

    impl ScriptedTransport {
        pub fn new(chunks: &[&[u8]]) -> ScriptedTransport {
            ScriptedTransport {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                written: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    assert!(chunk.len() <= buf.len());
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedTransport {
        fn shutdown(&mut self) {
            self.chunks.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::Connection;
    use super::testutil::ScriptedTransport;

    #[test]
    fn pushback_order() {
        let mut conn = Connection::new(ScriptedTransport::new(&[b"world"]));
        conn.unread(b"hello ");
        assert_eq!(conn.read().unwrap(), b"hello ".to_vec());
        assert_eq!(conn.read().unwrap(), b"world".to_vec());
        assert_eq!(conn.read().unwrap(), b"");
    }

    #[test]
    fn unread_prepends() {
        let mut conn = Connection::new(ScriptedTransport::new(&[]));
        conn.unread(b"tail");
        conn.unread(b"head ");
        assert_eq!(conn.read().unwrap(), b"head tail".to_vec());
    }

    #[test]
    fn read_exactly_splits() {
        let mut conn = Connection::new(
            ScriptedTransport::new(&[b"abc", b"defgh"]));
        assert_eq!(conn.read_exactly(4).unwrap(), b"abcd".to_vec());
        assert_eq!(conn.read_exactly(4).unwrap(), b"efgh".to_vec());
        assert!(conn.read_exactly(1).is_err());
    }
}
