use std::io::{self, Read};
use std::mem;

use flate2::read::GzDecoder;

use chunked::ChunkedState;
use error::Error;
use head::Head;
use headers;
use headers::Headers;
use pool::{Checkout, Disposition};
use version::Version;

/// How the response body is delimited on the wire
#[derive(Debug)]
pub enum Framing {
    /// No body at all: HEAD responses, 1xx, 204, 304
    Empty,
    /// Exactly this many bytes are left
    Fixed(u64),
    /// Chunked transfer encoding
    Chunked(ChunkedState),
    /// Until the peer closes; such a connection is never reused
    Eof,
}

/// Body length selection
///
/// Algorithm per the message-body-length rules:
///
/// 1. For HEAD, 1xx, 204, 304 -- no body
/// 2. If transfer encoding is chunked -> Chunked
/// 3. If Content-Length -> Fixed
/// 4. Else Eof
///
/// A message framed by both Content-Length and chunking is refused
/// outright rather than guessed at.
pub fn body_framing(is_head: bool, code: u16, headers: &Headers)
    -> Result<Framing, Error>
{
    if is_head || (code >= 100 && code < 200) || code == 204 || code == 304 {
        return Ok(Framing::Empty);
    }
    let chunked = headers.get("Transfer-Encoding")
        .map(|v| headers::any_element(v, headers::is_chunked))
        .unwrap_or(false);
    let length = headers.get("Content-Length").map(|v| v.to_vec());
    if chunked {
        if length.is_some() {
            return Err(Error::ResponseLengthAndChunkingBothUsed);
        }
        return Ok(Framing::Chunked(ChunkedState::new()));
    }
    if let Some(raw) = length {
        for other in headers.all("Content-Length") {
            if other != &raw[..] {
                return Err(Error::InvalidHeader(
                    "Content-Length".to_string()));
            }
        }
        let text = ::std::str::from_utf8(&raw)
            .map_err(|_| Error::InvalidHeader(
                "Content-Length".to_string()))?;
        let n = text.trim().parse::<u64>()
            .map_err(|_| Error::InvalidHeader(
                "Content-Length".to_string()))?;
        return Ok(Framing::Fixed(n));
    }
    Ok(Framing::Eof)
}

/// May the connection go back to the pool once the body is drained?
pub fn keep_alive(head: &Head) -> bool {
    if let Some(conn) = head.headers().get("Connection") {
        if headers::any_element(conn, headers::is_close) {
            return false;
        }
        if head.version() == Version::Http10 {
            return headers::any_element(conn, headers::is_keep_alive);
        }
        return true;
    }
    head.version() == Version::Http11
}

/// The streaming response body, holding the pooled connection
///
/// While the reader is alive the connection belongs to it. Observing
/// the framing terminator releases the connection with `Reuse` (if the
/// response allows keep-alive); dropping or closing the reader early
/// releases with `DontReuse`.
pub struct BodyReader {
    checkout: Option<Checkout>,
    framing: Framing,
    keep_alive: bool,
    stash: Vec<u8>,
    done: bool,
}

impl BodyReader {
    pub fn new(checkout: Checkout, framing: Framing, keep_alive: bool)
        -> BodyReader
    {
        let mut reader = BodyReader {
            checkout: Some(checkout),
            framing: framing,
            keep_alive: keep_alive,
            stash: Vec::new(),
            done: false,
        };
        // bodiless responses release their connection right away
        match reader.framing {
            Framing::Empty | Framing::Fixed(0) => reader.finish(),
            _ => {}
        }
        reader
    }
    /// Next run of framed bytes straight off the connection
    fn fill(&mut self) -> Result<Vec<u8>, Error> {
        let conn = match self.checkout {
            Some(ref mut checkout) => checkout.conn(),
            None => return Ok(Vec::new()),
        };
        match self.framing {
            Framing::Empty => Ok(Vec::new()),
            Framing::Fixed(ref mut remaining) => {
                if *remaining == 0 {
                    return Ok(Vec::new());
                }
                let mut data = conn.read().map_err(Error::from_io)?;
                if data.is_empty() {
                    return Err(Error::ConnectionClosed);
                }
                if (data.len() as u64) > *remaining {
                    // bytes past the body belong to the next response
                    let split = *remaining as usize;
                    conn.unread(&data[split..]);
                    data.truncate(split);
                }
                *remaining -= data.len() as u64;
                Ok(data)
            }
            Framing::Chunked(ref mut state) => state.read(conn),
            Framing::Eof => conn.read().map_err(Error::from_io),
        }
    }
    /// Read a chunk of body bytes; empty exactly when the body is done
    pub fn read_chunk(&mut self) -> Result<Vec<u8>, Error> {
        if !self.stash.is_empty() {
            return Ok(mem::replace(&mut self.stash, Vec::new()));
        }
        if self.done {
            return Ok(Vec::new());
        }
        match self.fill() {
            Ok(ref data) if data.is_empty() => {
                self.finish();
                Ok(Vec::new())
            }
            Ok(data) => {
                // a body can complete mid-read; release eagerly so the
                // connection doesn't wait for a trailing zero read
                let complete = match self.framing {
                    Framing::Fixed(0) => true,
                    Framing::Chunked(ref state) => state.is_done(),
                    _ => false,
                };
                if complete {
                    self.finish();
                }
                Ok(data)
            }
            Err(e) => {
                // framing is broken, the connection can't be trusted
                self.abort();
                Err(e)
            }
        }
    }
    /// Consume the rest of the body so the connection can be pooled
    pub fn drain(&mut self) -> Result<(), Error> {
        loop {
            if self.read_chunk()?.is_empty() {
                return Ok(());
            }
        }
    }
    /// Give the connection up without draining
    pub fn close(&mut self) {
        if !self.done {
            self.abort();
        }
    }
    pub fn is_done(&self) -> bool {
        self.done
    }
    fn finish(&mut self) {
        self.done = true;
        if let Some(checkout) = self.checkout.take() {
            let disposition = match self.framing {
                Framing::Eof => Disposition::DontReuse,
                _ if self.keep_alive => Disposition::Reuse,
                _ => Disposition::DontReuse,
            };
            trace!("body complete, releasing connection: {:?}",
                disposition);
            checkout.release(disposition);
        }
    }
    fn abort(&mut self) {
        self.done = true;
        if let Some(checkout) = self.checkout.take() {
            checkout.release(Disposition::DontReuse);
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let data = self.read_chunk()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        if data.is_empty() {
            return Ok(0);
        }
        let n = ::std::cmp::min(buf.len(), data.len());
        buf[..n].copy_from_slice(&data[..n]);
        if n < data.len() {
            self.stash = data[n..].to_vec();
        }
        Ok(n)
    }
}

/// The response body as the caller sees it
///
/// Either the framed stream as-is, or a gzip decoder on top of it.
pub enum Body {
    Plain(BodyReader),
    Gzip(GzDecoder<BodyReader>),
}

impl Body {
    /// Buffer the whole remaining body
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        self.read_to_end(&mut data).map_err(Error::from_body_io)?;
        Ok(data)
    }
    /// Drop the connection without draining the body
    pub fn close(&mut self) {
        match *self {
            Body::Plain(ref mut reader) => reader.close(),
            Body::Gzip(ref mut decoder) => decoder.get_mut().close(),
        }
    }
    /// Has the framing terminator been observed (and the connection
    /// given back)?
    pub fn is_done(&self) -> bool {
        match *self {
            Body::Plain(ref reader) => reader.is_done(),
            Body::Gzip(ref decoder) => decoder.get_ref().is_done(),
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self {
            Body::Plain(ref mut reader) => reader.read(buf),
            Body::Gzip(ref mut decoder) => {
                let n = decoder.read(buf)?;
                if n == 0 {
                    // the gzip stream may end before the framing does;
                    // consume the terminator so the connection pools
                    let reader = decoder.get_mut();
                    reader.drain().map_err(|e| {
                        io::Error::new(io::ErrorKind::Other, e)
                    })?;
                }
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use connection::Connection;
    use connection::testutil::ScriptedTransport;
    use error::Error;
    use head::Head;
    use headers::Headers;
    use pool::{ConnKey, Manager, ManagerSettings};
    use status::Status;
    use version::Version;
    use super::{body_framing, keep_alive, BodyReader, Framing};

    fn key() -> ConnKey {
        ConnKey {
            host: "example.com".to_string(),
            port: 80,
            secure: false,
            proxy: None,
        }
    }

    fn reader_over(mgr: &Manager, chunks: &[&[u8]], framing: Framing,
        reuse: bool)
        -> BodyReader
    {
        let transport = ScriptedTransport::new(chunks);
        let (checkout, _) = mgr.acquire(&key(),
            || Ok(Connection::new(transport))).unwrap();
        BodyReader::new(checkout, framing, reuse)
    }

    fn head_with(version: Version, name: &str, value: &[u8]) -> Head {
        let mut headers = Headers::new();
        if !name.is_empty() {
            headers.add(name, value);
        }
        Head::new(Status::new(200, "OK"), version, headers)
    }

    #[test]
    fn framing_selection() {
        let mut headers = Headers::new();
        headers.add("Content-Length", &b"10"[..]);
        assert!(matches!(body_framing(false, 200, &headers).unwrap(),
            Framing::Fixed(10)));
        assert!(matches!(body_framing(true, 200, &headers).unwrap(),
            Framing::Empty));
        assert!(matches!(body_framing(false, 204, &headers).unwrap(),
            Framing::Empty));
        assert!(matches!(body_framing(false, 304, &headers).unwrap(),
            Framing::Empty));
        assert!(matches!(body_framing(false, 101, &headers).unwrap(),
            Framing::Empty));

        let mut chunked = Headers::new();
        chunked.add("Transfer-Encoding", &b"chunked"[..]);
        assert!(matches!(body_framing(false, 200, &chunked).unwrap(),
            Framing::Chunked(..)));

        assert!(matches!(body_framing(false, 200, &Headers::new()).unwrap(),
            Framing::Eof));
    }

    #[test]
    fn framing_conflict() {
        let mut headers = Headers::new();
        headers.add("Content-Length", &b"10"[..]);
        headers.add("Transfer-Encoding", &b"chunked"[..]);
        assert!(matches!(body_framing(false, 200, &headers),
            Err(Error::ResponseLengthAndChunkingBothUsed)));
    }

    #[test]
    fn duplicate_content_length() {
        let mut headers = Headers::new();
        headers.add("Content-Length", &b"10"[..]);
        headers.add("Content-Length", &b"12"[..]);
        assert!(matches!(body_framing(false, 200, &headers),
            Err(Error::InvalidHeader(..))));
        let mut same = Headers::new();
        same.add("Content-Length", &b"10"[..]);
        same.add("Content-Length", &b"10"[..]);
        assert!(matches!(body_framing(false, 200, &same).unwrap(),
            Framing::Fixed(10)));
    }

    #[test]
    fn keep_alive_rules() {
        assert!(keep_alive(&head_with(Version::Http11, "", b"")));
        assert!(!keep_alive(&head_with(Version::Http10, "", b"")));
        assert!(!keep_alive(
            &head_with(Version::Http11, "Connection", b"close")));
        assert!(keep_alive(
            &head_with(Version::Http10, "Connection", b"keep-alive")));
        assert!(keep_alive(
            &head_with(Version::Http11, "Connection", b"keep-alive")));
    }

    #[test]
    fn fixed_body_releases_for_reuse() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"hello worldEXTRA"],
            Framing::Fixed(11), true);
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello world");
        assert!(reader.is_done());
        assert_eq!(mgr.idle_count(&key()), 1);
    }

    #[test]
    fn eof_body_never_reuses() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"data", b"more"],
            Framing::Eof, true);
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"datamore".to_vec());
        assert_eq!(mgr.idle_count(&key()), 0);
    }

    #[test]
    fn chunked_body_reuses() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr,
            &[b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"],
            Framing::Chunked(::chunked::ChunkedState::new()), true);
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "hello world");
        assert_eq!(mgr.idle_count(&key()), 1);
    }

    #[test]
    fn early_drop_closes() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        {
            let mut reader = reader_over(&mgr, &[b"hell", b"o world"],
                Framing::Fixed(11), true);
            let mut partial = [0u8; 4];
            reader.read(&mut partial).unwrap();
            // dropped with bytes still owed on the wire
        }
        assert_eq!(mgr.idle_count(&key()), 0);
    }

    #[test]
    fn complete_body_releases_even_if_unconsumed() {
        // once the terminator is off the wire the connection is clean,
        // whatever the caller does with the buffered rest
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"hello world"],
            Framing::Fixed(11), true);
        let mut partial = [0u8; 4];
        reader.read(&mut partial).unwrap();
        assert_eq!(mgr.idle_count(&key()), 1);
        // the stashed tail is still readable
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "o world");
    }

    #[test]
    fn empty_framing_releases_immediately() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let reader = reader_over(&mgr, &[], Framing::Empty, true);
        assert!(reader.is_done());
        assert_eq!(mgr.idle_count(&key()), 1);
    }

    #[test]
    fn no_reuse_when_connection_close() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"hello world"],
            Framing::Fixed(11), false);
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(mgr.idle_count(&key()), 0);
    }

    #[test]
    fn truncated_fixed_body_errors() {
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"hel"],
            Framing::Fixed(11), true);
        let mut body = Vec::new();
        assert!(reader.read_to_end(&mut body).is_err());
        assert_eq!(mgr.idle_count(&key()), 0);
    }

    #[test]
    fn gzip_decodes_and_reuses() {
        use std::io::Write;
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use super::Body;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello gzip").unwrap();
        let compressed = encoder.finish().unwrap();

        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let len = compressed.len() as u64;
        let reader = reader_over(&mgr, &[&compressed],
            Framing::Fixed(len), true);
        let mut body = Body::Gzip(::flate2::read::GzDecoder::new(reader));
        let mut decoded = Vec::new();
        body.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, b"hello gzip".to_vec());
        assert_eq!(mgr.idle_count(&key()), 1);
    }

    #[test]
    fn explicit_release_disposition() {
        // the checkout token defaults to DontReuse even when the
        // caller closes mid-body
        let mgr = Manager::new(&ManagerSettings::new()).unwrap();
        let mut reader = reader_over(&mgr, &[b"hello world"],
            Framing::Fixed(11), true);
        reader.close();
        assert_eq!(mgr.idle_count(&key()), 0);
        // close is idempotent
        reader.close();
    }
}
