use std::io::Write;

use httparse;
use netbuf::Buf;

use connection::Connection;
use error::Error;
use head::Head;
use headers::Headers;
use status::Status;
use version::Version;

/// A hard cap on the accumulated response head
pub const MAX_HEAD_LENGTH: usize = 4096;
/// Number of headers to allocate on a stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Read a response head off the connection
///
/// Accumulates reads until the first blank line, pushes everything past
/// it back into the connection, unfolds obsolete header continuations,
/// and parses the rest. Never keeps more than `MAX_HEAD_LENGTH` bytes.
pub fn read_head(conn: &mut Connection) -> Result<Head, Error> {
    let mut buf = Buf::new();
    let end;
    loop {
        if let Some(e) = find_head_end(&buf[..]) {
            end = e;
            break;
        }
        if buf.len() > MAX_HEAD_LENGTH {
            return Err(Error::OverlongHeaders);
        }
        let chunk = conn.read().map_err(Error::from_io)?;
        if chunk.is_empty() {
            if buf.len() == 0 {
                // nothing at all: on a reused connection this is the
                // keep-alive race, which the retry layer may swallow
                return Err(Error::NoResponseDataReceived);
            }
            return Err(Error::ConnectionClosed);
        }
        buf.write_all(&chunk).expect("in-memory buffer write");
    }
    if end > MAX_HEAD_LENGTH {
        return Err(Error::OverlongHeaders);
    }
    conn.unread(&buf[end..]);
    let unfolded = unfold(&buf[..end]);
    parse_head(&unfolded)
}

/// Index just past the first `\r\n\r\n`, if present
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Join continuation lines (leading SP/HT) to the previous header
/// value with a single space
fn unfold(head: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(head.len());
    let mut i = 0;
    while i < head.len() {
        if head[i] == b'\r' && i + 2 < head.len() && head[i + 1] == b'\n'
            && (head[i + 2] == b' ' || head[i + 2] == b'\t')
        {
            i += 2;
            while i < head.len() && (head[i] == b' ' || head[i] == b'\t') {
                i += 1;
            }
            out.push(b' ');
        } else {
            out.push(head[i]);
            i += 1;
        }
    }
    out
}

fn parse_head(bytes: &[u8]) -> Result<Head, Error> {
    let mut vec;
    let mut stack_headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut raw = httparse::Response::new(&mut stack_headers);
    let mut result = raw.parse(bytes);
    if matches!(result, Err(httparse::Error::TooManyHeaders)) {
        vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Response::new(&mut vec);
        result = raw.parse(bytes);
    }
    match result {
        Ok(httparse::Status::Complete(..)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(Error::InvalidHeader(lossy_line(bytes)));
        }
        Err(httparse::Error::Status) | Err(httparse::Error::Version) => {
            return Err(Error::InvalidStatusLine(lossy_line(bytes)));
        }
        Err(..) => {
            return Err(Error::InvalidHeader(lossy_line(bytes)));
        }
    }
    let status = Status::new(raw.code.expect("code is parsed"),
                             raw.reason.unwrap_or(""));
    let version = Version::from_minor(raw.version.expect("version is parsed"));
    let mut headers = Headers::new();
    for h in raw.headers.iter() {
        headers.add(h.name, h.value);
    }
    Ok(Head::new(status, version, headers))
}

/// First line of the head, lossily decoded and truncated, for errors
fn lossy_line(bytes: &[u8]) -> String {
    let line = bytes.split(|&b| b == b'\r' || b == b'\n')
        .next().unwrap_or(b"");
    let mut s = String::from_utf8_lossy(line).into_owned();
    s.truncate(128);
    s
}

#[cfg(test)]
mod test {
    use connection::Connection;
    use connection::testutil::ScriptedTransport;
    use error::Error;
    use version::Version;
    use super::read_head;

    fn conn(chunks: &[&[u8]]) -> Connection {
        Connection::new(ScriptedTransport::new(chunks))
    }

    #[test]
    fn split_across_reads() {
        let mut c = conn(&[
            b"HTTP/", b"1.1 200", b" OK\r\nfoo", b": bar\r\n",
            b"baz:bin\r\n\r", b"\nignored",
        ]);
        let head = read_head(&mut c).unwrap();
        assert_eq!(head.code(), 200);
        assert_eq!(head.version(), Version::Http11);
        let hdrs: Vec<_> = head.headers().iter()
            .map(|&(ref n, ref v)| (n.clone(), v.clone()))
            .collect();
        assert_eq!(hdrs, vec![
            ("foo".to_string(), b"bar".to_vec()),
            ("baz".to_string(), b"bin".to_vec()),
        ]);
        // leftover bytes stay in the pushback buffer
        assert_eq!(c.read().unwrap(), b"ignored".to_vec());
    }

    #[test]
    fn continuation_lines() {
        let mut c = conn(&[
            b"HTTP/1.1 200 OK\r\nfoo: bar\r\n   \tbaz\r\n\r\n",
        ]);
        let head = read_head(&mut c).unwrap();
        assert_eq!(head.headers().get("foo"), Some(&b"bar baz"[..]));
    }

    #[test]
    fn http_10() {
        let mut c = conn(&[b"HTTP/1.0 204 No Content\r\n\r\n"]);
        let head = read_head(&mut c).unwrap();
        assert_eq!(head.version(), Version::Http10);
        assert_eq!(head.reason(), "No Content");
    }

    #[test]
    fn no_data_at_all() {
        let mut c = conn(&[]);
        assert!(matches!(read_head(&mut c),
            Err(Error::NoResponseDataReceived)));
    }

    #[test]
    fn eof_mid_head() {
        let mut c = conn(&[b"HTTP/1.1 200 OK\r\nfoo"]);
        assert!(matches!(read_head(&mut c), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn overlong() {
        let filler = vec![b'x'; 5000];
        let mut head = b"HTTP/1.1 200 OK\r\nbig: ".to_vec();
        head.extend_from_slice(&filler);
        head.extend_from_slice(b"\r\n\r\n");
        let mut c = conn(&[&head[..4096], &head[4096..]]);
        assert!(matches!(read_head(&mut c), Err(Error::OverlongHeaders)));
    }

    #[test]
    fn bad_status_line() {
        let mut c = conn(&[b"HTP/1.1 200 OK\r\n\r\n"]);
        assert!(matches!(read_head(&mut c),
            Err(Error::InvalidStatusLine(..))));
    }
}
