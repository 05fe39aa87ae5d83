use httparse::{self, parse_chunk_size};

use connection::Connection;
use error::Error;

/// Cap on a single chunk-size line or trailer section
const MAX_FRAMING_BYTES: usize = 4096;

/// Decoder for chunked transfer encoding, reading from a connection
///
/// `read` returns raw body bytes; an empty return means the zero chunk
/// (and any trailers) was consumed and the body is complete.
#[derive(Debug)]
pub struct ChunkedState {
    pending: u64,
    done: bool,
}

impl ChunkedState {
    pub fn new() -> ChunkedState {
        ChunkedState {
            pending: 0,
            done: false,
        }
    }
    pub fn is_done(&self) -> bool {
        self.done
    }
    /// Next run of decoded body bytes; empty exactly when done
    pub fn read(&mut self, conn: &mut Connection) -> Result<Vec<u8>, Error> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.pending == 0 {
            match self.read_chunk_header(conn)? {
                0 => {
                    self.read_trailers(conn)?;
                    self.done = true;
                    return Ok(Vec::new());
                }
                size => self.pending = size,
            }
        }
        let mut data = conn.read().map_err(Error::from_io)?;
        if data.is_empty() {
            return Err(Error::ConnectionClosed);
        }
        if (data.len() as u64) > self.pending {
            let split = self.pending as usize;
            conn.unread(&data[split..]);
            data.truncate(split);
        }
        self.pending -= data.len() as u64;
        if self.pending == 0 {
            let crlf = conn.read_exactly(2).map_err(Error::from_io)?;
            if crlf != b"\r\n" {
                return Err(Error::InvalidChunkHeaders);
            }
        }
        Ok(data)
    }
    /// Parse `<hex-size>[;ext]\r\n`
    fn read_chunk_header(&mut self, conn: &mut Connection)
        -> Result<u64, Error>
    {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            if !buf.is_empty() {
                match parse_chunk_size(&buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        conn.unread(&buf[consumed..]);
                        return Ok(size);
                    }
                    Ok(httparse::Status::Partial) => {}
                    Err(..) => return Err(Error::InvalidChunkHeaders),
                }
                if buf.len() > MAX_FRAMING_BYTES {
                    return Err(Error::InvalidChunkHeaders);
                }
            }
            let chunk = conn.read().map_err(Error::from_io)?;
            if chunk.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk);
        }
    }
    /// Consume optional trailer lines and the final empty line
    fn read_trailers(&mut self, conn: &mut Connection) -> Result<(), Error> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            if buf.starts_with(b"\r\n") {
                conn.unread(&buf[2..]);
                return Ok(());
            }
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                // trailer headers are read and dropped
                conn.unread(&buf[pos + 4..]);
                return Ok(());
            }
            if buf.len() > MAX_FRAMING_BYTES {
                return Err(Error::InvalidChunkHeaders);
            }
            let chunk = conn.read().map_err(Error::from_io)?;
            if chunk.is_empty() {
                return Err(Error::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk);
        }
    }
}

#[cfg(test)]
mod test {
    use connection::Connection;
    use connection::testutil::ScriptedTransport;
    use error::Error;
    use super::ChunkedState;

    fn decode_all(chunks: &[&[u8]]) -> Result<Vec<u8>, Error> {
        let mut conn = Connection::new(ScriptedTransport::new(chunks));
        let mut state = ChunkedState::new();
        let mut out = Vec::new();
        loop {
            let data = state.read(&mut conn)?;
            if data.is_empty() {
                assert!(state.is_done());
                return Ok(out);
            }
            out.extend_from_slice(&data);
        }
    }

    #[test]
    fn simple_body() {
        let body = decode_all(&[b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"])
            .unwrap();
        assert_eq!(body, b"hello world".to_vec());
    }

    #[test]
    fn split_across_reads() {
        let body = decode_all(&[
            b"5", b"\r\nhel", b"lo\r\n6\r\n wor", b"ld\r\n0\r", b"\n\r\n",
        ]).unwrap();
        assert_eq!(body, b"hello world".to_vec());
    }

    #[test]
    fn chunk_extension() {
        let body = decode_all(&[b"5;name=val\r\nhello\r\n0\r\n\r\n"]).unwrap();
        assert_eq!(body, b"hello".to_vec());
    }

    #[test]
    fn trailers_are_dropped() {
        let body = decode_all(&[
            b"5\r\nhello\r\n0\r\nExpires: never\r\n\r\n",
        ]).unwrap();
        assert_eq!(body, b"hello".to_vec());
    }

    #[test]
    fn leftover_stays_on_connection() {
        let mut conn = Connection::new(ScriptedTransport::new(
            &[b"3\r\nabc\r\n0\r\n\r\nHTTP/1.1 200 OK"]));
        let mut state = ChunkedState::new();
        let mut out = Vec::new();
        loop {
            let data = state.read(&mut conn).unwrap();
            if data.is_empty() {
                break;
            }
            out.extend_from_slice(&data);
        }
        assert_eq!(out, b"abc".to_vec());
        assert_eq!(conn.read().unwrap(), b"HTTP/1.1 200 OK".to_vec());
    }

    #[test]
    fn invalid_hex() {
        assert!(matches!(decode_all(&[b"zz\r\nhello\r\n"]),
            Err(Error::InvalidChunkHeaders)));
    }

    #[test]
    fn eof_mid_chunk() {
        assert!(matches!(decode_all(&[b"5\r\nhel"]),
            Err(Error::ConnectionClosed)));
    }

    #[test]
    fn missing_crlf_after_data() {
        assert!(matches!(decode_all(&[b"5\r\nhelloXX0\r\n\r\n"]),
            Err(Error::InvalidChunkHeaders)));
    }
}
