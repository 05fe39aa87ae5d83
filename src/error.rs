use std::io;

use native_tls;

use head::Head;
use headers::Headers;
use status::Status;


quick_error! {
    #[derive(Debug)]
    /// The single error taxonomy of the client
    pub enum Error {
        /// The URL (or proxy URL) could not be turned into a request
        InvalidUrl(url: String, reason: String) {
            description("invalid URL")
            display("invalid URL {:?}: {}", url, reason)
        }
        /// The status check hook rejected the response
        ///
        /// Carries the head of the response and its `Set-Cookie` values
        StatusCode(status: Status, headers: Headers, cookies: Vec<String>) {
            description("unacceptable status code")
            display("unacceptable status code: {}", status)
        }
        /// Redirect budget exhausted; history in chronological order
        TooManyRedirects(history: Vec<Head>) {
            description("too many redirects")
            display("too many redirects ({} followed)", history.len())
        }
        /// A redirect response whose Location can't be resolved
        UnparseableRedirect(head: Head) {
            description("unparseable redirect location")
            display("unparseable redirect location in {} response",
                head.status())
        }
        /// The transparent retry budget was exhausted
        TooManyRetries {
            description("too many retries")
        }
        /// The response deadline expired
        ResponseTimeout {
            description("timed out waiting for the response headers")
        }
        /// TCP connect (or tunnel establishment) timed out
        ConnectionTimeout {
            description("timed out establishing a connection")
        }
        /// Peer closed the connection in the middle of a message
        ConnectionClosed {
            description("connection closed prematurely")
        }
        /// Not a single byte of response arrived
        ///
        /// Distinct from `ConnectionClosed` because on a reused
        /// connection this is the normal keep-alive race and is safe
        /// to retry
        NoResponseDataReceived {
            description("no response data received")
        }
        /// Status line that doesn't look like `HTTP/1.x <code> <reason>`
        InvalidStatusLine(line: String) {
            description("invalid status line")
            display("invalid status line: {:?}", line)
        }
        /// Malformed header line
        InvalidHeader(line: String) {
            description("invalid header")
            display("invalid header: {:?}", line)
        }
        /// Response head longer than the fixed cap
        OverlongHeaders {
            description("response headers too long")
        }
        /// Malformed chunked transfer encoding
        InvalidChunkHeaders {
            description("invalid chunk headers")
        }
        /// Both Content-Length and chunked encoding were present
        ResponseLengthAndChunkingBothUsed {
            description("response used both content-length and chunking")
        }
        /// HTTP proxy refused the CONNECT request
        ProxyConnect(host: String, port: u16, status: Status) {
            description("proxy refused CONNECT")
            display("proxy refused CONNECT to {}:{}: {}", host, port, status)
        }
        /// TLS handshake or record-layer failure
        Tls(err: native_tls::Error) {
            description("TLS error")
            display("TLS error: {}", err)
            from()
        }
        /// I/O (basically networking) error occured during request
        InternalIo(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
        /// The manager was closed while requests were still using it
        ManagerClosed {
            description("connection manager is closed")
        }
    }
}

impl Error {
    /// Default re-typing of raw I/O errors
    ///
    /// This is the default `wrap_io` hook of the manager. Timeouts map to
    /// `ResponseTimeout`, truncation to `ConnectionClosed`.
    pub fn from_io(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                => Error::ResponseTimeout,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::InternalIo(err),
        }
    }
    /// Recover a typed error smuggled through `io::Error` by the body
    /// stream's `Read` implementation
    pub fn from_body_io(err: io::Error) -> Error {
        let typed = err.get_ref()
            .map(|inner| inner.is::<Error>())
            .unwrap_or(false);
        if typed {
            let inner = err.into_inner().unwrap();
            return *inner.downcast::<Error>().unwrap();
        }
        Error::from_io(err)
    }
    /// The default retryable-exception predicate
    ///
    /// Only failures that can happen when the server closed a pooled
    /// connection under us qualify; anything else must surface.
    pub fn is_retryable(&self) -> bool {
        match *self {
            Error::ConnectionClosed => true,
            Error::NoResponseDataReceived => true,
            Error::InternalIo(ref e) => matches!(e.kind(),
                io::ErrorKind::ConnectionReset |
                io::ErrorKind::ConnectionAborted |
                io::ErrorKind::BrokenPipe |
                io::ErrorKind::UnexpectedEof),
            _ => false,
        }
    }
}
