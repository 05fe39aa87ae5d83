use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use base64;

use cookie::CookieJar;
use headers::Headers;
use proxy::{Proxy, ProxySetting, SocksProxy};
use status::Status;
use urls::render_query;
use version::Version;

/// Default redirect budget
pub const DEFAULT_REDIRECT_COUNT: u32 = 10;
/// Default deadline for connect + send + receive-headers
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A byte producer that can be restarted from the beginning
///
/// Streaming request bodies must be replayable: a retry or a redirect
/// re-obtains the bytes by calling `start()` again, and every run must
/// yield the same sequence.
pub trait BodySource: Send {
    fn start(&self) -> io::Result<Box<dyn Read + Send>>;
}

/// A restartable source built from a closure producing fresh readers
pub struct FnSource<F>(pub F);

impl<F> BodySource for FnSource<F>
    where F: Fn() -> io::Result<Box<dyn Read + Send>> + Send
{
    fn start(&self) -> io::Result<Box<dyn Read + Send>> {
        (self.0)()
    }
}

/// In-memory sources are trivially restartable
impl BodySource for Vec<u8> {
    fn start(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.clone())))
    }
}

/// The body of an outgoing request
pub enum RequestBody {
    /// Known bytes, identity encoded
    Bytes(Vec<u8>),
    /// Known length; the writer emits exactly that many bytes
    Builder(u64, Box<dyn Fn(&mut dyn Write) -> io::Result<()> + Send>),
    /// Known length; a restartable lazy source of exactly that many bytes
    Stream(u64, Box<dyn BodySource>),
    /// Unknown length, sent with chunked transfer encoding
    StreamChunked(Box<dyn BodySource>),
}

impl RequestBody {
    /// The Content-Length to send, or `None` for chunked encoding
    pub fn content_length(&self) -> Option<u64> {
        match *self {
            RequestBody::Bytes(ref b) => Some(b.len() as u64),
            RequestBody::Builder(len, _) => Some(len),
            RequestBody::Stream(len, _) => Some(len),
            RequestBody::StreamChunked(..) => None,
        }
    }
    pub fn is_empty_bytes(&self) -> bool {
        matches!(*self, RequestBody::Bytes(ref b) if b.is_empty())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RequestBody::Bytes(ref b)
                => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Builder(len, _) => write!(f, "Builder({})", len),
            RequestBody::Stream(len, _) => write!(f, "Stream({})", len),
            RequestBody::StreamChunked(..) => write!(f, "StreamChunked"),
        }
    }
}

/// A single HTTP request value
///
/// `Host`, `Content-Length` and `Transfer-Encoding` are always computed
/// by the engine; values in `headers` under those names are ignored.
pub struct Request {
    pub method: String,
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Query string bytes without the leading `?`
    pub query: Vec<u8>,
    pub headers: Headers,
    pub body: RequestBody,
    pub http_proxy: ProxySetting,
    pub socks_proxy: Option<SocksProxy>,
    /// Expose the body exactly as it came off the wire
    pub raw_body: bool,
    /// Given the Content-Type, should a gzip body be decoded?
    pub decompress: Arc<dyn Fn(&[u8]) -> bool + Send + Sync>,
    /// Redirect budget; zero disables following entirely
    pub redirect_count: u32,
    /// Restore the historic rewrite of non-GET methods on 301/302
    ///
    /// Off by default: method and body are preserved across 301/302
    /// the same way they are across 307/308.
    pub rewrite_method_on_301_302: bool,
    /// Reject a response by status and headers; `true` means reject
    pub check_status: Option<Arc<dyn Fn(&Status, &Headers) -> bool
        + Send + Sync>>,
    /// Deadline covering connect + send + receive-headers
    pub response_timeout: Option<Duration>,
    pub version: Version,
    pub cookie_jar: Option<CookieJar>,
    /// Decides whether a failed body write is swallowed so that a
    /// response (say, an early 413) can still be read
    pub on_body_write_error: Arc<dyn Fn(&io::Error) -> bool + Send + Sync>,
}

impl Request {
    /// A GET request for `/` on the given origin
    pub fn new(secure: bool, host: &str, port: u16) -> Request {
        Request {
            method: "GET".to_string(),
            secure: secure,
            host: host.to_string(),
            port: port,
            path: "/".to_string(),
            query: Vec::new(),
            headers: Headers::new(),
            body: RequestBody::Bytes(Vec::new()),
            http_proxy: ProxySetting::Env,
            socks_proxy: None,
            raw_body: false,
            decompress: Arc::new(|_: &[u8]| true),
            redirect_count: DEFAULT_REDIRECT_COUNT,
            rewrite_method_on_301_302: false,
            check_status: None,
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            version: Version::Http11,
            cookie_jar: Some(CookieJar::new()),
            on_body_write_error: Arc::new(|e: &io::Error| matches!(e.kind(),
                io::ErrorKind::BrokenPipe |
                io::ErrorKind::ConnectionReset |
                io::ErrorKind::ConnectionAborted)),
        }
    }
    /// Set the method, uppercased
    pub fn method(&mut self, method: &str) -> &mut Self {
        self.method = method.to_ascii_uppercase();
        self
    }
    pub fn add_header<V: Into<Vec<u8>>>(&mut self, name: &str, value: V)
        -> &mut Self
    {
        self.headers.add(name, value);
        self
    }
    pub fn body(&mut self, body: RequestBody) -> &mut Self {
        self.body = body;
        self
    }
    pub fn body_bytes<B: Into<Vec<u8>>>(&mut self, bytes: B) -> &mut Self {
        self.body = RequestBody::Bytes(bytes.into());
        self
    }
    /// Send `pairs` as an `application/x-www-form-urlencoded` body
    pub fn form_body<K, V>(&mut self, pairs: &[(K, V)]) -> &mut Self
        where K: AsRef<[u8]>, V: AsRef<[u8]>,
    {
        self.headers.set("Content-Type",
            &b"application/x-www-form-urlencoded"[..]);
        self.body = RequestBody::Bytes(render_query(pairs).into_bytes());
        if self.method == "GET" {
            self.method = "POST".to_string();
        }
        self
    }
    /// Add an `Authorization: Basic` header
    pub fn basic_auth(&mut self, user: &str, password: &str) -> &mut Self {
        let token = base64::encode(&format!("{}:{}", user, password));
        self.headers.set("Authorization", format!("Basic {}", token));
        self
    }
    pub fn http_proxy(&mut self, proxy: Proxy) -> &mut Self {
        self.http_proxy = ProxySetting::Use(proxy);
        self
    }
    /// Never use an HTTP proxy, even if the environment names one
    pub fn no_proxy(&mut self) -> &mut Self {
        self.http_proxy = ProxySetting::Disabled;
        self
    }
    pub fn socks_proxy(&mut self, proxy: SocksProxy) -> &mut Self {
        self.socks_proxy = Some(proxy);
        self
    }
    pub fn raw_body(&mut self, value: bool) -> &mut Self {
        self.raw_body = value;
        self
    }
    pub fn redirect_count(&mut self, value: u32) -> &mut Self {
        self.redirect_count = value;
        self
    }
    pub fn rewrite_method_on_301_302(&mut self, value: bool) -> &mut Self {
        self.rewrite_method_on_301_302 = value;
        self
    }
    pub fn response_timeout(&mut self, value: Option<Duration>) -> &mut Self {
        self.response_timeout = value;
        self
    }
    /// Reject every non-2xx response with a `StatusCode` error
    pub fn throw_on_status_errors(&mut self) -> &mut Self {
        self.check_status = Some(Arc::new(
            |status: &Status, _: &Headers| !status.is_success()));
        self
    }
    pub fn cookie_jar(&mut self, jar: CookieJar) -> &mut Self {
        self.cookie_jar = Some(jar);
        self
    }
    /// Request target in origin form: path plus optional query
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, String::from_utf8_lossy(&self.query))
        }
    }
    /// The Host header value, default port elided
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

#[cfg(test)]
mod test {
    use super::{Request, RequestBody};

    #[test]
    fn defaults() {
        let req = Request::new(false, "example.com", 80);
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri(), "/");
        assert_eq!(req.host_header(), "example.com");
        assert_eq!(req.redirect_count, 10);
        assert!(matches!(req.body, RequestBody::Bytes(ref b) if b.is_empty()));
    }

    #[test]
    fn host_header_port() {
        assert_eq!(Request::new(false, "h", 8080).host_header(), "h:8080");
        assert_eq!(Request::new(true, "h", 443).host_header(), "h");
        assert_eq!(Request::new(true, "h", 80).host_header(), "h:80");
    }

    #[test]
    fn form_body_switches_method() {
        let mut req = Request::new(false, "example.com", 80);
        req.form_body(&[("a", "1 2")]);
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers.get("content-type"),
            Some(&b"application/x-www-form-urlencoded"[..]));
        assert!(matches!(req.body,
            RequestBody::Bytes(ref b) if b == b"a=1+2"));
    }

    #[test]
    fn basic_auth_header() {
        let mut req = Request::new(false, "example.com", 80);
        req.basic_auth("user", "pass");
        // "user:pass" in base64
        assert_eq!(req.headers.get("authorization"),
            Some(&b"Basic dXNlcjpwYXNz"[..]));
    }
}
