//! The request engine: execute a request against a manager, with
//! cookies, transparent retry, and redirect following

use std::cmp::min;
use std::io::Read;
use std::time::{Duration, Instant, SystemTime};

use flate2::read::GzDecoder;
use url::Url;

use body::{self, Body, BodyReader};
use connection::{tls_handshake, Connection};
use cookie::{self, CookieJar};
use encoder::{self, HeadWriter};
use error::Error;
use head::Head;
use headers;
use parser;
use pool::{Checkout, ConnKey, ManagedConn, Manager};
use proxy::{self, connect_tunnel, Proxy};
use request::{Request, RequestBody};
use status::Status;
use urls;
use version::Version;

/// How long we wait for an interim response after `Expect: 100-continue`
const EXPECT_CONTINUE_WAIT: Duration = Duration::from_secs(1);

/// A response: head, the cookie jar after Set-Cookie processing, and a
/// body — streaming (`Body`) or buffered (`Vec<u8>`)
pub struct Response<B> {
    head: Head,
    cookie_jar: CookieJar,
    body: B,
}

impl<B> Response<B> {
    pub fn status(&self) -> &Status {
        self.head.status()
    }
    pub fn code(&self) -> u16 {
        self.head.code()
    }
    pub fn version(&self) -> Version {
        self.head.version()
    }
    pub fn headers(&self) -> &headers::Headers {
        self.head.headers()
    }
    pub fn head(&self) -> &Head {
        &self.head
    }
    /// The jar with every cookie this exchange (and prior hops) set
    pub fn cookie_jar(&self) -> &CookieJar {
        &self.cookie_jar
    }
    pub fn body(&self) -> &B {
        &self.body
    }
    pub fn body_mut(&mut self) -> &mut B {
        &mut self.body
    }
    pub fn into_body(self) -> B {
        self.body
    }
}

/// Execute a request, following redirects up to its budget
///
/// The streaming response holds a pooled connection until its body is
/// drained or dropped. Most callers want `with_response` or `http_lbs`
/// instead, which scope that lifetime for them.
pub fn perform_request(req: Request, mgr: &Manager)
    -> Result<Response<Body>, Error>
{
    let mut req = req;
    run(&mut req, mgr)
}

/// Scoped streaming access: the action sees an open response, and the
/// connection is accounted for when the scope ends whatever happens
pub fn with_response<T, F>(req: Request, mgr: &Manager, action: F)
    -> Result<T, Error>
    where F: FnOnce(&mut Response<Body>) -> Result<T, Error>
{
    let mut req = req;
    let mut response = run(&mut req, mgr)?;
    action(&mut response)
}

/// Execute a request and buffer the whole response body
pub fn http_lbs(req: Request, mgr: &Manager)
    -> Result<Response<Vec<u8>>, Error>
{
    let mut req = req;
    let response = run(&mut req, mgr)?;
    let Response { head, cookie_jar, mut body } = response;
    let data = body.read_to_vec()?;
    Ok(Response {
        head: head,
        cookie_jar: cookie_jar,
        body: data,
    })
}

/// The redirect loop around single exchanges
fn run(req: &mut Request, mgr: &Manager) -> Result<Response<Body>, Error> {
    let budget = req.redirect_count;
    let mut history: Vec<Head> = Vec::new();
    loop {
        let response = perform(req, mgr)?;
        let follow = budget > 0
            && response.head.status().is_redirect()
            && response.head.headers().has("Location");
        if !follow {
            return Ok(response);
        }
        let head = response.head.clone();
        // drain the intermediate body so its connection can be pooled
        let Response { mut body, .. } = response;
        if let Err(e) = body.read_to_vec() {
            trace!("discarding broken intermediate response: {}", e);
        }
        if history.len() as u32 >= budget {
            return Err(Error::TooManyRedirects(history));
        }
        redirect_request(req, &head)?;
        debug!("following {} redirect to {}", head.code(),
            urls::render_url(req));
        history.push(head);
    }
}

/// Rewrite the request in place for the next hop
fn redirect_request(req: &mut Request, head: &Head) -> Result<(), Error> {
    let location = {
        let raw = head.headers().get("Location")
            .expect("redirect has a Location header");
        match ::std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(..) => {
                return Err(Error::UnparseableRedirect(head.clone()));
            }
        }
    };
    let base = Url::parse(&urls::render_url(req))
        .map_err(|_| Error::UnparseableRedirect(head.clone()))?;
    let target = base.join(&location)
        .map_err(|_| Error::UnparseableRedirect(head.clone()))?;
    let old_host = req.host.clone();
    urls::apply_url(req, &target)
        .map_err(|_| Error::UnparseableRedirect(head.clone()))?;
    if req.host != old_host {
        // credentials pinned to the request don't travel; the jar
        // still applies for the new host
        req.headers.remove("Authorization");
        req.headers.remove("Cookie");
    }
    match head.code() {
        303 => {
            req.method = "GET".to_string();
            req.body = RequestBody::Bytes(Vec::new());
        }
        301 | 302 if req.rewrite_method_on_301_302
            && req.method != "GET" && req.method != "HEAD" =>
        {
            req.method = "GET".to_string();
            req.body = RequestBody::Bytes(Vec::new());
        }
        _ => {}
    }
    Ok(())
}

/// One request/response exchange, with the transparent retry
///
/// A retryable failure on a reused connection gets exactly one more
/// attempt on a fresh dial; failures on fresh connections surface.
fn perform(req: &mut Request, mgr: &Manager) -> Result<Response<Body>, Error> {
    mgr.modify_request(req);
    let deadline = req.response_timeout.map(|t| Instant::now() + t);
    let proxy = proxy::resolve_proxy(req)?;
    let now = SystemTime::now();
    if let Some(jar) = req.cookie_jar.take() {
        let jar = cookie::insert_cookies_into_request(req, jar, now);
        req.cookie_jar = Some(jar);
    }
    let key = ConnKey::for_request(req, proxy.as_ref());
    let mut attempts = 0;
    loop {
        attempts += 1;
        if attempts > 2 {
            return Err(Error::TooManyRetries);
        }
        let (checkout, which) = mgr.acquire(&key,
            || dial(req, proxy.as_ref(), deadline, mgr))?;
        match exchange(req, mgr, checkout, proxy.as_ref(), deadline) {
            Ok(mut response) => {
                if let Some(ref check) = req.check_status {
                    if (&**check)(response.head.status(),
                                  response.head.headers())
                    {
                        return Err(status_error(response));
                    }
                }
                let now = SystemTime::now();
                if let Some(jar) = req.cookie_jar.take() {
                    let jar = cookie::update_cookie_jar(
                        response.head.headers(), req, now, jar);
                    req.cookie_jar = Some(jar.clone());
                    response.cookie_jar = jar;
                }
                return Ok(response);
            }
            Err(e) => {
                if which == ManagedConn::Reused && mgr.is_retryable(&e) {
                    debug!("retrying on a fresh connection after: {}", e);
                    continue;
                }
                return Err(e);
            }
        }
    }
}

fn status_error(response: Response<Body>) -> Error {
    let cookies = response.head.headers().all("Set-Cookie")
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect();
    let Response { head, mut body, .. } = response;
    // one bounded read: a short error body completes its framing and
    // the connection pools; a longer one is abandoned, not drained
    let mut scratch = [0u8; 8192];
    let _ = body.read(&mut scratch);
    if !body.is_done() {
        body.close();
    }
    Error::StatusCode(head.status().clone(), head.headers().clone(), cookies)
}

/// Dial a connection for the request: direct, via CONNECT, or SOCKS
fn dial(req: &Request, proxy: Option<&Proxy>, deadline: Option<Instant>,
    mgr: &Manager)
    -> Result<Connection, Error>
{
    if let Some(ref socks) = req.socks_proxy {
        let tcp = mgr.dial_socks(socks, &req.host, req.port)?;
        return secure_if_needed(req, mgr, tcp);
    }
    if let Some(proxy) = proxy {
        let mut tcp = mgr.dial_raw(&proxy.host, proxy.port, deadline)?;
        if req.secure {
            connect_tunnel(&mut tcp, &req.host, req.port,
                proxy.auth.as_ref().map(|s| &s[..]), deadline)?;
            let tls = tls_handshake(mgr.tls_connector(), &req.host, tcp)?;
            return Ok(Connection::new(tls));
        }
        return Ok(Connection::new(tcp));
    }
    let tcp = mgr.dial_raw(&req.host, req.port, deadline)?;
    secure_if_needed(req, mgr, tcp)
}

fn secure_if_needed(req: &Request, mgr: &Manager,
    tcp: ::std::net::TcpStream)
    -> Result<Connection, Error>
{
    if req.secure {
        let tls = tls_handshake(mgr.tls_connector(), &req.host, tcp)?;
        Ok(Connection::new(tls))
    } else {
        Ok(Connection::new(tcp))
    }
}

/// Re-apply the manager's I/O error funnel to errors that carry one
fn refunnel(mgr: &Manager, err: Error) -> Error {
    match err {
        Error::InternalIo(io) => mgr.wrap_io(io),
        other => other,
    }
}

fn exchange(req: &Request, mgr: &Manager, mut checkout: Checkout,
    proxy: Option<&Proxy>, deadline: Option<Instant>)
    -> Result<Response<Body>, Error>
{
    let (head, framing, reuse) = {
        let conn = checkout.conn();
        conn.set_deadline(deadline).map_err(|e| mgr.wrap_io(e))?;
        let expect_continue = write_head(req, proxy, conn, mgr)?;
        let mut early_head = None;
        if expect_continue {
            let wait = Instant::now() + EXPECT_CONTINUE_WAIT;
            let bounded = Some(deadline.map_or(wait, |d| min(d, wait)));
            conn.set_deadline(bounded).map_err(|e| mgr.wrap_io(e))?;
            match parser::read_head(conn) {
                // interim 100: the server wants the body
                Ok(ref head) if head.code() == 100 => {}
                // a final response instead: the body is aborted
                Ok(head) => early_head = Some(head),
                // silence until the waiting budget ran out: send anyway
                Err(Error::ResponseTimeout) => {}
                Err(e) => return Err(refunnel(mgr, e)),
            }
            conn.set_deadline(deadline).map_err(|e| mgr.wrap_io(e))?;
        }
        let head = match early_head {
            Some(head) => head,
            None => {
                write_body(req, conn, mgr)?;
                read_final_head(conn).map_err(|e| refunnel(mgr, e))?
            }
        };
        let framing = body::body_framing(req.is_head(), head.code(),
            head.headers())?;
        let reuse = body::keep_alive(&head);
        // body reads don't inherit the header deadline
        conn.set_deadline(None).map_err(|e| mgr.wrap_io(e))?;
        (head, framing, reuse)
    };
    let mut head = head;
    let gzip = !req.raw_body
        && head.headers().get("Content-Encoding")
            .map(|v| headers::is_gzip(v)).unwrap_or(false)
        && (&*req.decompress)(
            head.headers().get("Content-Type").unwrap_or(b""));
    if gzip {
        // the caller sees a decoded stream, unambiguously
        head.headers_mut().remove("Content-Encoding");
        head.headers_mut().remove("Content-Length");
    }
    let reader = BodyReader::new(checkout, framing, reuse);
    let body = if gzip {
        Body::Gzip(GzDecoder::new(reader))
    } else {
        Body::Plain(reader)
    };
    Ok(Response {
        head: head,
        cookie_jar: CookieJar::new(),
        body: body,
    })
}

/// Responses may be preceded by unsolicited interim 100s
fn read_final_head(conn: &mut Connection) -> Result<Head, Error> {
    loop {
        let head = parser::read_head(conn)?;
        if head.code() == 100 {
            trace!("skipping interim 100 response");
            continue;
        }
        return Ok(head);
    }
}

/// Serialize and send the request line and headers
///
/// Returns whether the caller asked for `Expect: 100-continue`.
fn write_head(req: &Request, proxy: Option<&Proxy>, conn: &mut Connection,
    mgr: &Manager)
    -> Result<bool, Error>
{
    let plain_proxy = proxy.is_some() && !req.secure
        && req.socks_proxy.is_none();
    let target = if plain_proxy {
        // absolute-form request target through a plain HTTP proxy
        urls::render_url(req)
    } else {
        req.uri()
    };
    let mut writer = HeadWriter::new();
    writer.request_line(&req.method, &target, req.version);
    writer.add_header("Host", req.host_header().as_bytes())?;
    if plain_proxy {
        if let Some(auth) = proxy.and_then(|p| p.auth.as_ref()) {
            writer.add_header("Proxy-Authorization",
                format!("Basic {}", auth).as_bytes())?;
        }
    }
    let mut expect_continue = false;
    for &(ref name, ref value) in req.headers.iter() {
        // these are always computed, whatever the caller put there
        if name.eq_ignore_ascii_case("Host")
            || name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            continue;
        }
        if name.eq_ignore_ascii_case("Expect")
            && headers::is_continue(value)
        {
            expect_continue = true;
        }
        writer.add_header(name, value)?;
    }
    if !req.raw_body && !req.headers.has("Accept-Encoding") {
        writer.add_header("Accept-Encoding", b"gzip")?;
    }
    match req.body.content_length() {
        Some(n) => writer.add_length(n)?,
        None => writer.add_chunked()?,
    }
    let buf = writer.done();
    conn.write_all(&buf[..]).map_err(|e| mgr.wrap_io(e))?;
    Ok(expect_continue)
}

fn write_body(req: &Request, conn: &mut Connection, mgr: &Manager)
    -> Result<(), Error>
{
    let result = match req.body {
        RequestBody::Bytes(ref bytes) => {
            if bytes.is_empty() {
                Ok(())
            } else {
                conn.write_all(bytes)
            }
        }
        RequestBody::Builder(len, ref writer) => {
            encoder::write_builder_body(conn, len, &**writer)
        }
        RequestBody::Stream(len, ref source) => {
            encoder::write_stream_body(conn, len, &**source)
        }
        RequestBody::StreamChunked(ref source) => {
            encoder::write_chunked_body(conn, &**source)
        }
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if (&*req.on_body_write_error)(&e) {
                debug!("body write failed ({}), reading response anyway", e);
                Ok(())
            } else {
                Err(mgr.wrap_io(e))
            }
        }
    }
}
