use url::Url;

use error::Error;
use request::Request;

/// Characters that survive `url_encode` untouched
fn is_unreserved(b: u8) -> bool {
    matches!(b,
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~')
}

/// Percent-encode a byte string for use in a query component
///
/// Unreserved characters pass through, space becomes `+`, everything
/// else becomes `%HH` with uppercase hex. The encoding is injective.
pub fn url_encode(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        if is_unreserved(b) {
            out.push(b as char);
        } else if b == b' ' {
            out.push('+');
        } else {
            out.push('%');
            out.push(to_hex(b >> 4));
            out.push(to_hex(b & 0xf));
        }
    }
    out
}

fn to_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 10) as char,
    }
}

/// Render `k=v&k2=v2` with both sides percent-encoded
pub fn render_query<K, V>(pairs: &[(K, V)]) -> String
    where K: AsRef<[u8]>, V: AsRef<[u8]>,
{
    let mut out = String::new();
    for (idx, &(ref k, ref v)) in pairs.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.push_str(&url_encode(k.as_ref()));
        out.push('=');
        out.push_str(&url_encode(v.as_ref()));
    }
    out
}

/// Parse an `http://` or `https://` URL into a default GET request
pub fn parse_url(s: &str) -> Result<Request, Error> {
    let url = Url::parse(s)
        .map_err(|e| Error::InvalidUrl(s.to_string(), e.to_string()))?;
    let mut req = request_from_url(s, &url)?;
    if url.username() != "" || url.password().is_some() {
        let user = url.username().to_string();
        let pass = url.password().unwrap_or("").to_string();
        req.basic_auth(&user, &pass);
    }
    Ok(req)
}

fn request_from_url(original: &str, url: &Url) -> Result<Request, Error> {
    let secure = match url.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(Error::InvalidUrl(original.to_string(),
            format!("unsupported scheme {:?}", other))),
    };
    let host = url.host_str()
        .ok_or_else(|| Error::InvalidUrl(original.to_string(),
            "missing host".to_string()))?;
    let port = url.port().unwrap_or(if secure { 443 } else { 80 });
    let mut req = Request::new(secure, host, port);
    apply_target(&mut req, url);
    Ok(req)
}

/// Rewrite the target of a request in place (used by redirects)
pub fn apply_url(req: &mut Request, url: &Url) -> Result<(), Error> {
    let secure = match url.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(Error::InvalidUrl(url.as_str().to_string(),
            format!("unsupported scheme {:?}", other))),
    };
    let host = url.host_str()
        .ok_or_else(|| Error::InvalidUrl(url.as_str().to_string(),
            "missing host".to_string()))?;
    req.secure = secure;
    req.host = host.to_string();
    req.port = url.port().unwrap_or(if secure { 443 } else { 80 });
    apply_target(req, url);
    Ok(())
}

fn apply_target(req: &mut Request, url: &Url) {
    req.path = url.path().to_string();
    if req.path.is_empty() {
        req.path = "/".to_string();
    }
    req.query = url.query().map(|q| q.as_bytes().to_vec())
        .unwrap_or_else(Vec::new);
}

/// The effective URL of a request, default ports elided
pub fn render_url(req: &Request) -> String {
    let mut out = String::new();
    out.push_str(if req.secure { "https://" } else { "http://" });
    out.push_str(&req.host);
    let default_port = if req.secure { 443 } else { 80 };
    if req.port != default_port {
        out.push_str(&format!(":{}", req.port));
    }
    out.push_str(&req.path);
    if !req.query.is_empty() {
        out.push('?');
        out.push_str(&String::from_utf8_lossy(&req.query));
    }
    out
}
