//! RFC 6265 cookie storage and matching
//!
//! The jar is a caller-owned value: the engine takes it from the
//! request, returns the updated jar on the response, and never shares
//! it between threads. Identity of a cookie is `(name, domain, path)`;
//! the emission order (longest path first, then earliest creation) is
//! part of the contract.

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use httpdate::parse_http_date;

use headers::Headers;
use request::Request;

/// Session cookies get a far-future expiry instead of an option dance
const SESSION_LIFETIME: Duration = Duration::from_secs(1000 * 365 * 86400);

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expiry: SystemTime,
    pub domain: String,
    pub path: String,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub persistent: bool,
    pub host_only: bool,
    pub secure_only: bool,
    pub http_only: bool,
}

/// Cookie identity is `(name, domain, path)`
impl PartialEq for Cookie {
    fn eq(&self, other: &Cookie) -> bool {
        self.name == other.name
            && self.domain == other.domain
            && self.path == other.path
    }
}

impl Eq for Cookie {}

/// Emission order: longer path first, then earlier creation
impl Ord for Cookie {
    fn cmp(&self, other: &Cookie) -> Ordering {
        other.path.len().cmp(&self.path.len())
            .then(self.creation_time.cmp(&other.creation_time))
    }
}

impl PartialOrd for Cookie {
    fn partial_cmp(&self, other: &Cookie) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A set of cookies under the `(name, domain, path)` identity
#[derive(Debug, Clone)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
    reject_public_suffixes: bool,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar {
            cookies: Vec::new(),
            reject_public_suffixes: true,
        }
    }
    pub fn from_cookies(cookies: Vec<Cookie>) -> CookieJar {
        CookieJar {
            cookies: cookies,
            reject_public_suffixes: true,
        }
    }
    /// Consult the public-suffix oracle when a Domain attribute comes in
    ///
    /// On by default. A cookie whose Domain names a public suffix is
    /// refused unless the request host is that suffix itself. Turning
    /// this off skips the oracle entirely.
    pub fn reject_public_suffixes(&mut self, value: bool) -> &mut Self {
        self.reject_public_suffixes = value;
        self
    }
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }
    pub fn len(&self) -> usize {
        self.cookies.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
    fn take_identical(&mut self, cookie: &Cookie) -> Option<Cookie> {
        let pos = self.cookies.iter().position(|c| c == cookie);
        pos.map(|p| self.cookies.remove(p))
    }
}

/// RFC 6265 §5.1.3
///
/// Exact equality, or the jar domain is a dot-preceded suffix of the
/// request host and the host is not an IPv4 literal.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    if host == domain {
        return true;
    }
    host.ends_with(&format!(".{}", domain))
        && host.parse::<Ipv4Addr>().is_err()
}

/// RFC 6265 §5.1.4
pub fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    if request_path.starts_with(cookie_path) {
        return cookie_path.ends_with('/')
            || request_path[cookie_path.len()..].starts_with('/');
    }
    false
}

/// The directory component of the request path, including the final
/// slash; `/` when the path is empty, relative, or a single segment
pub fn default_path(request_path: &str) -> String {
    if request_path.is_empty() || !request_path.starts_with('/') {
        return "/".to_string();
    }
    let idx = request_path.rfind('/').expect("checked for a slash");
    if idx == 0 {
        "/".to_string()
    } else {
        request_path[..idx + 1].to_string()
    }
}

/// Oracle for the public-suffix rejection of domain attributes
///
/// Consulted only while the jar's `reject_public_suffixes` flag is on.
/// Integration point for a real public suffix list; without one no
/// domain is considered a public suffix and nothing is rejected.
fn is_public_suffix(_domain: &str) -> bool {
    false
}

/// A parsed `Set-Cookie` header value
#[derive(Debug, Clone, PartialEq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<SystemTime>,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

/// RFC 6265 §5.2: split the name/value pair and the known attributes,
/// ignore everything unknown. `None` means the header is no cookie.
pub fn parse_set_cookie(raw: &[u8]) -> Option<SetCookie> {
    let raw = String::from_utf8_lossy(raw).into_owned();
    let mut parts = raw.split(';');
    let first = parts.next().expect("split yields at least one element");
    let eq = match first.find('=') {
        Some(idx) => idx,
        None => return None,
    };
    let name = first[..eq].trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = SetCookie {
        name: name.to_string(),
        value: first[eq + 1..].trim().to_string(),
        expires: None,
        max_age: None,
        domain: None,
        path: None,
        secure: false,
        http_only: false,
    };
    for attr in parts {
        let (key, value) = match attr.find('=') {
            Some(idx) => (attr[..idx].trim(), attr[idx + 1..].trim()),
            None => (attr.trim(), ""),
        };
        if key.eq_ignore_ascii_case("expires") {
            if let Ok(time) = parse_http_date(value) {
                cookie.expires = Some(time);
            }
        } else if key.eq_ignore_ascii_case("max-age") {
            if valid_max_age(value) {
                cookie.max_age = value.parse().ok();
            }
        } else if key.eq_ignore_ascii_case("domain") {
            if !value.is_empty() {
                cookie.domain = Some(value.to_ascii_lowercase());
            }
        } else if key.eq_ignore_ascii_case("path") {
            if value.starts_with('/') {
                cookie.path = Some(value.to_string());
            }
        } else if key.eq_ignore_ascii_case("secure") {
            cookie.secure = true;
        } else if key.eq_ignore_ascii_case("httponly") {
            cookie.http_only = true;
        }
    }
    Some(cookie)
}

fn valid_max_age(value: &str) -> bool {
    let digits = value.trim_start_matches('-');
    !digits.is_empty() && value.len() - digits.len() <= 1
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// RFC 6265 §5.3: admit one parsed Set-Cookie into the jar
///
/// `http_api` tells whether the caller is allowed to touch HttpOnly
/// cookies; the engine always passes true.
pub fn receive_set_cookie(set_cookie: &SetCookie, req: &Request,
    now: SystemTime, http_api: bool, jar: CookieJar)
    -> CookieJar
{
    let mut jar = jar;
    // Max-Age wins over Expires; neither means a session cookie
    let (expiry, persistent) = if let Some(age) = set_cookie.max_age {
        let expiry = if age < 0 {
            now.checked_sub(Duration::from_secs(-age as u64))
                .unwrap_or(UNIX_EPOCH)
        } else {
            now + Duration::from_secs(age as u64)
        };
        (expiry, true)
    } else if let Some(expires) = set_cookie.expires {
        (expires, true)
    } else {
        (now + SESSION_LIFETIME, false)
    };
    let mut domain = match set_cookie.domain {
        Some(ref d) => {
            if d.ends_with('.') {
                return jar;
            }
            if d.starts_with('.') { d[1..].to_string() } else { d.clone() }
        }
        None => String::new(),
    };
    let request_host = req.host.to_ascii_lowercase();
    if jar.reject_public_suffixes && !domain.is_empty()
        && is_public_suffix(&domain)
    {
        if request_host == domain {
            domain = String::new();
        } else {
            return jar;
        }
    }
    let host_only = if domain.is_empty() {
        domain = request_host;
        true
    } else {
        if !domain_matches(&request_host, &domain) {
            return jar;
        }
        false
    };
    if set_cookie.http_only && !http_api {
        return jar;
    }
    let path = match set_cookie.path {
        Some(ref p) => p.clone(),
        None => default_path(&req.path),
    };
    let mut cookie = Cookie {
        name: set_cookie.name.clone(),
        value: set_cookie.value.clone(),
        expiry: expiry,
        domain: domain,
        path: path,
        creation_time: now,
        last_access_time: now,
        persistent: persistent,
        host_only: host_only,
        secure_only: set_cookie.secure,
        http_only: set_cookie.http_only,
    };
    if let Some(old) = jar.take_identical(&cookie) {
        if old.http_only && !http_api {
            // put it back, the caller may not replace it
            jar.cookies.push(old);
            return jar;
        }
        cookie.creation_time = old.creation_time;
    }
    jar.cookies.push(cookie);
    jar
}

/// The Cookie header value for the request, or `None` when nothing
/// matches. Expired cookies are evicted, access times updated.
pub fn compute_cookie_string(req: &Request, jar: &mut CookieJar,
    now: SystemTime, http_api: bool)
    -> Option<String>
{
    jar.cookies.retain(|c| c.expiry >= now);
    let request_host = req.host.to_ascii_lowercase();
    let mut matching: Vec<&mut Cookie> = jar.cookies.iter_mut()
        .filter(|c| {
            let domain_ok = if c.host_only {
                request_host == c.domain
            } else {
                domain_matches(&request_host, &c.domain)
            };
            domain_ok
                && path_matches(&req.path, &c.path)
                && (!c.secure_only || req.secure)
                && (!c.http_only || http_api)
        })
        .collect();
    if matching.is_empty() {
        return None;
    }
    matching.sort();
    let mut out = String::new();
    for cookie in matching.iter_mut() {
        cookie.last_access_time = now;
        if !out.is_empty() {
            out.push_str("; ");
        }
        out.push_str(&cookie.name);
        out.push('=');
        out.push_str(&cookie.value);
    }
    Some(out)
}

/// Rewrite the request's Cookie header from the jar
///
/// Any caller-provided Cookie header is replaced wholesale.
pub fn insert_cookies_into_request(req: &mut Request, jar: CookieJar,
    now: SystemTime)
    -> CookieJar
{
    let mut jar = jar;
    match compute_cookie_string(req, &mut jar, now, true) {
        Some(value) => {
            req.headers.set("Cookie", value.into_bytes());
        }
        None => {
            req.headers.remove("Cookie");
        }
    }
    jar
}

/// Fold every `Set-Cookie` of a response into the jar
pub fn update_cookie_jar(response_headers: &Headers, req: &Request,
    now: SystemTime, jar: CookieJar)
    -> CookieJar
{
    let mut jar = jar;
    for raw in response_headers.all("Set-Cookie") {
        if let Some(set_cookie) = parse_set_cookie(raw) {
            jar = receive_set_cookie(&set_cookie, req, now, true, jar);
        } else {
            trace!("ignoring malformed Set-Cookie");
        }
    }
    jar
}

/// Drop every cookie that expired before `now`
pub fn evict_expired_cookies(jar: CookieJar, now: SystemTime) -> CookieJar {
    let mut jar = jar;
    jar.cookies.retain(|c| c.expiry >= now);
    jar
}
