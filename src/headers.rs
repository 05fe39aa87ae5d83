use std::slice;
use std::str::from_utf8;

/// Ordered list of header name/value pairs
///
/// Order of insertion is preserved on the wire. Lookup compares names
/// case-insensitively, values are opaque bytes.
#[derive(Debug, Clone)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    pub fn new() -> Headers {
        Headers(Vec::new())
    }
    pub fn add<V: Into<Vec<u8>>>(&mut self, name: &str, value: V) {
        self.0.push((name.to_string(), value.into()));
    }
    /// First value of the header, if any
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }
    /// First value of the header decoded as utf-8
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| from_utf8(v).ok())
    }
    pub fn all<'a>(&'a self, name: &'a str)
        -> impl Iterator<Item=&'a [u8]> + 'a
    {
        self.0.iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
    /// Drop every occurrence of the header
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
    }
    /// Replace every occurrence with a single one
    pub fn set<V: Into<Vec<u8>>>(&mut self, name: &str, value: V) {
        self.remove(name);
        self.add(name, value);
    }
    pub fn iter(&self) -> slice::Iter<(String, Vec<u8>)> {
        self.0.iter()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
pub fn is_close(val: &[u8]) -> bool {
    token_is(val, b"close")
}

// header value is byte sequence
// we need case insensitive comparison and strip out of the whitespace
pub fn is_chunked(val: &[u8]) -> bool {
    token_is(val, b"chunked")
}

pub fn is_keep_alive(val: &[u8]) -> bool {
    token_is(val, b"keep-alive")
}

pub fn is_continue(val: &[u8]) -> bool {
    token_is(val, b"100-continue")
}

pub fn is_gzip(val: &[u8]) -> bool {
    token_is(val, b"gzip")
}

fn token_is(val: &[u8], token: &[u8]) -> bool {
    if val.len() < token.len() {
        return false;
    }
    let mut iter = val.iter();
    for (idx, &ch) in iter.by_ref().enumerate() {
        match ch {
            b'\r' | b'\n' | b' ' | b'\t' => continue,
            _ if ch.to_ascii_lowercase() == token[0] => {
                if idx + token.len() > val.len() {
                    return false;
                }
                break;
            }
            _ => return false,
        }
    }
    for (idx, ch) in iter.by_ref().take(token.len() - 1).enumerate() {
        if token[idx + 1] != ch.to_ascii_lowercase() {
            return false;
        }
    }
    for &ch in iter {
        if !matches!(ch, b'\r' | b'\n' | b' ' | b'\t') {
            return false;
        }
    }
    return true;
}

/// Does any comma-separated element of the value match the token?
pub fn any_element<F: Fn(&[u8]) -> bool>(val: &[u8], pred: F) -> bool {
    val.split(|&x| x == b',').any(|el| pred(el))
}

#[cfg(test)]
mod test {
    use super::{Headers, is_chunked, is_close, is_continue, is_keep_alive};
    use super::any_element;

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"chuNKED"));
        assert!(is_chunked(b"CHUNKED"));
        assert!(is_chunked(b"   CHUNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(is_chunked(b"chunked  "));
        assert!(!is_chunked(b"   CHUNKED 1 "));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b"Close"));
        assert!(is_close(b"clOSE"));
        assert!(is_close(b"CLOSE"));
        assert!(is_close(b" CLOSE"));
        assert!(is_close(b"   close   "));
        assert!(!is_close(b"Close  1 "));
        assert!(!is_close(b" xclose   "));
    }

    #[test]
    fn test_keep_alive() {
        assert!(is_keep_alive(b"keep-alive"));
        assert!(is_keep_alive(b"Keep-Alive"));
        assert!(is_keep_alive(b"  KEEP-ALIVE "));
        assert!(!is_keep_alive(b"keep"));
        assert!(!is_keep_alive(b"keep-alive2"));
    }

    #[test]
    fn test_continue() {
        assert!(is_continue(b"100-continue"));
        assert!(is_continue(b"100-Continue"));
        assert!(is_continue(b"100-conTINUE"));
        assert!(is_continue(b"  100-CONTINUE"));
        assert!(!is_continue(b"100-continue y  "));
        assert!(!is_continue(b"100-coztinue   "));
    }

    #[test]
    fn test_elements() {
        assert!(any_element(b"gzip, chunked", is_chunked));
        assert!(any_element(b"chunked", is_chunked));
        assert!(!any_element(b"gzip, identity", is_chunked));
    }

    #[test]
    fn test_lookup() {
        let mut h = Headers::new();
        h.add("Content-Type", &b"text/plain"[..]);
        h.add("Set-Cookie", &b"a=b"[..]);
        h.add("Set-Cookie", &b"c=d"[..]);
        assert_eq!(h.get("content-type"), Some(&b"text/plain"[..]));
        assert_eq!(h.all("set-cookie").count(), 2);
        assert!(h.has("SET-COOKIE"));
        h.set("set-cookie", &b"e=f"[..]);
        assert_eq!(h.all("set-cookie").count(), 1);
        h.remove("Set-Cookie");
        assert!(!h.has("set-cookie"));
        assert_eq!(h.len(), 1);
    }
}
