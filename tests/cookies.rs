extern crate httpc;

use std::time::{Duration, SystemTime};

use httpc::cookie::{evict_expired_cookies, insert_cookies_into_request,
    parse_set_cookie, receive_set_cookie, update_cookie_jar, CookieJar};
use httpc::{parse_url, Headers};

fn now() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

#[test]
fn update_then_insert_round_trip() {
    // every eligible cookie set by the response must come back on the
    // next matching request, longest path first, oldest first
    let req = parse_url("http://example.com/a/b").unwrap();
    let mut response_headers = Headers::new();
    response_headers.add("Set-Cookie", &b"shallow=1; Path=/"[..]);
    response_headers.add("Set-Cookie", &b"deep=2; Path=/a"[..]);
    response_headers.add("Set-Cookie", &b"other=3; Path=/zzz"[..]);
    let jar = update_cookie_jar(&response_headers, &req, now(),
        CookieJar::new());
    assert_eq!(jar.len(), 3);

    let mut next = parse_url("http://example.com/a/c").unwrap();
    let jar = insert_cookies_into_request(&mut next, jar, now());
    assert_eq!(next.headers.get_str("Cookie"), Some("deep=2; shallow=1"));
    assert_eq!(jar.len(), 3);
}

#[test]
fn creation_order_breaks_path_ties() {
    let req = parse_url("http://example.com/").unwrap();
    let old = parse_set_cookie(b"old=1; Path=/").unwrap();
    let new = parse_set_cookie(b"new=2; Path=/").unwrap();
    let jar = receive_set_cookie(&old, &req, now(), true, CookieJar::new());
    let jar = receive_set_cookie(&new, &req,
        now() + Duration::from_secs(5), true, jar);
    let mut next = parse_url("http://example.com/").unwrap();
    insert_cookies_into_request(&mut next, jar,
        now() + Duration::from_secs(10));
    assert_eq!(next.headers.get_str("Cookie"), Some("old=1; new=2"));
}

#[test]
fn caller_cookie_header_is_replaced() {
    let req = parse_url("http://example.com/").unwrap();
    let sc = parse_set_cookie(b"real=1").unwrap();
    let jar = receive_set_cookie(&sc, &req, now(), true, CookieJar::new());
    let mut next = parse_url("http://example.com/").unwrap();
    next.add_header("Cookie", &b"stale=1"[..]);
    insert_cookies_into_request(&mut next, jar, now());
    assert_eq!(next.headers.get_str("Cookie"), Some("real=1"));
    assert_eq!(next.headers.all("Cookie").count(), 1);
}

#[test]
fn expired_cookies_never_escape() {
    let req = parse_url("http://example.com/").unwrap();
    let sc = parse_set_cookie(b"gone=1; Max-Age=10").unwrap();
    let jar = receive_set_cookie(&sc, &req, now(), true, CookieJar::new());

    let later = now() + Duration::from_secs(60);
    let jar = evict_expired_cookies(jar, later);
    assert!(jar.is_empty());
    for cookie in jar.cookies() {
        assert!(cookie.expiry >= later);
    }
}

#[test]
fn eviction_happens_on_insert_too() {
    let req = parse_url("http://example.com/").unwrap();
    let sc = parse_set_cookie(b"brief=1; Max-Age=10").unwrap();
    let jar = receive_set_cookie(&sc, &req, now(), true, CookieJar::new());
    let mut next = parse_url("http://example.com/").unwrap();
    let jar = insert_cookies_into_request(&mut next, jar,
        now() + Duration::from_secs(60));
    assert_eq!(next.headers.get("Cookie"), None);
    assert!(jar.is_empty());
}

#[test]
fn subdomain_cookie_scoping() {
    let req = parse_url("http://www.example.com/").unwrap();
    let sc = parse_set_cookie(b"shared=1; Domain=example.com").unwrap();
    let jar = receive_set_cookie(&sc, &req, now(), true, CookieJar::new());

    // a sibling subdomain sees the domain cookie
    let mut sibling = parse_url("http://api.example.com/").unwrap();
    let jar = insert_cookies_into_request(&mut sibling, jar, now());
    assert_eq!(sibling.headers.get_str("Cookie"), Some("shared=1"));

    // an unrelated host does not
    let mut other = parse_url("http://example.org/").unwrap();
    insert_cookies_into_request(&mut other, jar, now());
    assert_eq!(other.headers.get("Cookie"), None);
}

#[test]
fn host_only_cookie_stays_home() {
    let req = parse_url("http://example.com/").unwrap();
    let sc = parse_set_cookie(b"local=1").unwrap();
    let jar = receive_set_cookie(&sc, &req, now(), true, CookieJar::new());
    assert!(jar.cookies()[0].host_only);

    let mut sub = parse_url("http://www.example.com/").unwrap();
    insert_cookies_into_request(&mut sub, jar, now());
    assert_eq!(sub.headers.get("Cookie"), None);
}
