//! A blocking HTTP/1.1 client
//!
//! The pieces: a `Manager` pooling keep-alive connections (with a
//! background reaper), a streaming request/response engine with
//! transparent retry and redirect following, and an RFC 6265 cookie
//! jar. Bodies stream in both directions; TLS comes from `native-tls`,
//! gzip decoding from `flate2`.
//!
//! ```no_run
//! let mgr = httpc::Manager::new(&httpc::ManagerSettings::new()).unwrap();
//! let req = httpc::parse_url("http://example.com/").unwrap();
//! let response = httpc::http_lbs(req, &mgr).unwrap();
//! assert_eq!(response.code(), 200);
//! ```
extern crate base64;
extern crate flate2;
extern crate httparse;
extern crate httpdate;
extern crate native_tls;
extern crate netbuf;
extern crate url;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod cookie;

mod body;
mod chunked;
mod client;
mod connection;
mod encoder;
mod error;
mod head;
mod headers;
mod parser;
mod pool;
mod proxy;
mod request;
mod status;
mod urls;
mod version;

pub use body::{body_framing, keep_alive, Body, BodyReader, Framing};
pub use client::{http_lbs, perform_request, with_response, Response};
pub use connection::{dial_tcp, tls_handshake, Connection, Transport};
pub use connection::READ_CHUNK;
pub use cookie::{Cookie, CookieJar};
pub use error::Error;
pub use head::Head;
pub use headers::Headers;
pub use parser::{read_head, MAX_HEAD_LENGTH};
pub use pool::{Checkout, ConnKey, Disposition, ManagedConn};
pub use pool::{Manager, ManagerSettings};
pub use proxy::{parse_proxy_url, resolve_proxy};
pub use proxy::{Proxy, ProxySetting, SocksProxy};
pub use request::{BodySource, FnSource, Request, RequestBody};
pub use status::Status;
pub use urls::{parse_url, render_query, render_url, url_encode};
pub use version::Version;
