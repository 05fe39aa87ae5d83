use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use native_tls::TlsConnector;

use connection::Connection;
use error::Error;
use proxy::{Proxy, SocksProxy};
use request::Request;

pub type RawDialer = Arc<dyn Fn(&str, u16, Option<Instant>)
    -> Result<TcpStream, Error> + Send + Sync>;
pub type SocksDialer = Arc<dyn Fn(&SocksProxy, &str, u16)
    -> io::Result<TcpStream> + Send + Sync>;
pub type WrapIo = Arc<dyn Fn(io::Error) -> Error + Send + Sync>;
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;
pub type ModifyRequest = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// Identity under which idle connections are pooled
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnKey {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    /// Rendered proxy address, if the connection goes through one
    pub proxy: Option<String>,
}

impl ConnKey {
    pub fn for_request(req: &Request, proxy: Option<&Proxy>) -> ConnKey {
        let proxy_key = if let Some(ref sp) = req.socks_proxy {
            Some(format!("socks5://{}:{}", sp.host, sp.port))
        } else if let Some(p) = proxy {
            Some(format!("http://{}:{}", p.host, p.port))
        } else {
            None
        };
        ConnKey {
            host: req.host.clone(),
            port: req.port,
            secure: req.secure,
            proxy: proxy_key,
        }
    }
}

/// Whether a connection was just dialed or drawn from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedConn {
    Fresh,
    Reused,
}

/// What happens to the connection when its checkout ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back into the pool under its key
    Reuse,
    /// Close the socket
    DontReuse,
}

/// Fine-grained configuration of the connection manager
#[derive(Clone)]
pub struct ManagerSettings {
    idle_timeout: Duration,
    conn_count: usize,
    wrap_io: WrapIo,
    retryable: RetryPredicate,
    modify_request: ModifyRequest,
    raw_dialer: Option<RawDialer>,
    tls_connector: Option<Arc<TlsConnector>>,
    socks_dialer: Option<SocksDialer>,
}

impl ManagerSettings {
    /// Create settings with defaults
    pub fn new() -> ManagerSettings {
        ManagerSettings {
            idle_timeout: Duration::from_secs(30),
            conn_count: 10,
            wrap_io: Arc::new(Error::from_io),
            retryable: Arc::new(Error::is_retryable),
            modify_request: Arc::new(|_: &mut Request| ()),
            raw_dialer: None,
            tls_connector: None,
            socks_dialer: None,
        }
    }
    /// How long an idle connection may sit in the pool
    pub fn idle_timeout(&mut self, value: Duration) -> &mut Self {
        self.idle_timeout = value;
        self
    }
    /// Number of idle connections kept per key
    pub fn conn_count(&mut self, value: usize) -> &mut Self {
        self.conn_count = value;
        self
    }
    /// The single funnel re-typing raw I/O errors
    pub fn wrap_io(&mut self, value: WrapIo) -> &mut Self {
        self.wrap_io = value;
        self
    }
    /// Which failures on a reused connection allow a transparent retry
    pub fn retryable(&mut self, value: RetryPredicate) -> &mut Self {
        self.retryable = value;
        self
    }
    /// Hook run on every request before execution
    pub fn modify_request(&mut self, value: ModifyRequest) -> &mut Self {
        self.modify_request = value;
        self
    }
    pub fn raw_dialer(&mut self, value: RawDialer) -> &mut Self {
        self.raw_dialer = Some(value);
        self
    }
    /// TLS context used for https origins (and CONNECT upgrades)
    pub fn tls_connector(&mut self, value: Arc<TlsConnector>) -> &mut Self {
        self.tls_connector = Some(value);
        self
    }
    /// External SOCKS dialer; without one SOCKS requests fail
    pub fn socks_dialer(&mut self, value: SocksDialer) -> &mut Self {
        self.socks_dialer = Some(value);
        self
    }
}

struct PoolState {
    conns: HashMap<ConnKey, Vec<(Connection, Instant)>>,
    closed: bool,
}

pub struct Core {
    state: Mutex<PoolState>,
    wakeup: Condvar,
    idle_timeout: Duration,
    conn_count: usize,
    wrap_io: WrapIo,
    retryable: RetryPredicate,
    modify_request: ModifyRequest,
    raw_dialer: Option<RawDialer>,
    tls: Arc<TlsConnector>,
    socks_dialer: Option<SocksDialer>,
}

impl Core {
    fn close(&self) {
        let victims = {
            let mut state = self.state.lock().expect("pool lock");
            if state.closed {
                return;
            }
            state.closed = true;
            self.wakeup.notify_all();
            state.conns.drain().flat_map(|(_, v)| v).collect::<Vec<_>>()
        };
        for (mut conn, _) in victims {
            conn.close();
        }
    }
    fn put(&self, key: &ConnKey, conn: Connection) {
        if conn.is_closed() {
            return;
        }
        let mut conn = Some(conn);
        {
            let mut state = self.state.lock().expect("pool lock");
            if !state.closed {
                let vec = state.conns.entry(key.clone())
                    .or_insert_with(Vec::new);
                if vec.len() < self.conn_count {
                    vec.push((conn.take().expect("conn present"),
                              Instant::now()));
                    self.wakeup.notify_all();
                }
            }
        }
        if let Some(mut conn) = conn {
            trace!("pool refused connection to {:?}, closing", key);
            conn.close();
        }
    }
}

/// Finalizer: the pool closes when the last manager handle goes away
struct CloseOnDrop {
    core: Arc<Core>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.core.close();
    }
}

/// A shared pool of keep-alive connections
///
/// Cheap to clone; all clones talk to the same pool. The pool closes
/// when `close` is called or when the last handle is dropped, whichever
/// comes first. A background reaper evicts connections that sat idle
/// longer than the idle timeout.
#[derive(Clone)]
pub struct Manager {
    core: Arc<Core>,
    _finalizer: Arc<CloseOnDrop>,
}

impl Manager {
    /// Create a manager and spawn its reaper thread
    pub fn new(settings: &ManagerSettings) -> Result<Manager, Error> {
        let tls = match settings.tls_connector {
            Some(ref connector) => connector.clone(),
            None => Arc::new(TlsConnector::new()?),
        };
        let core = Arc::new(Core {
            state: Mutex::new(PoolState {
                conns: HashMap::new(),
                closed: false,
            }),
            wakeup: Condvar::new(),
            idle_timeout: settings.idle_timeout,
            conn_count: settings.conn_count,
            wrap_io: settings.wrap_io.clone(),
            retryable: settings.retryable.clone(),
            modify_request: settings.modify_request.clone(),
            raw_dialer: settings.raw_dialer.clone(),
            tls: tls,
            socks_dialer: settings.socks_dialer.clone(),
        });
        let reaper = core.clone();
        let _detached = thread::Builder::new()
            .name("httpc-reaper".to_string())
            .spawn(move || reaper_loop(&reaper))
            .map_err(Error::InternalIo)?;
        Ok(Manager {
            _finalizer: Arc::new(CloseOnDrop { core: core.clone() }),
            core: core,
        })
    }
    /// Close the pool: every idle connection is closed, every future
    /// acquire fails with `ManagerClosed`. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().expect("pool lock").closed
    }
    /// Take an idle connection for the key, or dial a fresh one
    ///
    /// The idle head is removed under the lock; `dial` runs outside of
    /// it. The returned checkout owns the connection and closes it on
    /// drop unless released with `Reuse`, so no failure between here
    /// and release can leak a socket.
    pub fn acquire<F>(&self, key: &ConnKey, dial: F)
        -> Result<(Checkout, ManagedConn), Error>
        where F: FnOnce() -> Result<Connection, Error>
    {
        {
            let mut state = self.core.state.lock().expect("pool lock");
            if state.closed {
                return Err(Error::ManagerClosed);
            }
            if let Some(vec) = state.conns.get_mut(key) {
                if let Some((conn, _)) = vec.pop() {
                    debug!("reusing connection for {}:{}",
                        key.host, key.port);
                    return Ok((Checkout::new(self.core.clone(), key, conn),
                               ManagedConn::Reused));
                }
            }
        }
        let conn = dial()?;
        debug!("dialed fresh connection for {}:{}", key.host, key.port);
        Ok((Checkout::new(self.core.clone(), key, conn), ManagedConn::Fresh))
    }
    /// Number of idle connections pooled under the key
    pub fn idle_count(&self, key: &ConnKey) -> usize {
        self.core.state.lock().expect("pool lock")
            .conns.get(key).map(|v| v.len()).unwrap_or(0)
    }
    pub fn wrap_io(&self, err: io::Error) -> Error {
        (&*self.core.wrap_io)(err)
    }
    pub fn is_retryable(&self, err: &Error) -> bool {
        (&*self.core.retryable)(err)
    }
    pub fn modify_request(&self, req: &mut Request) {
        (&*self.core.modify_request)(req)
    }
    pub fn dial_raw(&self, host: &str, port: u16, deadline: Option<Instant>)
        -> Result<TcpStream, Error>
    {
        match self.core.raw_dialer {
            Some(ref dialer) => (&**dialer)(host, port, deadline),
            None => ::connection::dial_tcp(host, port, deadline),
        }
    }
    pub fn tls_connector(&self) -> &TlsConnector {
        &self.core.tls
    }
    pub fn dial_socks(&self, conf: &SocksProxy, host: &str, port: u16)
        -> Result<TcpStream, Error>
    {
        match self.core.socks_dialer {
            Some(ref dialer) => (&**dialer)(conf, host, port)
                .map_err(|e| self.wrap_io(e)),
            None => Err(Error::InternalIo(io::Error::new(
                io::ErrorKind::Other, "no SOCKS dialer configured"))),
        }
    }
}

/// An acquired connection plus its release token
///
/// The token starts as `DontReuse`: whatever happens between acquire
/// and drop, the socket is either back in the pool (after an explicit
/// `release(Reuse)`) or closed. Never dangling.
pub struct Checkout {
    core: Arc<Core>,
    key: ConnKey,
    conn: Option<Connection>,
    disposition: Disposition,
}

impl Checkout {
    fn new(core: Arc<Core>, key: &ConnKey, conn: Connection) -> Checkout {
        Checkout {
            core: core,
            key: key.clone(),
            conn: Some(conn),
            disposition: Disposition::DontReuse,
        }
    }
    pub fn conn(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("checkout holds a connection")
    }
    pub fn key(&self) -> &ConnKey {
        &self.key
    }
    /// Flip the token and apply it immediately
    pub fn release(mut self, disposition: Disposition) {
        self.disposition = disposition;
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            match self.disposition {
                Disposition::Reuse => self.core.put(&self.key, conn),
                Disposition::DontReuse => conn.close(),
            }
        }
    }
}

/// Evicts connections that sat idle past the timeout
///
/// Sleeps on the condvar while the pool is empty; closes victims
/// outside the critical section; exits when the pool closes.
fn reaper_loop(core: &Core) {
    let mut state = core.state.lock().expect("pool lock");
    loop {
        if state.closed {
            return;
        }
        if state.conns.values().all(|v| v.is_empty()) {
            state = core.wakeup.wait(state).expect("pool lock");
            continue;
        }
        let (guard, _) = core.wakeup
            .wait_timeout(state, core.idle_timeout / 2)
            .expect("pool lock");
        state = guard;
        if state.closed {
            return;
        }
        let now = Instant::now();
        let mut victims = Vec::new();
        for (_, vec) in state.conns.iter_mut() {
            let mut i = 0;
            while i < vec.len() {
                if now.duration_since(vec[i].1) >= core.idle_timeout {
                    victims.push(vec.swap_remove(i));
                } else {
                    i += 1;
                }
            }
        }
        state.conns.retain(|_, v| !v.is_empty());
        if !victims.is_empty() {
            debug!("reaper evicting {} idle connections", victims.len());
            drop(state);
            for (mut conn, _) in victims {
                conn.close();
            }
            state = core.state.lock().expect("pool lock");
        }
    }
}
