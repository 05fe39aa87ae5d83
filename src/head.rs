use headers::Headers;
use status::Status;
use version::Version;

/// A parsed response head: status line and headers, no body.
///
/// This is what the wire parser yields, what redirect history is made of,
/// and what errors carry when they need to describe a response.
#[derive(Debug, Clone)]
pub struct Head {
    status: Status,
    version: Version,
    headers: Headers,
}

impl Head {
    pub fn new(status: Status, version: Version, headers: Headers) -> Head {
        Head {
            status: status,
            version: version,
            headers: headers,
        }
    }
    pub fn status(&self) -> &Status {
        &self.status
    }
    pub fn code(&self) -> u16 {
        self.status.code()
    }
    pub fn reason(&self) -> &str {
        self.status.reason()
    }
    pub fn version(&self) -> Version {
        self.version
    }
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
}
