use std::fmt;

/// The HTTP dialect of a message
///
/// Requests go out as 1.1 unless the caller overrides; responses carry
/// whatever the server answered with. Nothing outside the 1.x family
/// is representable, which is all this client speaks.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Classify a parsed status line by its minor digit
    ///
    /// The head parser only admits `HTTP/1.x` responses, so the minor
    /// digit is the whole story: zero means 1.0, everything else is
    /// treated as 1.1.
    pub fn from_minor(minor: u8) -> Version {
        if minor == 0 { Version::Http10 } else { Version::Http11 }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Version;

    #[test]
    fn wire_format() {
        assert_eq!(format!("{}", Version::Http11), "HTTP/1.1");
        assert_eq!(format!("{}", Version::Http10), "HTTP/1.0");
    }

    #[test]
    fn minor_digit() {
        assert_eq!(Version::from_minor(0), Version::Http10);
        assert_eq!(Version::from_minor(1), Version::Http11);
    }
}
