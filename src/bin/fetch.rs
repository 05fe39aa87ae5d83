extern crate httpc;

use std::env;
use std::io::{self, Read, Write};
use std::process::exit;

use httpc::{Error, Manager, ManagerSettings};

pub struct Options {
    pub url: String,
    pub dump_header: bool,
}

fn parse_args() -> Option<Options> {
    let mut url = None;
    let mut dump_header = false;
    for arg in env::args().skip(1) {
        if arg == "-D" || arg == "--dump-header" {
            dump_header = true;
        } else if url.is_none() {
            url = Some(arg);
        } else {
            return None;
        }
    }
    url.map(|url| Options {
        url: url,
        dump_header: dump_header,
    })
}

fn fetch(options: &Options) -> Result<(), Error> {
    let req = httpc::parse_url(&options.url)?;
    let mgr = Manager::new(&ManagerSettings::new())?;
    let dump_header = options.dump_header;
    let result = httpc::with_response(req, &mgr, |response| {
        if dump_header {
            let mut err = io::stderr();
            writeln!(&mut err, "HTTP/1.x {} {}",
                response.code(), response.status().reason())
                .map_err(Error::InternalIo)?;
            for &(ref name, ref value) in response.headers().iter() {
                writeln!(&mut err, "{}: {}",
                    name, String::from_utf8_lossy(value))
                    .map_err(Error::InternalIo)?;
            }
        }
        let mut out = io::stdout();
        let mut chunk = [0u8; 8192];
        loop {
            let n = response.body_mut().read(&mut chunk)
                .map_err(Error::from_body_io)?;
            if n == 0 {
                return Ok(());
            }
            out.write_all(&chunk[..n]).map_err(Error::InternalIo)?;
        }
    });
    mgr.close();
    result
}

pub fn main() {
    let options = match parse_args() {
        Some(options) => options,
        None => {
            let _ = writeln!(&mut io::stderr(),
                "Usage: fetch [-D|--dump-header] URL");
            exit(2);
        }
    };
    match fetch(&options) {
        Ok(()) => {}
        Err(e) => {
            let _ = writeln!(&mut io::stderr(), "fetch: {}", e);
            exit(1);
        }
    }
}
