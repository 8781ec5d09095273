//! Path encoding and URL splitting for the location properties

use url::Url;

const HEX: &'static [u8; 16] = b"0123456789ABCDEF";

/// Percent-encode a path for the request line
///
/// Control bytes, space and non-ASCII are encoded; unreserved and
/// reserved characters pass through untouched.  `%` itself is preserved
/// so that encoding an already-encoded path is a no-op.
pub fn encode_path(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if b <= 0x20 || b >= 0x7f {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0xf) as usize] as char);
        } else {
            out.push(b as char);
        }
    }
    out
}

/// The directory prefix of a path, up to and including the last slash
pub fn directory(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx + 1],
        None => "",
    }
}

/// Components of an absolute `http://` or `https://` URL
#[derive(Debug, PartialEq, Eq)]
pub struct Location {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    /// Path plus query, with the leading slash still attached
    pub path: String,
}

/// Split an absolute URL; returns `None` for anything without an
/// `http://` or `https://` prefix (relative locations go through the
/// path setter instead)
pub fn parse_location(value: &str) -> Option<Location> {
    let (ssl, rest) = if value.starts_with("https://") {
        (true, &value[8..])
    } else if value.starts_with("http://") {
        (false, &value[7..])
    } else {
        return None;
    };
    let default_port = if ssl { 443 } else { 80 };
    if let Ok(url) = Url::parse(value) {
        if let Some(host) = url.host_str() {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            return Some(Location {
                host: host.to_string(),
                port: url.port().unwrap_or(default_port),
                ssl: ssl,
                path: path,
            });
        }
    }
    // Degenerate URLs (out-of-range port and the like) are still split on
    // a best-effort basis, with the port falling back to 80
    let (hostport, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (host, port) = match hostport.rfind(':') {
        Some(idx) => {
            let port = match hostport[idx+1..].parse::<u32>() {
                Ok(n) if n >= 1 && n <= 65535 => n as u16,
                _ => 80,
            };
            (&hostport[..idx], port)
        }
        None => (hostport, default_port),
    };
    if host.is_empty() {
        return None;
    }
    Some(Location {
        host: host.to_string(),
        port: port,
        ssl: ssl,
        path: path.to_string(),
    })
}
