//! WWW-Authenticate parsing and Authorization header construction
//!
//! Implements Basic (RFC 7617) and Digest (RFC 7616/2617 with MD5 and
//! MD5-sess, qop `auth`/`auth-int`) as used by the retry loop of the
//! engine.

#[allow(unused_imports)]
use std::ascii::AsciiExt;

use base64::prelude::*;
use hex;
use md5::{Digest, Md5};
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
}

/// Parsed server challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Digest scheme; `false` covers Basic and anything unknown
    pub digest: bool,
    pub realm: String,
    pub nonce: String,
    pub opaque: String,
    pub algorithm: Algorithm,
    /// Normalised to `auth-int` when the server offers it, `auth` when
    /// any other qop is offered, `None` when the parameter is absent
    pub qop: Option<String>,
}

/// Pull one `key=value` or `key="value"` parameter off the input,
/// returning (key, value, rest)
fn take_param(input: &str) -> Option<(&str, &str, &str)> {
    let input = input.trim_left_matches(
        |c: char| c == ',' || c.is_whitespace());
    if input.is_empty() {
        return None;
    }
    let eq = match input.find('=') {
        Some(idx) => idx,
        None => return Some((input, "", "")),
    };
    let key = input[..eq].trim();
    let rest = &input[eq+1..];
    if rest.starts_with('"') {
        match rest[1..].find('"') {
            Some(end) => {
                Some((key, &rest[1..end+1], &rest[end+2..]))
            }
            None => Some((key, &rest[1..], "")),
        }
    } else {
        let end = rest.find(',').unwrap_or(rest.len());
        Some((key, rest[..end].trim(), &rest[end..]))
    }
}

/// Parse a `WWW-Authenticate` header value
pub fn parse_challenge(value: &str) -> Challenge {
    let value = value.trim();
    let mut challenge = Challenge {
        digest: false,
        realm: String::new(),
        nonce: String::new(),
        opaque: String::new(),
        algorithm: Algorithm::Md5,
        qop: None,
    };
    if value.len() < 6
        || !value.as_bytes()[..6].eq_ignore_ascii_case(b"digest")
    {
        return challenge;
    }
    challenge.digest = true;
    let mut rest = &value[6..];
    while let Some((key, param, next)) = take_param(rest) {
        rest = next;
        if key.eq_ignore_ascii_case("realm") {
            challenge.realm = param.to_string();
        } else if key.eq_ignore_ascii_case("nonce") {
            challenge.nonce = param.to_string();
        } else if key.eq_ignore_ascii_case("opaque") {
            challenge.opaque = param.to_string();
        } else if key.eq_ignore_ascii_case("algorithm") {
            if param.eq_ignore_ascii_case("md5-sess") {
                challenge.algorithm = Algorithm::Md5Sess;
            } else {
                challenge.algorithm = Algorithm::Md5;
            }
        } else if key.eq_ignore_ascii_case("qop") {
            let qop = if param.to_ascii_lowercase().contains("auth-int") {
                "auth-int"
            } else {
                "auth"
            };
            challenge.qop = Some(qop.to_string());
        }
    }
    challenge
}

/// Everything needed to compute one Digest response
#[derive(Debug)]
pub struct DigestContext<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub realm: &'a str,
    pub nonce: &'a str,
    /// Empty when the server sent no opaque parameter
    pub opaque: &'a str,
    pub algorithm: Algorithm,
    pub qop: Option<&'a str>,
    pub cnonce: &'a str,
    pub nc: &'a str,
    pub method: &'a str,
    /// Request target with the leading slash
    pub uri: &'a str,
}

fn md5_hex(parts: &[&[u8]]) -> String {
    let mut hash = Md5::new();
    for part in parts {
        hash.update(part);
    }
    hex::encode(hash.finalize())
}

/// The `response` parameter of the Authorization header, lowercase hex
pub fn digest_response(ctx: &DigestContext) -> String {
    let mut ha1 = md5_hex(&[
        ctx.username.as_bytes(), b":",
        ctx.realm.as_bytes(), b":",
        ctx.password.as_bytes(),
    ]);
    if ctx.algorithm == Algorithm::Md5Sess {
        ha1 = md5_hex(&[
            ha1.as_bytes(), b":",
            ctx.nonce.as_bytes(), b":",
            ctx.cnonce.as_bytes(),
        ]);
    }
    let ha2 = match ctx.qop {
        // the entity hash is left empty by this engine
        Some("auth-int") => md5_hex(&[
            ctx.method.as_bytes(), b":", ctx.uri.as_bytes(), b":",
        ]),
        _ => md5_hex(&[
            ctx.method.as_bytes(), b":", ctx.uri.as_bytes(),
        ]),
    };
    match ctx.qop {
        Some(qop) => md5_hex(&[
            ha1.as_bytes(), b":",
            ctx.nonce.as_bytes(), b":",
            ctx.nc.as_bytes(), b":",
            ctx.cnonce.as_bytes(), b":",
            qop.as_bytes(), b":",
            ha2.as_bytes(),
        ]),
        None => md5_hex(&[
            ha1.as_bytes(), b":",
            ctx.nonce.as_bytes(), b":",
            ha2.as_bytes(),
        ]),
    }
}

/// The full value for the `Authorization` header, Digest scheme
pub fn digest_value(ctx: &DigestContext) -> String {
    let response = digest_response(ctx);
    let mut value = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        ctx.username, ctx.realm, ctx.nonce, ctx.uri);
    if let Some(qop) = ctx.qop {
        value.push_str(&format!(
            ", qop={}, nc={}, cnonce=\"{}\"", qop, ctx.nc, ctx.cnonce));
    }
    value.push_str(&format!(", response=\"{}\"", response));
    if !ctx.opaque.is_empty() {
        value.push_str(&format!(", opaque=\"{}\"", ctx.opaque));
    }
    value
}

/// The full value for the `Authorization` header, Basic scheme
pub fn basic_value(username: &str, password: &str) -> String {
    let pair = format!("{}:{}", username, password);
    format!("Basic {}", BASE64_STANDARD.encode(&pair))
}

/// A fresh client nonce: exactly 8 lowercase hex digits
pub fn make_cnonce() -> String {
    format!("{:08x}", thread_rng().gen::<u32>())
}
