//! Gemini request parsing.
//!
//! A request is one absolute `gemini://` URL. The path is the selector and the
//! percent-decoded query component is the query.

use url::Url;

use super::{Protocol, ProtocolError, Request, RequestFlag};

/// Parse a Gemini request line (terminator already stripped).
pub fn parse(line: &str) -> Result<Request, ProtocolError> {
    let url = Url::parse(line).map_err(|_| ProtocolError::Malformed("not an absolute URL"))?;

    if url.scheme() != "gemini" {
        return Err(ProtocolError::Malformed("unsupported scheme"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProtocolError::Malformed("missing host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ProtocolError::Malformed("userinfo is not allowed"));
    }

    let path = percent_decode(url.path())?;
    let selector = if path.is_empty() { "/".to_string() } else { path };
    let query = match url.query() {
        Some(q) if !q.is_empty() => Some(percent_decode(q)?),
        _ => None,
    };

    Ok(Request {
        protocol: Protocol::Gemini,
        selector,
        query,
        flag: RequestFlag::None,
    })
}

/// Decode `%XX` escapes. `+` is a literal plus in Gemini queries.
pub fn percent_decode(input: &str) -> Result<String, ProtocolError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or(ProtocolError::Malformed("bad percent escape"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Encode a path segment or query for use in a `gemini://` link.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
