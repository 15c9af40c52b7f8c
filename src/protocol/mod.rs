//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Raw bytes from the client
//!     → read_request_line (CRLF framing, length cap)
//!     → gopher.rs / gemini.rs / finger.rs (protocol-specific parsing)
//!     → Request { selector, query, flag }
//!     → Dispatcher
//!
//! Response bytes to the client
//!     → response.rs (ResponseWriter: status lines, menus, text, terminator)
//!     → sanitize::escape (applied to every content line)
//! ```
//!
//! # Design Decisions
//! - Framing is identical for all three protocols: one request line, CRLF
//! - A bare LF is tolerated, a missing terminator is not
//! - Parsing never allocates more than the capped request line

pub mod finger;
pub mod gemini;
pub mod gopher;
pub mod response;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub use response::{BoxedWriter, ClientWriter, LinkKind, ResponseWriter};

/// Maximum request line length in bytes, excluding the terminator.
pub const MAX_REQUEST_LINE: usize = 1024;

/// The three line-oriented protocols served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Gopher,
    Gemini,
    Finger,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Gopher => "gopher",
            Protocol::Gemini => "gemini",
            Protocol::Finger => "finger",
        }
    }

    /// Whether responses end with a terminator line (`.`).
    pub fn has_terminator(&self) -> bool {
        matches!(self, Protocol::Gopher)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional per-request flag carried by some protocols.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestFlag {
    #[default]
    None,
    /// Finger `/W` verbose request.
    Verbose,
    /// Gopher+ attribute/resource request (`+...` or `$...`).
    GopherPlus(String),
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub protocol: Protocol,
    /// Path-like selector (Finger: the requested user name).
    pub selector: String,
    /// Search string, if the protocol carried one.
    pub query: Option<String>,
    pub flag: RequestFlag,
}

impl Request {
    pub fn new(protocol: Protocol, selector: impl Into<String>) -> Self {
        Self {
            protocol,
            selector: selector.into(),
            query: None,
            flag: RequestFlag::None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Errors produced while framing or parsing a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request line exceeds {0} bytes")]
    TooLong(usize),

    #[error("connection closed before a complete request line")]
    Incomplete,

    #[error("request is not valid UTF-8")]
    InvalidUtf8,

    #[error("request contains control characters")]
    ControlCharacter,

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("forwarding requests are refused")]
    ForwardingRefused,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one request line, stripping the CRLF (or bare LF) terminator.
///
/// At most `max_len + 2` bytes are consumed from the reader.
pub async fn read_request_line<R>(reader: &mut R, max_len: usize) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let limit = (max_len + 2) as u64;
    let n = reader.take(limit).read_until(b'\n', &mut buf).await?;

    if n == 0 {
        return Err(ProtocolError::Incomplete);
    }
    if buf.last() != Some(&b'\n') {
        return if n as u64 >= limit {
            Err(ProtocolError::TooLong(max_len))
        } else {
            Err(ProtocolError::Incomplete)
        };
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > max_len {
        return Err(ProtocolError::TooLong(max_len));
    }

    let line = String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)?;
    if line.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ProtocolError::ControlCharacter);
    }
    Ok(line)
}

/// Parse a request line according to the listener's protocol.
pub fn parse_request(protocol: Protocol, line: &str) -> Result<Request, ProtocolError> {
    match protocol {
        Protocol::Gopher => gopher::parse(line),
        Protocol::Gemini => gemini::parse(line),
        Protocol::Finger => finger::parse(line),
    }
}
