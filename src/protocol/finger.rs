//! Finger (RFC 1288) request parsing.
//!
//! A request is `[/W SP]user`. Forwarding (`user@host`) is refused.

use super::{Protocol, ProtocolError, Request, RequestFlag};

/// Parse a Finger request line (terminator already stripped).
pub fn parse(line: &str) -> Result<Request, ProtocolError> {
    let trimmed = line.trim();
    let (verbose, rest) = match trimmed.strip_prefix("/W") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => (true, rest.trim_start()),
        Some(_) => return Err(ProtocolError::Malformed("unknown finger switch")),
        None => (false, trimmed),
    };

    if rest.contains('@') {
        return Err(ProtocolError::ForwardingRefused);
    }
    if rest.contains(char::is_whitespace) {
        return Err(ProtocolError::Malformed("user names cannot contain spaces"));
    }

    Ok(Request {
        protocol: Protocol::Finger,
        selector: rest.to_string(),
        query: None,
        flag: if verbose { RequestFlag::Verbose } else { RequestFlag::None },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_user() {
        let req = parse("helpful").unwrap();
        assert_eq!(req.selector, "helpful");
        assert_eq!(req.flag, RequestFlag::None);
    }

    #[test]
    fn empty_lists_users() {
        assert_eq!(parse("").unwrap().selector, "");
    }

    #[test]
    fn verbose_flag() {
        let req = parse("/W helpful").unwrap();
        assert_eq!(req.selector, "helpful");
        assert_eq!(req.flag, RequestFlag::Verbose);

        let req = parse("/W").unwrap();
        assert_eq!(req.selector, "");
        assert_eq!(req.flag, RequestFlag::Verbose);
    }

    #[test]
    fn refuses_forwarding() {
        assert!(matches!(parse("user@elsewhere").unwrap_err(), ProtocolError::ForwardingRefused));
    }

    #[test]
    fn rejects_unknown_switch() {
        assert!(parse("/X user").is_err());
        assert!(parse("/Wuser").is_err());
    }
}
