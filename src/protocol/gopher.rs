//! Gopher (RFC 1436) request parsing.
//!
//! A request is `selector[TAB query[TAB flag]]`. The optional third field is
//! the Gopher+ resource flag (`+`, `+ATTRIBUTE`, `$`).

use super::{Protocol, ProtocolError, Request, RequestFlag};

/// Parse a Gopher request line (terminator already stripped).
pub fn parse(line: &str) -> Result<Request, ProtocolError> {
    let mut fields = line.splitn(3, '\t');
    let selector = fields.next().unwrap_or_default();
    let query = fields.next();
    let flag = match fields.next() {
        None => RequestFlag::None,
        Some(f) if f.starts_with('+') || f.starts_with('$') => {
            RequestFlag::GopherPlus(f.to_string())
        }
        Some(_) => return Err(ProtocolError::Malformed("unexpected third field")),
    };

    if flag != RequestFlag::None && query.is_none() {
        return Err(ProtocolError::Malformed("flag without query field"));
    }

    Ok(Request {
        protocol: Protocol::Gopher,
        selector: normalize_selector(selector),
        query: query.filter(|q| !q.is_empty()).map(str::to_string),
        flag,
    })
}

/// Gopher clients send "" for the root; both "" and "/" map to "/".
fn normalize_selector(selector: &str) -> String {
    if selector.is_empty() {
        "/".to_string()
    } else if selector.starts_with('/') {
        selector.to_string()
    } else {
        format!("/{selector}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_is_root() {
        let req = parse("").unwrap();
        assert_eq!(req.selector, "/");
        assert_eq!(req.query, None);
    }

    #[test]
    fn selector_with_query() {
        let req = parse("/ask\twhat is gopher?").unwrap();
        assert_eq!(req.selector, "/ask");
        assert_eq!(req.query.as_deref(), Some("what is gopher?"));
        assert_eq!(req.flag, RequestFlag::None);
    }

    #[test]
    fn empty_query_field_is_none() {
        let req = parse("/ask\t").unwrap();
        assert_eq!(req.query, None);
    }

    #[test]
    fn relative_selector_gets_slash() {
        assert_eq!(parse("about").unwrap().selector, "/about");
    }

    #[test]
    fn gopher_plus_flag() {
        let req = parse("/about\t\t+").unwrap();
        assert_eq!(req.flag, RequestFlag::GopherPlus("+".into()));
        let req = parse("/about\t\t$").unwrap();
        assert_eq!(req.flag, RequestFlag::GopherPlus("$".into()));
    }

    #[test]
    fn rejects_garbage_third_field() {
        assert!(parse("/about\tq\tjunk").is_err());
    }
}
