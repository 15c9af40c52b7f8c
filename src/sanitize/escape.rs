//! Protocol escaping for display text.
//!
//! Applied last to every content line, after the input and output filters.
//!
//! # Rules
//! - CRLF, lone CR and lone LF all end a logical line
//! - Gopher: TAB becomes a space, a bare `.` line becomes ` .`
//! - Gemini: a line starting with `=>` is prefixed with a space
//! - Finger: a bare `.` line becomes ` .`
//!
//! Every function here is idempotent.

use std::borrow::Cow;

use crate::protocol::Protocol;

/// Split text into logical lines on CRLF, CR or LF.
///
/// A trailing line break does not produce an empty final line.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                lines.push(&text[start..i]);
                if bytes.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            b'\n' => {
                lines.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if start < bytes.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Escape a single-line field (menu display string, status meta).
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(['\r', '\n', '\t']) {
        Cow::Owned(field.replace("\r\n", " ").replace(['\r', '\n', '\t'], " "))
    } else {
        Cow::Borrowed(field)
    }
}

/// Escape one content line for the given protocol.
pub fn escape_line(protocol: Protocol, line: &str) -> Cow<'_, str> {
    let line = if line.contains(['\r', '\n']) {
        Cow::Owned(line.replace("\r\n", " ").replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(line)
    };

    match protocol {
        Protocol::Gopher => {
            let line = if line.contains('\t') {
                Cow::Owned(line.replace('\t', " "))
            } else {
                line
            };
            escape_bare_dot(line)
        }
        Protocol::Gemini => {
            if line.starts_with("=>") {
                Cow::Owned(format!(" {line}"))
            } else {
                line
            }
        }
        Protocol::Finger => escape_bare_dot(line),
    }
}

fn escape_bare_dot(line: Cow<'_, str>) -> Cow<'_, str> {
    if line == "." {
        Cow::Borrowed(" .")
    } else {
        line
    }
}

/// Split and escape a block of text.
pub fn escape_text(protocol: Protocol, text: &str) -> Vec<String> {
    split_lines(text)
        .into_iter()
        .map(|line| escape_line(protocol, line).into_owned())
        .collect()
}
