//! Output filter for generated text.
//!
//! Replaces credential-shaped strings, private-network addresses and leaked
//! system-prompt fragments with a redaction marker. Never blocks.
//!
//! Streamed output goes through [`StreamRedactor`] before it is cut into
//! lines: text is held back until no pattern match can straddle the release
//! point, and a private key block is suppressed from its header through its
//! footer however many fragments it spans.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::observability::metrics;

/// Category of a redaction, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionKind {
    ApiKey,
    PrivateKey,
    Credential,
    PrivateIp,
    SystemPrompt,
}

impl RedactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionKind::ApiKey => "api_key",
            RedactionKind::PrivateKey => "private_key",
            RedactionKind::Credential => "credential",
            RedactionKind::PrivateIp => "private_ip",
            RedactionKind::SystemPrompt => "system_prompt",
        }
    }
}

static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\b(?:",
        r"sk-ant-[A-Za-z0-9_-]{20,}",
        r"|sk-(?:proj-|live-|test-)?[A-Za-z0-9_-]{20,}",
        r"|(?:AKIA|ASIA)[0-9A-Z]{16}",
        r"|gh[pousr]_[A-Za-z0-9]{36,}",
        r"|github_pat_[A-Za-z0-9_]{22,}",
        r"|xox[abprs]-[A-Za-z0-9-]{10,}",
        r"|AIza[0-9A-Za-z_-]{35}",
        r"|glpat-[A-Za-z0-9_-]{20,}",
        r"|hf_[A-Za-z0-9]{30,}",
        r"|(?:sk|rk|pk)_(?:live|test)_[A-Za-z0-9]{20,}",
        r"|eyJ[A-Za-z0-9_-]{10,}\.eyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
        r")"
    ))
    .expect("api key pattern compiles")
});

static PRIVATE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-----BEGIN (?:[A-Z]+ )*PRIVATE KEY-----(?:[\s\S]*?-----END (?:[A-Z]+ )*PRIVATE KEY-----)?")
        .expect("private key pattern compiles")
});

static PRIVATE_KEY_BEGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-----BEGIN (?:[A-Z]+ )*PRIVATE KEY-----").expect("private key header pattern compiles")
});

static PRIVATE_KEY_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-----END (?:[A-Z]+ )*PRIVATE KEY-----").expect("private key footer pattern compiles")
});

/// Chars held back from a stream so a key header, footer or credential
/// assignment split across fragments is seen whole.
const MIN_HOLDBACK: usize = 64;

static CREDENTIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(password|passwd|pwd|secret|api[_-]?key|access[_-]?token|auth[_-]?token|client[_-]?secret|token)(\s*[:=]\s*)("[^"\s]+"|'[^'\s]+'|[^\s"',;]+)"#,
    )
    .expect("credential pattern compiles")
});

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 pattern compiles")
});

static IPV6_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:f[cd][0-9a-f]{2}|fe[89ab][0-9a-f]):[0-9a-f:]*[0-9a-f]\b|::1\b")
        .expect("ipv6 pattern compiles")
});

/// Output filter with a per-deployment set of system-prompt fragments.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    marker: String,
    redact_private_ips: bool,
    prompt_fragments: Option<AhoCorasick>,
    holdback: usize,
}

impl Default for OutputFilter {
    fn default() -> Self {
        Self::new("[REDACTED]", true, &[], 24)
    }
}

impl OutputFilter {
    /// Build a filter. `system_prompts` are split into sentences; every
    /// sentence at least `min_fragment_len` characters long is treated as a
    /// leak if it appears verbatim (case-insensitive) in output.
    pub fn new(
        marker: impl Into<String>,
        redact_private_ips: bool,
        system_prompts: &[String],
        min_fragment_len: usize,
    ) -> Self {
        let fragments: Vec<String> = system_prompts
            .iter()
            .flat_map(|p| prompt_fragments(p, min_fragment_len))
            .collect();
        let longest = fragments.iter().map(|f| f.chars().count()).max().unwrap_or(0);
        let prompt_fragments = if fragments.is_empty() {
            None
        } else {
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::LeftmostLongest)
                .build(&fragments)
                .ok()
        };
        Self {
            marker: marker.into(),
            redact_private_ips,
            prompt_fragments,
            holdback: longest.max(MIN_HOLDBACK),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Start redacting one streamed generation.
    pub fn stream(&self) -> StreamRedactor<'_> {
        StreamRedactor {
            filter: self,
            pending: String::new(),
            in_private_key: false,
        }
    }

    /// Redact sensitive substrings; returns the input unchanged when clean.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);

        if let Some(ac) = &self.prompt_fragments {
            if ac.is_match(out.as_ref()) {
                metrics::record_redaction(RedactionKind::SystemPrompt.as_str());
                let replaced = ac.replace_all(out.as_ref(), &vec![self.marker.as_str(); ac.patterns_len()]);
                out = Cow::Owned(replaced);
            }
        }

        out = self.replace(out, &PRIVATE_KEY_RE, RedactionKind::PrivateKey);
        out = self.replace(out, &API_KEY_RE, RedactionKind::ApiKey);
        out = self.replace_credentials(out);

        if self.redact_private_ips {
            out = self.replace_private_ips(out);
        }
        out
    }

    /// Largest prefix of `text` that can be redacted on its own.
    ///
    /// At least `holdback` chars stay behind, the cut lands after whitespace
    /// where possible, and no match of any pattern crosses it.
    fn safe_cut(&self, text: &str) -> usize {
        let mut cut = tail_start(text, self.holdback);
        if cut == 0 {
            return 0;
        }
        if let Some((offset, c)) = text[..cut].char_indices().rev().find(|(_, c)| c.is_whitespace()) {
            cut = offset + c.len_utf8();
        }

        let spans = self.match_spans(text);
        loop {
            let straddling = spans
                .iter()
                .filter(|(start, end)| *start < cut && cut < *end)
                .map(|(start, _)| *start)
                .min();
            match straddling {
                Some(start) => cut = start,
                None => return cut,
            }
        }
    }

    fn match_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        if let Some(ac) = &self.prompt_fragments {
            spans.extend(ac.find_iter(text).map(|m| (m.start(), m.end())));
        }
        for re in [&*API_KEY_RE, &*CREDENTIAL_RE, &*IPV4_RE, &*IPV6_RE] {
            spans.extend(re.find_iter(text).map(|m| (m.start(), m.end())));
        }
        spans
    }

    fn replace<'a>(&self, text: Cow<'a, str>, re: &Regex, kind: RedactionKind) -> Cow<'a, str> {
        if !re.is_match(&text) {
            return text;
        }
        metrics::record_redaction(kind.as_str());
        Cow::Owned(re.replace_all(&text, self.marker.as_str()).into_owned())
    }

    fn replace_credentials<'a>(&self, text: Cow<'a, str>) -> Cow<'a, str> {
        if !CREDENTIAL_RE.is_match(&text) {
            return text;
        }
        let mut hit = false;
        let replaced = CREDENTIAL_RE.replace_all(&text, |caps: &Captures<'_>| {
            let value = &caps[3];
            if value == self.marker || value.trim_matches(['"', '\'']) == self.marker {
                return caps[0].to_string();
            }
            hit = true;
            format!("{}{}{}", &caps[1], &caps[2], self.marker)
        })
        .into_owned();
        if !hit {
            return text;
        }
        metrics::record_redaction(RedactionKind::Credential.as_str());
        Cow::Owned(replaced)
    }

    fn replace_private_ips<'a>(&self, text: Cow<'a, str>) -> Cow<'a, str> {
        let mut current = text;
        for (re, parse_v6) in [(&*IPV4_RE, false), (&*IPV6_RE, true)] {
            if !re.is_match(&current) {
                continue;
            }
            let mut hit = false;
            let replaced = re.replace_all(&current, |caps: &Captures<'_>| {
                let literal = &caps[0];
                let private = if parse_v6 {
                    literal.parse::<Ipv6Addr>().map(|ip| is_private(IpAddr::V6(ip))).unwrap_or(false)
                } else {
                    literal.parse::<Ipv4Addr>().map(|ip| is_private(IpAddr::V4(ip))).unwrap_or(false)
                };
                if private {
                    hit = true;
                    self.marker.clone()
                } else {
                    literal.to_string()
                }
            })
            .into_owned();
            if hit {
                metrics::record_redaction(RedactionKind::PrivateIp.as_str());
                current = Cow::Owned(replaced);
            }
        }
        current
    }
}

/// Redaction state for one streamed generation.
///
/// Feed fragments with [`Self::push`] and collect what is safe to show; call
/// [`Self::finish`] once the stream ends. Nothing held back is shown if the
/// redactor is dropped instead.
#[derive(Debug)]
pub struct StreamRedactor<'a> {
    filter: &'a OutputFilter,
    pending: String,
    in_private_key: bool,
}

impl StreamRedactor<'_> {
    /// Append a fragment and return the redacted text now safe to release.
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        self.release(false)
    }

    /// Release everything still held back. An unterminated private key block
    /// is dropped.
    pub fn finish(&mut self) -> String {
        self.release(true)
    }

    /// Raw text not yet released.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    fn release(&mut self, finishing: bool) -> String {
        let mut out = String::new();
        loop {
            if self.in_private_key {
                let Some(end) = PRIVATE_KEY_END_RE.find(&self.pending).map(|m| m.end()) else {
                    // Keep just enough to recognise a footer split across fragments.
                    let discard = if finishing {
                        self.pending.len()
                    } else {
                        tail_start(&self.pending, MIN_HOLDBACK)
                    };
                    self.pending.drain(..discard);
                    return out;
                };
                self.pending.drain(..end);
                self.in_private_key = false;
                continue;
            }

            if let Some((start, end)) = PRIVATE_KEY_BEGIN_RE
                .find(&self.pending)
                .map(|m| (m.start(), m.end()))
            {
                out.push_str(&self.filter.redact(&self.pending[..start]));
                out.push_str(self.filter.marker());
                metrics::record_redaction(RedactionKind::PrivateKey.as_str());
                self.pending.drain(..end);
                self.in_private_key = true;
                continue;
            }

            let cut = if finishing {
                self.pending.len()
            } else {
                self.filter.safe_cut(&self.pending)
            };
            out.push_str(&self.filter.redact(&self.pending[..cut]));
            self.pending.drain(..cut);
            return out;
        }
    }
}

/// Byte offset where the last `chars` characters of `text` begin.
fn tail_start(text: &str, chars: usize) -> usize {
    match chars.checked_sub(1) {
        None => text.len(),
        Some(n) => text.char_indices().rev().nth(n).map_or(0, |(offset, _)| offset),
    }
}

/// Private, loopback, link-local and unique-local addresses.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

fn prompt_fragments(prompt: &str, min_len: usize) -> Vec<String> {
    prompt
        .split(['.', '!', '?', '\n'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| s.chars().count() >= min_len)
        .collect()
}
