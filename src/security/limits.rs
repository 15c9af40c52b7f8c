//! Request limits enforced before any handler runs.
//!
//! # Responsibilities
//! - Enforce maximum selector and query length
//! - Reject text dominated by unusual symbols
//! - Reject text carrying many combining, invisible or private-use characters
//!
//! # Design Decisions
//! - Lengths are counted in characters, not bytes
//! - Ratio checks skip short strings, where one symbol would dominate
//! - Pure functions of the request; no shared state

use thiserror::Error;

use crate::config::LimitsConfig;
use crate::sanitize::input::is_invisible;

/// Strings shorter than this are exempt from the special-character ratio.
const RATIO_MIN_LEN: usize = 8;

/// A request that exceeds one of the hard limits.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitViolation {
    #[error("selector is {len} characters, limit {max}")]
    SelectorTooLong { len: usize, max: usize },

    #[error("query is {len} characters, limit {max}")]
    QueryTooLong { len: usize, max: usize },

    #[error("special character ratio {ratio:.2} exceeds {max:.2}")]
    SpecialCharacters { ratio: f64, max: f64 },

    #[error("unicode complexity {score} exceeds {max}")]
    UnicodeComplexity { score: usize, max: usize },
}

impl LimitViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitViolation::SelectorTooLong { .. } => "selector_too_long",
            LimitViolation::QueryTooLong { .. } => "query_too_long",
            LimitViolation::SpecialCharacters { .. } => "special_characters",
            LimitViolation::UnicodeComplexity { .. } => "unicode_complexity",
        }
    }
}

/// Hard limits for selectors and queries.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    max_selector_len: usize,
    max_query_len: usize,
    max_special_char_ratio: f64,
    max_unicode_complexity: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::new(&LimitsConfig::default())
    }
}

impl RequestLimits {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            max_selector_len: config.max_selector_len,
            max_query_len: config.max_query_len,
            max_special_char_ratio: config.max_special_char_ratio,
            max_unicode_complexity: config.max_unicode_complexity,
        }
    }

    /// Check a selector and optional query against every limit.
    pub fn check(&self, selector: &str, query: Option<&str>) -> Result<(), LimitViolation> {
        let len = selector.chars().count();
        if len > self.max_selector_len {
            return Err(LimitViolation::SelectorTooLong {
                len,
                max: self.max_selector_len,
            });
        }
        self.check_composition(selector)?;

        if let Some(query) = query {
            let len = query.chars().count();
            if len > self.max_query_len {
                return Err(LimitViolation::QueryTooLong {
                    len,
                    max: self.max_query_len,
                });
            }
            self.check_composition(query)?;
        }
        Ok(())
    }

    fn check_composition(&self, text: &str) -> Result<(), LimitViolation> {
        // Complexity first: combining marks also count as special characters.
        let score = unicode_complexity(text);
        if score > self.max_unicode_complexity {
            return Err(LimitViolation::UnicodeComplexity {
                score,
                max: self.max_unicode_complexity,
            });
        }
        let ratio = special_char_ratio(text);
        if ratio > self.max_special_char_ratio {
            return Err(LimitViolation::SpecialCharacters {
                ratio,
                max: self.max_special_char_ratio,
            });
        }
        Ok(())
    }
}

/// Share of characters that are neither alphanumeric, whitespace nor
/// common prose punctuation. Zero for strings under eight characters.
pub fn special_char_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total < RATIO_MIN_LEN {
        return 0.0;
    }
    let special = text
        .chars()
        .filter(|&c| !(c.is_alphanumeric() || c.is_whitespace() || is_prose_punctuation(c)))
        .count();
    special as f64 / total as f64
}

/// Count of combining marks, invisible/format and private-use characters.
pub fn unicode_complexity(text: &str) -> usize {
    text.chars()
        .filter(|&c| is_combining_mark(c) || is_invisible(c) || is_private_use(c))
        .count()
}

fn is_prose_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ',' | '!' | '?' | '\'' | '"' | '-' | ':' | ';' | '(' | ')' | '/' | '&' | '\u{2019}'
    )
}

fn is_combining_mark(c: char) -> bool {
    matches!(
        c,
        '\u{0300}'..='\u{036F}'
            | '\u{0483}'..='\u{0489}'
            | '\u{1AB0}'..='\u{1AFF}'
            | '\u{1DC0}'..='\u{1DFF}'
            | '\u{20D0}'..='\u{20FF}'
            | '\u{FE20}'..='\u{FE2F}'
    )
}

fn is_private_use(c: char) -> bool {
    matches!(
        c,
        '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_requests() {
        let limits = RequestLimits::default();
        assert!(limits.check("/ask/helpful", Some("What's the weather like on Mars?")).is_ok());
        assert!(limits.check("/", None).is_ok());
    }

    #[test]
    fn selector_limit_is_inclusive() {
        let limits = RequestLimits::default();
        let at = format!("/{}", "a".repeat(254));
        assert!(limits.check(&at, None).is_ok());
        let over = format!("/{}", "a".repeat(255));
        assert!(matches!(
            limits.check(&over, None),
            Err(LimitViolation::SelectorTooLong { len: 256, max: 255 })
        ));
    }

    #[test]
    fn query_limit_counts_characters() {
        let limits = RequestLimits::default();
        // 2000 two-byte characters is within the limit.
        let query = "é".repeat(2000);
        assert!(limits.check("/ask", Some(&query)).is_ok());
        let query = "é".repeat(2001);
        assert!(matches!(
            limits.check("/ask", Some(&query)),
            Err(LimitViolation::QueryTooLong { .. })
        ));
    }

    #[test]
    fn rejects_symbol_soup() {
        let limits = RequestLimits::default();
        assert!(matches!(
            limits.check("/ask", Some("{{$$}}<<>>[[]]**")),
            Err(LimitViolation::SpecialCharacters { .. })
        ));
        // Short strings are exempt.
        assert!(limits.check("/ask", Some("<>")).is_ok());
    }

    #[test]
    fn rejects_zalgo_text() {
        let limits = RequestLimits::default();
        let zalgo: String = "hello".chars().flat_map(|c| [c, '\u{0301}', '\u{0316}', '\u{0324}', '\u{0330}']).collect();
        assert_eq!(unicode_complexity(&zalgo), 20);
        assert!(matches!(
            limits.check("/ask", Some(&zalgo)),
            Err(LimitViolation::UnicodeComplexity { score: 20, max: 16 })
        ));
    }
}
