//! Deny Patterns
//!
//! A deny pattern is compiled once and then answers one question: does it
//! match the *whole* candidate string, ignoring case? Substring hits never
//! count, so `doubleclick.net` does not block `xdoubleclick.net`.

use fancy_regex::Regex;
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Errors building a pattern
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Empty pattern")]
    Empty,
}

/// How a pattern was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Plain hostname or URL, compared as-is
    Literal,
    /// Regular expression (lookaround supported)
    Regex,
}

#[derive(Debug, Clone)]
enum Matcher {
    /// Lowercased literal
    Literal(String),
    /// `(?i)^(?:...)$`
    Regex(Regex),
}

/// A compiled, case-insensitive, full-match pattern
#[derive(Debug, Clone)]
pub struct DenyPattern {
    source: String,
    matcher: Matcher,
}

impl DenyPattern {
    /// Pattern matching exactly `text`, ignoring ASCII case
    pub fn literal(text: &str) -> Result<Self, PatternError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            source: text.to_string(),
            matcher: Matcher::Literal(text.to_ascii_lowercase()),
        })
    }

    /// Pattern matching strings the whole of which match `pattern`
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        let anchored = format!("(?i)^(?:{})$", pattern);
        let regex = Regex::new(&anchored).map_err(|e| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: Matcher::Regex(regex),
        })
    }

    /// Pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Literal or regex
    pub fn kind(&self) -> PatternKind {
        match self.matcher {
            Matcher::Literal(_) => PatternKind::Literal,
            Matcher::Regex(_) => PatternKind::Regex,
        }
    }

    /// Whole-string, case-insensitive match.
    ///
    /// A regex that gives up (backtracking limit) counts as no match.
    #[inline]
    pub fn matches(&self, candidate: &str) -> bool {
        match &self.matcher {
            Matcher::Literal(text) => candidate.eq_ignore_ascii_case(text),
            Matcher::Regex(regex) => match regex.is_match(candidate) {
                Ok(matched) => matched,
                Err(e) => {
                    trace!("Pattern '{}' aborted on {}: {}", self.source, candidate, e);
                    false
                }
            },
        }
    }
}

impl fmt::Display for DenyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_full_match_only() {
        let pattern = DenyPattern::literal("doubleclick.net").unwrap();

        assert!(pattern.matches("doubleclick.net"));
        assert!(pattern.matches("DoubleClick.NET"));
        assert!(!pattern.matches("xdoubleclick.net"));
        assert!(!pattern.matches("doubleclick.network"));
        assert!(!pattern.matches("ads.doubleclick.net"));
    }

    #[test]
    fn test_literal_dots_are_not_wildcards() {
        let pattern = DenyPattern::literal("doubleclick.net").unwrap();
        assert!(!pattern.matches("doubleclickxnet"));
    }

    #[test]
    fn test_regex_is_anchored() {
        let pattern = DenyPattern::regex(r"video\.spotify\.com/ad_.*").unwrap();

        assert!(pattern.matches("video.spotify.com/ad_123"));
        assert!(pattern.matches("VIDEO.SPOTIFY.COM/AD_x"));
        assert!(!pattern.matches("cdn.video.spotify.com/ad_123"));
        assert!(!pattern.matches("video.spotify.com"));
    }

    #[test]
    fn test_regex_alternation_stays_anchored() {
        let pattern = DenyPattern::regex("ads|tracker").unwrap();

        assert!(pattern.matches("ads"));
        assert!(!pattern.matches("adsx"));
        assert!(!pattern.matches("xtracker"));
    }

    #[test]
    fn test_lookahead_at_end_of_full_match() {
        let pattern = DenyPattern::regex(
            r"https?://[^/]+\.spotify\.com/gabo-receiver-service/.*/events(?!.*discord.*)",
        )
        .unwrap();

        assert!(pattern.matches("https://gew.spotify.com/gabo-receiver-service/v3/events"));
        // Nothing follows `events` in a whole-string match, so the lookahead
        // never sees the earlier path segment.
        assert!(pattern.matches("https://gew.spotify.com/gabo-receiver-service/discord/v3/events"));
        assert!(!pattern.matches("https://gew.spotify.com/gabo-receiver-service/v3/events/discord"));
        assert!(!pattern.matches("https://gew.spotify.com/gabo-receiver-service/v3/events?x=1"));
    }

    #[test]
    fn test_invalid_regex() {
        let result = DenyPattern::regex("ads(");
        assert!(matches!(result, Err(PatternError::InvalidRegex { .. })));
    }

    #[test]
    fn test_empty_patterns() {
        assert!(matches!(DenyPattern::literal("  "), Err(PatternError::Empty)));
        assert!(matches!(DenyPattern::regex(""), Err(PatternError::Empty)));
    }

    #[test]
    fn test_kind_and_display() {
        let literal = DenyPattern::literal("adsrvr.org").unwrap();
        let regex = DenyPattern::regex(r"ad\..*").unwrap();

        assert_eq!(literal.kind(), PatternKind::Literal);
        assert_eq!(regex.kind(), PatternKind::Regex);
        assert_eq!(regex.to_string(), r"ad\..*");
    }
}
