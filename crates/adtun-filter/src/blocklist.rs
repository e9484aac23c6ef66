//! Blocklist
//!
//! The set of deny patterns a hostname or URL is checked against.
//!
//! List file format, one pattern per line:
//! - `# comment` or `! comment`: ignored, as are blank lines
//! - `/regex/`: regular expression
//! - anything else: literal hostname or URL

use crate::pattern::{DenyPattern, PatternError, PatternKind};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors while loading a blocklist
#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rule on line {line}: {source}")]
    InvalidRule {
        line: usize,
        #[source]
        source: PatternError,
    },

    #[error("Empty blocklist")]
    EmptyList,
}

/// Built-in ad hosts, matched literally
const BUILTIN_HOSTS: &[&str] = &[
    "doubleclick.net",
    "googleads.g.doubleclick.net",
    "adswizz.com",
    "g.doubleclick.net",
    "flashtalking.com",
    "ad.crwdcntrl.net",
    "creative.adx.io",
    "adservice.google.com",
    "adsrvr.org",
    "cdn.ad.mp.mydas.mobi",
    "static.doubleclick.net",
    "px.moatads.com",
    "v.moatads.com",
];

/// Built-in ad URL patterns
const BUILTIN_REGEXES: &[&str] = &[
    r"audio-ak-spotify-com\.akamaized\.net/ad_.*",
    r"audio4-ak-spotify-com\.akamaized\.net/ad_.*",
    r"audio-fa\.scdn\.co/ad_.*",
    r"audio-sp-.*\.pscdn\.co/ad_.*",
    r"video\.spotify\.com/ad_.*",
    r"https?://[^/]+\.spotify\.com/ad-logic/.*",
    r"https?://[^/]+\.spotify\.com/ads/.*",
    r"https?://[^/]+\.spotify\.com/gabo-receiver-service/.*/events(?!.*discord.*)",
];

/// Compiled denylist
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    name: String,
    patterns: Vec<DenyPattern>,
}

impl Blocklist {
    /// Create an empty blocklist
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            patterns: Vec::new(),
        }
    }

    /// The built-in ad denylist
    pub fn builtin() -> Self {
        let mut list = Self::new("builtin");
        for host in BUILTIN_HOSTS {
            list.push(DenyPattern::literal(host).expect("built-in host is non-empty"));
        }
        for pattern in BUILTIN_REGEXES {
            list.push(DenyPattern::regex(pattern).expect("built-in regex compiles"));
        }
        list
    }

    /// Parse a list from a reader
    pub fn parse<R: Read>(name: &str, reader: R) -> Result<Self, BlocklistError> {
        let buf_reader = BufReader::new(reader);
        let mut list = Self::new(name);
        let mut line_count = 0;

        for line in buf_reader.lines() {
            let line = line?;
            line_count += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }

            let pattern = Self::parse_rule(trimmed).map_err(|source| BlocklistError::InvalidRule {
                line: line_count,
                source,
            })?;
            list.push(pattern);
        }

        if list.is_empty() {
            return Err(BlocklistError::EmptyList);
        }

        info!(
            "Parsed blocklist '{}': {} lines, {} patterns ({} regex)",
            name,
            line_count,
            list.len(),
            list.patterns
                .iter()
                .filter(|p| p.kind() == PatternKind::Regex)
                .count()
        );

        Ok(list)
    }

    /// Load a list file from disk
    pub fn from_path(path: &Path) -> Result<Self, BlocklistError> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(&name, file)
    }

    fn parse_rule(line: &str) -> Result<DenyPattern, PatternError> {
        match line
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            Some(regex) => DenyPattern::regex(regex),
            None => DenyPattern::literal(line),
        }
    }

    /// Add a compiled pattern
    pub fn push(&mut self, pattern: DenyPattern) {
        self.patterns.push(pattern);
    }

    /// Append every pattern of `other`
    pub fn extend(&mut self, other: Blocklist) {
        self.patterns.extend(other.patterns);
    }

    /// True iff some pattern matches the whole of `candidate`
    #[inline]
    pub fn is_blocked(&self, candidate: &str) -> bool {
        self.matching(candidate).is_some()
    }

    /// First pattern matching the whole of `candidate`
    pub fn matching(&self, candidate: &str) -> Option<&DenyPattern> {
        let hit = self.patterns.iter().find(|p| p.matches(candidate));
        if let Some(pattern) = hit {
            debug!("'{}' matched pattern '{}'", candidate, pattern);
        }
        hit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[DenyPattern] {
        &self.patterns
    }
}
