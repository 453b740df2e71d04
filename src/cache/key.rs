//! Canonical cache keys.

use sha2::{Digest, Sha256};

/// Canonical form of an expression, used as the cache key.
///
/// Whitespace is dropped everywhere except between two word characters
/// (digits, letters, `.`, `_`), where any run collapses to one space so that
/// `"1 2"` never aliases `"12"`. Everything else, including operator order,
/// is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for an expression.
    pub fn new(expression: &str) -> Self {
        Self(canonicalize(expression))
    }

    /// Canonical expression text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest, for log lines.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(expression: &str) -> Self {
        Self::new(expression)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_'
}

fn canonicalize(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len());
    let mut pending_space = false;

    for c in expression.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space {
            let prev_is_word = out.chars().next_back().is_some_and(is_word_char);
            if prev_is_word && is_word_char(c) {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(c);
    }

    out
}
