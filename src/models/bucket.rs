//! Alphabetical bucketing for the dictionary store.

use std::fmt;

/// File stem used for terms that do not start with an ASCII letter.
pub const FALLBACK_BUCKET: &str = "0";

/// Dictionary bucket: one per uppercase ASCII letter plus a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    /// `A`..=`Z`
    Letter(char),
    /// Digits, punctuation, non-ASCII letters, empty terms
    Other,
}

impl Bucket {
    /// Bucket for a term, keyed on its first character.
    ///
    /// ASCII letters are case-folded to uppercase. Anything else, including
    /// accented or non-Latin letters, goes to [`Bucket::Other`].
    pub fn for_term(term: &str) -> Self {
        match term.trim_start().chars().next() {
            Some(c) if c.is_ascii_alphabetic() => Bucket::Letter(c.to_ascii_uppercase()),
            _ => Bucket::Other,
        }
    }

    /// File stem (`"A"`..`"Z"` or `"0"`).
    pub fn file_stem(&self) -> String {
        match self {
            Bucket::Letter(c) => c.to_string(),
            Bucket::Other => FALLBACK_BUCKET.to_string(),
        }
    }

    /// Parse a file stem back into a bucket.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        if stem == FALLBACK_BUCKET {
            return Some(Bucket::Other);
        }
        let mut chars = stem.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_uppercase() => Some(Bucket::Letter(c)),
            _ => None,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}
