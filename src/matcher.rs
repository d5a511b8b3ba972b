use memchr::memmem;
use regex::bytes::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// Scalar verifier applied to each candidate row the index produces. The
/// trigram filter admits false positives; this is the exact check.
///
/// Matchers are compiled once per query and reused across rows.
pub enum Matcher {
    Substr(memmem::Finder<'static>),
    Regex(Regex),
}

impl Matcher {
    pub fn substring(needle: &[u8]) -> Matcher {
        Matcher::Substr(memmem::Finder::new(needle).into_owned())
    }

    pub fn regex(pattern: &[u8], size_limit: usize) -> Result<Matcher> {
        let pattern = std::str::from_utf8(pattern)
            .map_err(|_| Error::BadPattern("invalid UTF-8 in regular expression".to_string()))?;
        let re = RegexBuilder::new(pattern)
            .size_limit(size_limit)
            .build()
            .map_err(|e| Error::BadPattern(e.to_string()))?;
        Ok(Matcher::Regex(re))
    }

    pub fn is_match(&self, text: &[u8]) -> bool {
        match self {
            Matcher::Substr(finder) => finder.find(text).is_some(),
            Matcher::Regex(re) => re.is_match(text),
        }
    }

    /// Append the `(start, end)` byte range of every non-overlapping
    /// occurrence, in ascending start order. Returns whether anything
    /// matched.
    pub fn find_extents(&self, text: &[u8], out: &mut Vec<(u32, u32)>) -> bool {
        let before = out.len();
        match self {
            Matcher::Substr(finder) => {
                let len = finder.needle().len();
                for start in finder.find_iter(text) {
                    out.push((start as u32, (start + len) as u32));
                }
            }
            Matcher::Regex(re) => {
                for m in re.find_iter(text) {
                    out.push((m.start() as u32, m.end() as u32));
                }
            }
        }
        out.len() > before
    }
}
