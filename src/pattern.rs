use itertools::Itertools;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::matcher::Matcher;
use crate::prefilter;
use crate::trigram::Trigram;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PatternKind {
    Substr,
    Regexp,
}

/// A parsed MATCH operand. The prefix selects the parser and whether match
/// extents are reported; the body is the raw pattern bytes.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub kind: PatternKind,
    pub extents: bool,
    pub body: Vec<u8>,
}

impl Pattern {
    /// Parse a pattern of the form `substr:`, `substr-extents:`, `regexp:`
    /// or `regexp-extents:` followed by the pattern body.
    pub fn parse(raw: &[u8]) -> Result<Pattern> {
        const PREFIXES: &[(&[u8], PatternKind, bool)] = &[
            (b"substr-extents:", PatternKind::Substr, true),
            (b"substr:", PatternKind::Substr, false),
            (b"regexp-extents:", PatternKind::Regexp, true),
            (b"regexp:", PatternKind::Regexp, false),
        ];
        for &(prefix, kind, extents) in PREFIXES {
            if let Some(body) = raw.strip_prefix(prefix) {
                if body.is_empty() {
                    return Err(Error::BadPattern("pattern body is empty".to_string()));
                }
                return Ok(Pattern {
                    kind,
                    extents,
                    body: body.to_vec(),
                });
            }
        }
        Err(Error::BadPattern(
            "pattern must be a regular expression or a substring pattern".to_string(),
        ))
    }

    /// Compile the exact verifier for this pattern.
    pub fn matcher(&self, max_regexp_memory: usize) -> Result<Matcher> {
        match self.kind {
            PatternKind::Substr => Ok(Matcher::substring(&self.body)),
            PatternKind::Regexp => Matcher::regex(&self.body, max_regexp_memory),
        }
    }

    /// Build the trigram expression for this pattern, loading doclists
    /// through `load`. The result is `Any` when the pattern yields no
    /// trigram condition, in which case the caller decides between a full
    /// scan and an error.
    pub fn expr<L>(&self, load: &mut L) -> Result<Expr>
    where
        L: FnMut(Trigram) -> Result<Option<Vec<u8>>>,
    {
        match self.kind {
            PatternKind::Substr => substring_expr(load, &self.body),
            PatternKind::Regexp => {
                let pf = prefilter::from_pattern(&self.body)?;
                prefilter::expr_from_prefilter(&pf, load)
            }
        }
    }
}

/// The trigram expression for "text contains `needle`": an AND over every
/// overlapping trigram of the needle, duplicates elided. Needles shorter
/// than one trigram cannot be filtered and lower to `Any`; a needle with
/// any absent trigram can match nothing and lowers to `None`.
pub fn substring_expr<L>(load: &mut L, needle: &[u8]) -> Result<Expr>
where
    L: FnMut(Trigram) -> Result<Option<Vec<u8>>>,
{
    if needle.len() < 3 {
        return Ok(Expr::Any);
    }
    let mut expr = Expr::Any;
    for trigram in needle
        .windows(3)
        .map(|w| Trigram::from_bytes(w[0], w[1], w[2]))
        .unique()
    {
        let leaf = match load(trigram)? {
            Some(blob) => Expr::leaf(trigram, blob)?,
            None => Expr::None,
        };
        if leaf.is_none() {
            return Ok(Expr::None);
        }
        expr = Expr::and(expr, leaf);
    }
    Ok(expr)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doclist::encode_all;
    use std::collections::HashMap;

    #[test]
    fn prefixes_select_kind_and_extents() {
        let p = Pattern::parse(b"substr:abc").unwrap();
        assert_eq!((p.kind, p.extents), (PatternKind::Substr, false));
        assert_eq!(p.body, b"abc");

        let p = Pattern::parse(b"substr-extents:abc").unwrap();
        assert_eq!((p.kind, p.extents), (PatternKind::Substr, true));

        let p = Pattern::parse(b"regexp:a.c").unwrap();
        assert_eq!((p.kind, p.extents), (PatternKind::Regexp, false));

        let p = Pattern::parse(b"regexp-extents:a.c").unwrap();
        assert_eq!((p.kind, p.extents), (PatternKind::Regexp, true));
    }

    #[test]
    fn unrecognised_prefix_and_empty_body_fail() {
        assert!(matches!(
            Pattern::parse(b"glob:abc"),
            Err(Error::BadPattern(_))
        ));
        assert!(matches!(Pattern::parse(b"substr:"), Err(Error::BadPattern(_))));
        assert!(matches!(Pattern::parse(b""), Err(Error::BadPattern(_))));
    }

    fn loader(
        docs: &[(&'static [u8], &[i64])],
    ) -> impl FnMut(Trigram) -> Result<Option<Vec<u8>>> {
        let mut lists: HashMap<Trigram, Vec<u8>> = HashMap::new();
        for (tri, ids) in docs {
            let t = Trigram::from_bytes(tri[0], tri[1], tri[2]);
            lists.insert(t, encode_all(ids));
        }
        move |t| Ok(lists.get(&t).cloned())
    }

    fn drain(mut expr: Expr) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(id) = expr.next_match().unwrap() {
            out.push(id);
        }
        out
    }

    #[test]
    fn short_needle_lowers_to_any() {
        let mut load = loader(&[]);
        assert!(substring_expr(&mut load, b"ab").unwrap().is_any());
        assert!(substring_expr(&mut load, b"").unwrap().is_any());
    }

    #[test]
    fn absent_trigram_lowers_to_none() {
        let mut load = loader(&[(b"abc", &[1, 2])]);
        assert!(substring_expr(&mut load, b"abcd").unwrap().is_none());
    }

    #[test]
    fn substring_expr_intersects_its_trigrams() {
        let mut load = loader(&[(b"abc", &[1, 2, 3]), (b"bcd", &[2, 3, 9])]);
        let expr = substring_expr(&mut load, b"abcd").unwrap();
        assert_eq!(drain(expr), vec![2, 3]);
    }

    #[test]
    fn duplicate_trigrams_are_elided() {
        // "aaaa" has a single distinct trigram, so one lookup suffices.
        let mut calls = 0;
        let mut load = |_t: Trigram| {
            calls += 1;
            Ok(Some(encode_all(&[4])))
        };
        let expr = substring_expr(&mut load, b"aaaa").unwrap();
        assert_eq!(calls, 1);
        assert_eq!(drain(expr), vec![4]);
    }
}
