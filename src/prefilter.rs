use regex_syntax::hir::{Class, Hir, HirKind};
use regex_syntax::ParserBuilder;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::pattern::substring_expr;
use crate::trigram::Trigram;

/// Upper bound on the number of strings tracked in an exact-match set.
/// Beyond this the analysis falls back to a boolean combination.
const MAX_EXACT_STRINGS: usize = 32;

/// Upper bound on the length of a tracked string.
const MAX_ATOM_LEN: usize = 64;

/// Character classes larger than this are not expanded.
const MAX_CLASS_SIZE: usize = 10;

/// A sound necessary condition extracted from a regular expression: any text
/// the regex matches satisfies the prefilter. `All` means no condition could
/// be derived, `None` means the regex matches nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prefilter {
    All,
    None,
    Atom(Vec<u8>),
    And(Vec<Prefilter>),
    Or(Vec<Prefilter>),
}

/// Compile a regex pattern and extract its prefilter.
pub fn from_pattern(body: &[u8]) -> Result<Prefilter> {
    let pattern = std::str::from_utf8(body)
        .map_err(|_| Error::BadPattern("invalid UTF-8 in regular expression".to_string()))?;
    let hir = ParserBuilder::new()
        .utf8(false)
        .build()
        .parse(pattern)
        .map_err(|e| Error::BadPattern(e.to_string()))?;
    Ok(to_prefilter(analyze(&hir)))
}

/// Lower a prefilter to a trigram expression, loading doclists on demand.
///
/// Under AND an ANY child is dropped and a NONE child collapses the node;
/// under OR a NONE child is dropped and an ANY child collapses the node.
/// An empty AND is ANY, an empty OR is NONE.
pub fn expr_from_prefilter<L>(pf: &Prefilter, load: &mut L) -> Result<Expr>
where
    L: FnMut(Trigram) -> Result<Option<Vec<u8>>>,
{
    match pf {
        Prefilter::All => Ok(Expr::Any),
        Prefilter::None => Ok(Expr::None),
        Prefilter::Atom(s) => substring_expr(load, s),
        Prefilter::And(children) => {
            let mut acc = Expr::Any;
            for child in children {
                acc = Expr::and(acc, expr_from_prefilter(child, load)?);
                if acc.is_none() {
                    break;
                }
            }
            Ok(acc)
        }
        Prefilter::Or(children) => {
            let mut acc = Expr::None;
            for child in children {
                acc = Expr::or(acc, expr_from_prefilter(child, load)?);
                if acc.is_any() {
                    break;
                }
            }
            Ok(acc)
        }
    }
}

/// Result of analyzing one subexpression. `Exact` carries the exhaustive set
/// of strings the subexpression can match, which composes under
/// concatenation and alternation; once a set gets too large or a construct
/// is unbounded, the analysis degrades to a prefilter.
enum Analysis {
    Exact(Vec<Vec<u8>>),
    Inexact(Prefilter),
}

fn analyze(hir: &Hir) -> Analysis {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => Analysis::Exact(vec![Vec::new()]),
        HirKind::Literal(lit) => Analysis::Exact(vec![lit.0.to_vec()]),
        HirKind::Class(class) => match class_strings(class) {
            Some(strings) => Analysis::Exact(strings),
            None => Analysis::Inexact(Prefilter::All),
        },
        HirKind::Repetition(rep) => {
            if rep.min == 0 {
                // The repetition can match the empty string, so it imposes
                // no condition.
                return Analysis::Inexact(Prefilter::All);
            }
            let sub = analyze(&rep.sub);
            if rep.min == 1 && rep.max == Some(1) {
                sub
            } else {
                // At least one occurrence of the subexpression is present.
                Analysis::Inexact(to_prefilter(sub))
            }
        }
        HirKind::Capture(cap) => analyze(&cap.sub),
        HirKind::Concat(subs) => {
            let mut conditions: Vec<Prefilter> = Vec::new();
            let mut run: Vec<Vec<u8>> = vec![Vec::new()];
            for sub in subs {
                match analyze(sub) {
                    Analysis::Exact(set) => match cross(&run, &set) {
                        Some(product) => run = product,
                        None => {
                            conditions.push(or_of_atoms(&run));
                            run = set;
                        }
                    },
                    Analysis::Inexact(pf) => {
                        conditions.push(or_of_atoms(&run));
                        conditions.push(pf);
                        run = vec![Vec::new()];
                    }
                }
            }
            if conditions.is_empty() {
                Analysis::Exact(run)
            } else {
                conditions.push(or_of_atoms(&run));
                Analysis::Inexact(pre_and(conditions))
            }
        }
        HirKind::Alternation(subs) => {
            let analyses: Vec<Analysis> = subs.iter().map(analyze).collect();
            let total: usize = analyses
                .iter()
                .map(|a| match a {
                    Analysis::Exact(set) => set.len(),
                    Analysis::Inexact(_) => usize::MAX,
                })
                .fold(0usize, |acc, n| acc.saturating_add(n));
            if total <= MAX_EXACT_STRINGS {
                let mut union = Vec::new();
                for a in analyses {
                    match a {
                        Analysis::Exact(set) => union.extend(set),
                        Analysis::Inexact(_) => unreachable!("counted as exact above"),
                    }
                }
                Analysis::Exact(union)
            } else {
                Analysis::Inexact(pre_or(analyses.into_iter().map(to_prefilter).collect()))
            }
        }
    }
}

fn to_prefilter(analysis: Analysis) -> Prefilter {
    match analysis {
        Analysis::Exact(set) => or_of_atoms(&set),
        Analysis::Inexact(pf) => pf,
    }
}

/// The condition "contains one of these strings". A string shorter than a
/// trigram constrains nothing, which makes the whole disjunction vacuous.
/// An empty set means the subexpression matches nothing at all.
fn or_of_atoms(set: &[Vec<u8>]) -> Prefilter {
    if set.is_empty() {
        return Prefilter::None;
    }
    if set.iter().any(|s| s.len() < 3) {
        return Prefilter::All;
    }
    pre_or(set.iter().map(|s| Prefilter::Atom(s.clone())).collect())
}

fn pre_and(children: Vec<Prefilter>) -> Prefilter {
    let mut out = Vec::new();
    for child in children {
        match child {
            Prefilter::All => continue,
            Prefilter::None => return Prefilter::None,
            Prefilter::And(subs) => out.extend(subs),
            other => out.push(other),
        }
    }
    match out.len() {
        0 => Prefilter::All,
        1 => out.remove(0),
        _ => Prefilter::And(out),
    }
}

fn pre_or(children: Vec<Prefilter>) -> Prefilter {
    let mut out = Vec::new();
    for child in children {
        match child {
            Prefilter::None => continue,
            Prefilter::All => return Prefilter::All,
            Prefilter::Or(subs) => out.extend(subs),
            other => out.push(other),
        }
    }
    match out.len() {
        0 => Prefilter::None,
        1 => out.remove(0),
        _ => Prefilter::Or(out),
    }
}

/// Expand a small character class into the strings it matches.
fn class_strings(class: &Class) -> Option<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    match class {
        Class::Unicode(u) => {
            for range in u.ranges() {
                for c in range.start()..=range.end() {
                    if out.len() >= MAX_CLASS_SIZE {
                        return None;
                    }
                    let mut buf = [0u8; 4];
                    out.push(c.encode_utf8(&mut buf).as_bytes().to_vec());
                }
            }
        }
        Class::Bytes(b) => {
            for range in b.ranges() {
                for byte in range.start()..=range.end() {
                    if out.len() >= MAX_CLASS_SIZE {
                        return None;
                    }
                    out.push(vec![byte]);
                }
            }
        }
    }
    Some(out)
}

/// Cross product of two exact sets, or `None` when the result would be too
/// large to keep tracking exactly.
fn cross(a: &[Vec<u8>], b: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
    let n = a.len().checked_mul(b.len())?;
    if n > MAX_EXACT_STRINGS {
        return None;
    }
    let mut out = Vec::with_capacity(n);
    for left in a {
        for right in b {
            if left.len() + right.len() > MAX_ATOM_LEN {
                return None;
            }
            let mut s = Vec::with_capacity(left.len() + right.len());
            s.extend_from_slice(left);
            s.extend_from_slice(right);
            out.push(s);
        }
    }
    Some(out)
}
