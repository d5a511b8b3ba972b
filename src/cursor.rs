use log::debug;

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::matcher::Matcher;
use crate::pattern::Pattern;
use crate::plan::{IdOrder, Plan, Strategy, Value};
use crate::store::{ScanOrder, Storage};
use crate::table::Table;
use crate::DocId;

/// Where the next candidate row comes from.
enum Source<'t> {
    /// Streaming evaluation of a trigram expression, ascending ids.
    Expr(Expr),
    /// Pre-collected ids, already in delivery order.
    Ids(std::vec::IntoIter<DocId>),
    /// Row scan straight off the store.
    Rows(Box<dyn Iterator<Item = Result<(DocId, Vec<u8>)>> + 't>),
    /// Single row lookup; `None` once delivered.
    Lookup(Option<DocId>),
}

/// A query cursor over one table.
///
/// Lifecycle: `filter` builds the expression tree and verifiers and
/// positions the cursor on the first row; `next` advances; `eof` reports
/// exhaustion; `reset` releases everything and returns to the initial
/// state. Matchers compile once in `filter` and are reused for every row.
pub struct Cursor<'t, S: Storage> {
    table: &'t Table<S>,
    source: Option<Source<'t>>,
    verifiers: Vec<(Matcher, bool)>,
    row: Option<(DocId, Vec<u8>)>,
    extents: Vec<(u32, u32)>,
    eof: bool,
}

impl<'t, S: Storage> Cursor<'t, S> {
    pub fn new(table: &'t Table<S>) -> Self {
        Self {
            table,
            source: None,
            verifiers: Vec::new(),
            row: None,
            extents: Vec::new(),
            eof: true,
        }
    }

    /// Begin a scan. `values` are the constraint values selected by the
    /// plan's `arguments`, in order. Leaves the cursor on the first
    /// matching row, or at EOF.
    pub fn filter(&mut self, plan: &Plan, values: &[Value]) -> Result<()> {
        self.reset();
        self.eof = false;

        match plan.strategy {
            Strategy::IdLookup => {
                let id = values
                    .first()
                    .ok_or(Error::TypeError("row id must be an integer"))?
                    .as_row_id()?;
                self.source = Some(Source::Lookup(Some(id)));
            }
            Strategy::MatchScan => self.filter_match(plan, values)?,
            Strategy::FullScan => {
                self.source = Some(Source::Rows(self.table.store().scan_rows(match plan.order {
                    IdOrder::Desc => ScanOrder::Descending,
                    _ => ScanOrder::Ascending,
                })?));
            }
        }

        self.next()
    }

    fn filter_match(&mut self, plan: &Plan, values: &[Value]) -> Result<()> {
        let options = *self.table.options();
        let table = self.table;
        let mut expr = Expr::Any;
        for value in values {
            let raw = value.as_match_pattern()?;
            let compiled = Pattern::parse(raw)
                .and_then(|p| Ok((p.matcher(options.max_regexp_memory)?, p)));
            let (matcher, pattern) = match compiled {
                Ok(compiled) => compiled,
                Err(Error::BadPattern(msg)) if options.tolerant_bad_pattern => {
                    // The host asked for bad patterns to be tolerated; they
                    // match nothing.
                    debug!("tolerating bad pattern: {}", msg);
                    expr = Expr::None;
                    break;
                }
                Err(e) => return Err(e),
            };
            self.verifiers.push((matcher, pattern.extents));
            let mut load = |t| table.load_doclist(t);
            expr = Expr::and(expr, pattern.expr(&mut load)?);
            if expr.is_none() {
                break;
            }
        }

        if expr.is_any() {
            // No trigram condition at all: either refuse, or run the scan
            // strategy with the verifiers still applied.
            if options.forbid_full_match_scan {
                return Err(Error::NoPrefilter);
            }
            debug!("match pattern has no trigram filter, switching to full table scan");
            self.source = Some(Source::Rows(self.table.store().scan_rows(match plan.order {
                IdOrder::Desc => ScanOrder::Descending,
                _ => ScanOrder::Ascending,
            })?));
            return Ok(());
        }

        if plan.order == IdOrder::Desc {
            // Doclists are forward delta streams, so a descending scan
            // collects the ascending candidates and walks them backwards.
            let mut ids = Vec::new();
            let mut expr = expr;
            while let Some(id) = expr.next_match()? {
                ids.push(id);
            }
            ids.reverse();
            self.source = Some(Source::Ids(ids.into_iter()));
        } else {
            self.source = Some(Source::Expr(expr));
        }
        Ok(())
    }

    /// Advance to the next matching row, or EOF.
    pub fn next(&mut self) -> Result<()> {
        self.row = None;
        self.extents.clear();

        let mut source = match self.source.take() {
            Some(source) => source,
            None => {
                self.eof = true;
                return Ok(());
            }
        };

        let result = self.advance(&mut source);
        self.source = Some(source);
        self.eof = self.row.is_none();
        result
    }

    fn advance(&mut self, source: &mut Source<'t>) -> Result<()> {
        loop {
            let (id, text) = match source {
                Source::Expr(expr) => match expr.next_match()? {
                    Some(id) => (id, self.fetch_row(id)?),
                    None => return Ok(()),
                },
                Source::Ids(ids) => match ids.next() {
                    Some(id) => (id, self.fetch_row(id)?),
                    None => return Ok(()),
                },
                Source::Rows(rows) => match rows.next() {
                    Some(row) => row?,
                    None => return Ok(()),
                },
                Source::Lookup(slot) => match slot.take() {
                    Some(id) => match self.table.store().read_row(id)? {
                        Some(text) => (id, text),
                        None => return Ok(()),
                    },
                    None => return Ok(()),
                },
            };

            if self.verify(&text) {
                self.row = Some((id, text));
                return Ok(());
            }
        }
    }

    fn fetch_row(&self, id: DocId) -> Result<Vec<u8>> {
        self.table
            .store()
            .read_row(id)?
            .ok_or(Error::CorruptDoclist("doclist references a missing row"))
    }

    /// Run every verifier over the row text, recording extents for the
    /// patterns that asked for them. All patterns must match.
    fn verify(&mut self, text: &[u8]) -> bool {
        self.extents.clear();
        for (matcher, extents) in &self.verifiers {
            let hit = if *extents {
                matcher.find_extents(text, &mut self.extents)
            } else {
                matcher.is_match(text)
            };
            if !hit {
                self.extents.clear();
                return false;
            }
        }
        true
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn rowid(&self) -> Option<DocId> {
        self.row.as_ref().map(|(id, _)| *id)
    }

    pub fn text(&self) -> Option<&[u8]> {
        self.row.as_ref().map(|(_, text)| text.as_slice())
    }

    /// Extents recorded for the current row, in pattern order and ascending
    /// start order within each pattern. Reset on every `next`.
    pub fn extents(&self) -> &[(u32, u32)] {
        &self.extents
    }

    /// Release the expression tree and extent buffer and return to the
    /// initial state.
    pub fn reset(&mut self) {
        self.source = None;
        self.verifiers.clear();
        self.row = None;
        self.extents.clear();
        self.eof = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plan::{plan, Column, Constraint, ConstraintOp, OrderBy};
    use crate::store::MemStorage;
    use crate::table::{Table, TableOptions};

    fn corpus() -> Table<MemStorage> {
        let mut t = Table::new(MemStorage::new("docs"), TableOptions::default());
        t.begin().unwrap();
        t.insert(Some(1), b"hello world").unwrap();
        t.insert(Some(2), b"help me").unwrap();
        t.insert(Some(3), b"world wide").unwrap();
        t.commit().unwrap();
        t
    }

    fn match_plan(order: &[OrderBy]) -> Plan {
        plan(
            &[Constraint {
                column: Column::Text,
                op: ConstraintOp::Match,
                usable: true,
            }],
            order,
        )
    }

    fn collect_ids<S: Storage>(cursor: &mut Cursor<'_, S>) -> Vec<DocId> {
        let mut out = Vec::new();
        while !cursor.eof() {
            out.push(cursor.rowid().unwrap());
            cursor.next().unwrap();
        }
        out
    }

    fn search(t: &Table<MemStorage>, pattern: &str) -> Vec<DocId> {
        let mut cursor = t.cursor();
        cursor
            .filter(&match_plan(&[]), &[Value::Text(pattern.as_bytes().to_vec())])
            .unwrap();
        collect_ids(&mut cursor)
    }

    #[test]
    fn substring_match_returns_ascending_ids() {
        let t = corpus();
        assert_eq!(search(&t, "substr:hel"), vec![1, 2]);
        assert_eq!(search(&t, "substr:world"), vec![1, 3]);
        assert_eq!(search(&t, "substr:absent"), Vec::<DocId>::new());
    }

    #[test]
    fn short_pattern_falls_back_to_a_verified_full_scan() {
        let t = corpus();
        // Two bytes have no trigram; every row is scanned and the verifier
        // drops all of them.
        assert_eq!(search(&t, "substr:xy"), Vec::<DocId>::new());
        // The same fallback keeps true matches.
        assert_eq!(search(&t, "substr:me"), vec![2]);
    }

    #[test]
    fn short_pattern_errors_when_full_scans_are_forbidden() {
        let mut t = Table::new(
            MemStorage::new("docs"),
            TableOptions {
                forbid_full_match_scan: true,
                ..TableOptions::default()
            },
        );
        t.begin().unwrap();
        t.insert(Some(1), b"hello").unwrap();
        t.commit().unwrap();

        let mut cursor = t.cursor();
        let err = cursor
            .filter(&match_plan(&[]), &[Value::Text(b"substr:xy".to_vec())])
            .unwrap_err();
        assert!(matches!(err, Error::NoPrefilter));

        let err = cursor
            .filter(&match_plan(&[]), &[Value::Text(b"regexp:.*".to_vec())])
            .unwrap_err();
        assert!(matches!(err, Error::NoPrefilter));
    }

    #[test]
    fn regex_prefilter_narrows_candidates() {
        let t = corpus();
        assert_eq!(search(&t, "regexp:h[ae]l"), vec![1, 2]);
        assert_eq!(search(&t, "regexp:w.rld"), vec![1, 3]);
    }

    #[test]
    fn regex_verifier_drops_false_positives() {
        let mut t = corpus();
        t.begin().unwrap();
        // Contains every trigram of "hell" but not the string itself.
        t.insert(Some(4), b"hel ell mixture").unwrap();
        t.commit().unwrap();
        assert_eq!(search(&t, "regexp:hell"), vec![1]);
    }

    #[test]
    fn multiple_patterns_combine_by_and() {
        let t = corpus();
        let p = plan(
            &[
                Constraint {
                    column: Column::Text,
                    op: ConstraintOp::Match,
                    usable: true,
                },
                Constraint {
                    column: Column::Text,
                    op: ConstraintOp::Match,
                    usable: true,
                },
            ],
            &[],
        );
        let mut cursor = corpus_cursor_filter(&t, &p);
        assert_eq!(collect_ids(&mut cursor), vec![1]);
    }

    fn corpus_cursor_filter<'a>(
        t: &'a Table<MemStorage>,
        p: &Plan,
    ) -> Cursor<'a, MemStorage> {
        let mut cursor = t.cursor();
        cursor
            .filter(
                p,
                &[
                    Value::Text(b"substr:hel".to_vec()),
                    Value::Text(b"substr:world".to_vec()),
                ],
            )
            .unwrap();
        cursor
    }

    #[test]
    fn descending_match_scan() {
        let t = corpus();
        let p = match_plan(&[OrderBy {
            column: Column::Id,
            desc: true,
        }]);
        let mut cursor = t.cursor();
        cursor
            .filter(&p, &[Value::Text(b"substr:world".to_vec())])
            .unwrap();
        assert_eq!(collect_ids(&mut cursor), vec![3, 1]);
    }

    #[test]
    fn substring_extents_are_reported() {
        let t = corpus();
        let mut cursor = t.cursor();
        cursor
            .filter(
                &match_plan(&[]),
                &[Value::Text(b"substr-extents:world".to_vec())],
            )
            .unwrap();
        assert_eq!(cursor.rowid(), Some(1));
        assert_eq!(cursor.extents(), &[(6, 11)]);
        cursor.next().unwrap();
        assert_eq!(cursor.rowid(), Some(3));
        assert_eq!(cursor.extents(), &[(0, 5)]);
        cursor.next().unwrap();
        assert!(cursor.eof());
    }

    #[test]
    fn regex_extents_iterate_every_occurrence() {
        let mut t = Table::new(MemStorage::new("docs"), TableOptions::default());
        t.begin().unwrap();
        t.insert(Some(1), b"abc abc abc").unwrap();
        t.commit().unwrap();

        let mut cursor = t.cursor();
        cursor
            .filter(
                &match_plan(&[]),
                &[Value::Text(b"regexp-extents:abc".to_vec())],
            )
            .unwrap();
        assert_eq!(cursor.extents(), &[(0, 3), (4, 7), (8, 11)]);
    }

    #[test]
    fn full_scan_and_id_lookup_strategies() {
        let t = corpus();

        let p = plan(&[], &[]);
        assert_eq!(p.strategy, Strategy::FullScan);
        let mut cursor = t.cursor();
        cursor.filter(&p, &[]).unwrap();
        assert_eq!(collect_ids(&mut cursor), vec![1, 2, 3]);

        let p = plan(
            &[],
            &[OrderBy {
                column: Column::Id,
                desc: true,
            }],
        );
        let mut cursor = t.cursor();
        cursor.filter(&p, &[]).unwrap();
        assert_eq!(collect_ids(&mut cursor), vec![3, 2, 1]);

        let p = plan(
            &[Constraint {
                column: Column::Id,
                op: ConstraintOp::Eq,
                usable: true,
            }],
            &[],
        );
        assert_eq!(p.strategy, Strategy::IdLookup);
        let mut cursor = t.cursor();
        cursor.filter(&p, &[Value::Integer(2)]).unwrap();
        assert_eq!(cursor.rowid(), Some(2));
        assert_eq!(cursor.text(), Some(&b"help me"[..]));
        cursor.next().unwrap();
        assert!(cursor.eof());

        let mut cursor = t.cursor();
        cursor.filter(&p, &[Value::Integer(99)]).unwrap();
        assert!(cursor.eof());
    }

    #[test]
    fn tolerant_tables_treat_bad_patterns_as_empty() {
        let mut t = Table::new(
            MemStorage::new("docs"),
            TableOptions {
                tolerant_bad_pattern: true,
                ..TableOptions::default()
            },
        );
        t.begin().unwrap();
        t.insert(Some(1), b"hello").unwrap();
        t.commit().unwrap();

        let mut cursor = t.cursor();
        cursor
            .filter(&match_plan(&[]), &[Value::Text(b"glob:hel*".to_vec())])
            .unwrap();
        assert!(cursor.eof());

        // Without the flag the same pattern is an error.
        let strict = corpus();
        let mut cursor = strict.cursor();
        let err = cursor
            .filter(&match_plan(&[]), &[Value::Text(b"glob:hel*".to_vec())])
            .unwrap_err();
        assert!(matches!(err, Error::BadPattern(_)));
    }

    #[test]
    fn match_operand_must_be_text() {
        let t = corpus();
        let mut cursor = t.cursor();
        let err = cursor
            .filter(&match_plan(&[]), &[Value::Integer(7)])
            .unwrap_err();
        assert!(matches!(err, Error::TypeError(_)));
    }

    #[test]
    fn queries_inside_a_transaction_see_pending_writes() {
        let mut t = corpus();
        t.begin().unwrap();
        t.insert(Some(9), b"hello again").unwrap();
        t.delete(2).unwrap();

        assert_eq!(search(&t, "substr:hel"), vec![1, 9]);
        t.rollback().unwrap();
        assert_eq!(search(&t, "substr:hel"), vec![1, 2]);
    }

    quickcheck::quickcheck! {
        // Every trigram of an indexed substring occurs in the text, so the
        // index can never miss a true match.
        fn indexed_substrings_are_always_found(text: Vec<u8>, start: usize, len: usize) -> bool {
            if text.len() < 3 {
                return true;
            }
            let start = start % text.len();
            let end = (start + 3 + len % 16).min(text.len());
            if end - start < 3 {
                return true;
            }
            let needle = &text[start..end];

            let mut t = Table::new(MemStorage::new("docs"), TableOptions::default());
            t.begin().unwrap();
            t.insert(Some(1), &text).unwrap();
            t.commit().unwrap();

            let pattern = [b"substr:".as_slice(), needle].concat();
            let mut cursor = t.cursor();
            cursor.filter(&match_plan(&[]), &[Value::Text(pattern)]).unwrap();
            collect_ids(&mut cursor).contains(&1)
        }
    }

    #[test]
    fn reset_returns_the_cursor_to_its_initial_state() {
        let t = corpus();
        let mut cursor = t.cursor();
        cursor
            .filter(&match_plan(&[]), &[Value::Text(b"substr:hel".to_vec())])
            .unwrap();
        assert!(!cursor.eof());
        cursor.reset();
        assert!(cursor.eof());
        assert_eq!(cursor.rowid(), None);
        assert!(cursor.extents().is_empty());

        // A reset cursor can be filtered again.
        cursor
            .filter(&match_plan(&[]), &[Value::Text(b"substr:world".to_vec())])
            .unwrap();
        assert_eq!(collect_ids(&mut cursor), vec![1, 3]);
    }
}
