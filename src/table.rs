use log::{debug, trace};

use crate::cursor::Cursor;
use crate::doclist::{self, DoclistCursor};
use crate::error::{Error, Result};
use crate::pending::PendingMap;
use crate::store::Storage;
use crate::trigram::{extract_trigrams, Trigram};
use crate::DocId;

/// Pending changes above this size trigger an implicit sync, bounding the
/// memory held between transaction boundaries.
pub const MAX_PENDING_BYTES: usize = 1 << 20;

/// Table-level configuration options.
#[derive(Clone, Copy, Debug)]
pub struct TableOptions {
    /// Fail patterns that lower to ANY instead of falling back to a full
    /// table scan.
    pub forbid_full_match_scan: bool,
    /// Upper bound in bytes for compiling a regular expression.
    pub max_regexp_memory: usize,
    /// Treat an unparseable pattern as matching nothing instead of
    /// reporting an error.
    pub tolerant_bad_pattern: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            forbid_full_match_scan: false,
            max_regexp_memory: 8 << 20,
            tolerant_bad_pattern: false,
        }
    }
}

/// Aggregate sizes of a table, for diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableStats {
    pub num_rows: usize,
    pub row_bytes: usize,
    pub unique_trigrams: usize,
    pub doclist_bytes: usize,
    pub pending_bytes: usize,
}

/// One indexed logical table: row content plus the trigram inverted index,
/// both living in a host `Storage`. Mutations buffer per-trigram changes in
/// the pending table; `sync` merges them into the persisted doclists.
pub struct Table<S: Storage> {
    store: S,
    pending: PendingMap,
    options: TableOptions,
}

impl<S: Storage> Table<S> {
    pub fn new(store: S, options: TableOptions) -> Self {
        Self {
            store,
            pending: PendingMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Insert a row. With `id = None` the next free id is assigned.
    pub fn insert(&mut self, id: Option<DocId>, text: &[u8]) -> Result<DocId> {
        let id = match id {
            Some(id) => {
                if id < 0 {
                    return Err(Error::TypeError("document id must be non-negative"));
                }
                if self.store.read_row(id)?.is_some() {
                    return Err(Error::Store(format!("row id {} already exists", id)));
                }
                id
            }
            None => self.store.max_row_id()?.map_or(1, |max| max + 1),
        };
        self.store.write_row(id, text)?;
        trace!("inserted row {} ({} bytes)", id, text.len());
        self.index_text(id, text)?;
        Ok(id)
    }

    /// Delete a row, queueing index removals for its trigrams.
    pub fn delete(&mut self, id: DocId) -> Result<()> {
        let text = self
            .store
            .read_row(id)?
            .ok_or_else(|| Error::Store(format!("no row with id {}", id)))?;
        self.unindex_text(id, &text)?;
        self.store.delete_row(id)?;
        trace!("deleted row {}", id);
        Ok(())
    }

    /// Replace a row's text, optionally moving it to a new id.
    pub fn update(&mut self, id: DocId, new_id: Option<DocId>, text: &[u8]) -> Result<()> {
        let old_text = self
            .store
            .read_row(id)?
            .ok_or_else(|| Error::Store(format!("no row with id {}", id)))?;
        self.unindex_text(id, &old_text)?;

        let new_id = new_id.unwrap_or(id);
        if new_id < 0 {
            return Err(Error::TypeError("document id must be non-negative"));
        }
        if new_id != id {
            self.store.delete_row(id)?;
        }
        self.store.write_row(new_id, text)?;
        trace!("updated row {} (new id {})", id, new_id);
        self.index_text(new_id, text)?;
        Ok(())
    }

    fn index_text(&mut self, id: DocId, text: &[u8]) -> Result<()> {
        for trigram in extract_trigrams(text) {
            self.pending.add(trigram, id)?;
        }
        self.flush_if_oversized()
    }

    fn unindex_text(&mut self, id: DocId, text: &[u8]) -> Result<()> {
        for trigram in extract_trigrams(text) {
            self.pending.remove(trigram, id)?;
        }
        self.flush_if_oversized()
    }

    fn flush_if_oversized(&mut self) -> Result<()> {
        if self.pending.approx_memory() > MAX_PENDING_BYTES {
            debug!(
                "pending changes reached {} bytes, syncing early",
                self.pending.approx_memory()
            );
            self.sync()?;
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        debug!("begin transaction");
        self.store.begin()
    }

    /// Flush every pending change: each drained entry is merged into its
    /// trigram's stored doclist. Called by the host before commit, and
    /// implicitly under memory pressure.
    pub fn sync(&mut self) -> Result<()> {
        let mut flushed = 0usize;
        let store = &mut self.store;
        for entry in self.pending.drain() {
            let old = store.read_doclist(entry.trigram)?.unwrap_or_default();
            let merged = doclist::merge(old, &entry.added, &entry.removed)?;
            store.write_doclist(entry.trigram, &merged)?;
            flushed += 1;
        }
        debug!("sync flushed {} doclist(s)", flushed);
        Ok(())
    }

    /// Commit; syncs first if anything is still pending, so a commit after
    /// a successful sync cannot fail on index state.
    pub fn commit(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.sync()?;
        }
        debug!("commit transaction");
        self.store.commit()
    }

    /// Discard pending changes and roll the store back.
    pub fn rollback(&mut self) -> Result<()> {
        debug!("rollback transaction");
        self.pending.reset();
        self.store.rollback()
    }

    /// Rename the table. Pending changes are flushed first; running cursors
    /// are invalidated.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        self.sync()?;
        self.store.rename(new_name)
    }

    /// Drop the table's content and index.
    pub fn destroy(mut self) -> Result<()> {
        self.pending.reset();
        self.store.destroy()
    }

    /// The doclist a query should see for `trigram`: the stored blob with
    /// this transaction's pending changes merged in. `None` means no id
    /// currently contains the trigram.
    pub fn load_doclist(&self, trigram: Trigram) -> Result<Option<Vec<u8>>> {
        let stored = self.store.read_doclist(trigram)?;
        match self.pending.find(trigram) {
            Some((added, removed)) if !added.is_empty() || !removed.is_empty() => {
                let merged = doclist::merge(stored.unwrap_or_default(), added, removed)?;
                Ok(if merged.is_empty() { None } else { Some(merged) })
            }
            _ => Ok(stored.filter(|blob| !blob.is_empty())),
        }
    }

    /// True when no index change is waiting to be flushed.
    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn cursor(&self) -> Cursor<'_, S> {
        Cursor::new(self)
    }

    pub fn stats(&self) -> Result<TableStats> {
        let mut stats = TableStats {
            pending_bytes: self.pending.approx_memory(),
            ..TableStats::default()
        };
        for row in self.store.scan_rows(crate::store::ScanOrder::Ascending)? {
            let (_, text) = row?;
            stats.num_rows += 1;
            stats.row_bytes += text.len();
        }
        for entry in self.store.scan_doclists()? {
            let (_, blob) = entry?;
            stats.unique_trigrams += 1;
            stats.doclist_bytes += blob.len();
        }
        Ok(stats)
    }

    /// Decode the full stored doclist of a trigram, for diagnostics.
    pub fn doclist_ids(&self, trigram: Trigram) -> Result<Vec<DocId>> {
        match self.load_doclist(trigram)? {
            Some(blob) => DoclistCursor::new(blob).collect_ids(),
            None => Ok(Vec::new()),
        }
    }
}
