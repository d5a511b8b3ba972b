use std::collections::BTreeMap;

use crate::error::Result;
use crate::store::{ScanOrder, Storage};
use crate::trigram::Trigram;
use crate::DocId;

/// In-memory store, mainly for tests. Transactions snapshot both maps on
/// `begin` and restore the snapshot on `rollback`.
pub struct MemStorage {
    rows: BTreeMap<DocId, Vec<u8>>,
    doclists: BTreeMap<u32, Vec<u8>>,
    name: String,
    snapshot: Option<(BTreeMap<DocId, Vec<u8>>, BTreeMap<u32, Vec<u8>>)>,
}

impl MemStorage {
    pub fn new(name: &str) -> Self {
        Self {
            rows: BTreeMap::new(),
            doclists: BTreeMap::new(),
            name: name.to_string(),
            snapshot: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Storage for MemStorage {
    fn read_doclist(&self, trigram: Trigram) -> Result<Option<Vec<u8>>> {
        Ok(self.doclists.get(&trigram.as_u32()).cloned())
    }

    fn write_doclist(&mut self, trigram: Trigram, doclist: &[u8]) -> Result<()> {
        self.doclists.insert(trigram.as_u32(), doclist.to_vec());
        Ok(())
    }

    fn scan_doclists<'a>(
        &'a self,
    ) -> Result<Box<dyn Iterator<Item = Result<(Trigram, Vec<u8>)>> + 'a>> {
        Ok(Box::new(
            self.doclists
                .iter()
                .map(|(&t, blob)| Ok((Trigram::from_u32(t), blob.clone()))),
        ))
    }

    fn read_row(&self, id: DocId) -> Result<Option<Vec<u8>>> {
        Ok(self.rows.get(&id).cloned())
    }

    fn write_row(&mut self, id: DocId, text: &[u8]) -> Result<()> {
        self.rows.insert(id, text.to_vec());
        Ok(())
    }

    fn delete_row(&mut self, id: DocId) -> Result<()> {
        self.rows.remove(&id);
        Ok(())
    }

    fn max_row_id(&self) -> Result<Option<DocId>> {
        Ok(self.rows.keys().next_back().copied())
    }

    fn scan_rows<'a>(
        &'a self,
        order: ScanOrder,
    ) -> Result<Box<dyn Iterator<Item = Result<(DocId, Vec<u8>)>> + 'a>> {
        let iter = self.rows.iter().map(|(&id, text)| Ok((id, text.clone())));
        Ok(match order {
            ScanOrder::Ascending => Box::new(iter),
            ScanOrder::Descending => Box::new(iter.rev()),
        })
    }

    fn begin(&mut self) -> Result<()> {
        self.snapshot = Some((self.rows.clone(), self.doclists.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some((rows, doclists)) = self.snapshot.take() {
            self.rows = rows;
            self.doclists = doclists;
        }
        Ok(())
    }

    fn rename(&mut self, new_name: &str) -> Result<()> {
        self.name = new_name.to_string();
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.rows.clear();
        self.doclists.clear();
        Ok(())
    }
}
