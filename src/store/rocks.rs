use std::io::{self, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};

use crate::error::{Error, Result};
use crate::store::{ScanOrder, Storage};
use crate::trigram::Trigram;
use crate::DocId;

const KIND_ROW: u8 = 0;
const KIND_DOCLIST: u8 = 1;

/// Flipping the sign bit makes signed ids sort correctly as unsigned
/// big-endian bytes.
fn encode_id(id: DocId) -> u64 {
    (id as u64) ^ (1 << 63)
}

fn decode_id(v: u64) -> DocId {
    (v ^ (1 << 63)) as i64
}

/// Keys for one logical table. Both backing key spaces share the
/// length-prefixed table name, so every table owns a contiguous key range
/// and rows sort before doclists within it.
#[derive(PartialEq, Eq, Clone, Debug)]
enum TableKey {
    Row(DocId),
    Doclist(Trigram),
}

impl TableKey {
    fn discriminant(&self) -> u8 {
        match self {
            Self::Row(_) => KIND_ROW,
            Self::Doclist(_) => KIND_DOCLIST,
        }
    }

    fn write_to<W: Write>(&self, table: &str, w: &mut W) -> io::Result<()> {
        write_prefix(table, self.discriminant(), w)?;
        match self {
            Self::Row(id) => w.write_u64::<BigEndian>(encode_id(*id))?,
            Self::Doclist(t) => w.write_u32::<BigEndian>(t.as_u32())?,
        }
        Ok(())
    }

    fn to_vec(&self, table: &str) -> Vec<u8> {
        let mut v = Vec::with_capacity(2 + table.len() + 1 + 8);
        self.write_to(table, &mut v)
            .expect("writing to a Vec does not fail");
        v
    }
}

fn write_prefix<W: Write>(table: &str, kind: u8, w: &mut W) -> io::Result<()> {
    w.write_u16::<BigEndian>(table.len() as u16)?;
    w.write_all(table.as_bytes())?;
    w.write_u8(kind)?;
    Ok(())
}

fn kind_prefix(table: &str, kind: u8) -> Vec<u8> {
    let mut v = Vec::with_capacity(2 + table.len() + 1);
    write_prefix(table, kind, &mut v).expect("writing to a Vec does not fail");
    v
}

fn table_prefix(table: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(2 + table.len());
    v.write_u16::<BigEndian>(table.len() as u16)
        .expect("writing to a Vec does not fail");
    v.extend_from_slice(table.as_bytes());
    v
}

fn decode_row_key(key: &[u8], prefix_len: usize) -> Result<DocId> {
    let payload = &key[prefix_len..];
    if payload.len() != 8 {
        return Err(Error::Store("malformed row key".to_string()));
    }
    Ok(decode_id(BigEndian::read_u64(payload)))
}

fn decode_doclist_key(key: &[u8], prefix_len: usize) -> Result<Trigram> {
    let payload = &key[prefix_len..];
    if payload.len() != 4 {
        return Err(Error::Store("malformed doclist key".to_string()));
    }
    Ok(Trigram::from_u32(BigEndian::read_u32(payload)))
}

/// RocksDB-backed store. Writes inside a transaction are applied
/// immediately and recorded in an undo log; `rollback` replays the log in
/// reverse, so reads always observe the transaction's own writes.
pub struct RocksStorage {
    db: DB,
    table: String,
    undo: Option<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

impl RocksStorage {
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        if table.is_empty() || table.len() > u16::MAX as usize {
            return Err(Error::Store(format!("bad table name {:?}", table)));
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            table: table.to_string(),
            undo: None,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn put(&mut self, key: Vec<u8>, value: &[u8]) -> Result<()> {
        let old = match self.undo {
            Some(_) => Some(self.db.get(&key)?),
            None => None,
        };
        if let (Some(undo), Some(old)) = (self.undo.as_mut(), old) {
            undo.push((key.clone(), old));
        }
        self.db.put(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        let old = match self.undo {
            Some(_) => Some(self.db.get(&key)?),
            None => None,
        };
        if let (Some(undo), Some(old)) = (self.undo.as_mut(), old) {
            undo.push((key.clone(), old));
        }
        self.db.delete(key)?;
        Ok(())
    }

    /// All live `(key, value)` pairs of this table, rows and doclists both.
    fn collect_table(&self) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let prefix = table_prefix(&self.table);
        let mut out = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }
}

impl Storage for RocksStorage {
    fn read_doclist(&self, trigram: Trigram) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(TableKey::Doclist(trigram).to_vec(&self.table))?)
    }

    fn write_doclist(&mut self, trigram: Trigram, doclist: &[u8]) -> Result<()> {
        let key = TableKey::Doclist(trigram).to_vec(&self.table);
        if doclist.is_empty() {
            self.delete(key)
        } else {
            self.put(key, doclist)
        }
    }

    fn scan_doclists<'a>(
        &'a self,
    ) -> Result<Box<dyn Iterator<Item = Result<(Trigram, Vec<u8>)>> + 'a>> {
        let prefix = kind_prefix(&self.table, KIND_DOCLIST);
        let prefix_len = prefix.len();
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        Ok(Box::new(
            iter.map(|item| item.map_err(Error::from))
                .take_while(move |item| match item {
                    Ok((key, _)) => key.starts_with(&prefix),
                    Err(_) => true,
                })
                .map(move |item| {
                    let (key, value) = item?;
                    Ok((decode_doclist_key(&key, prefix_len)?, value.into_vec()))
                }),
        ))
    }

    fn read_row(&self, id: DocId) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(TableKey::Row(id).to_vec(&self.table))?)
    }

    fn write_row(&mut self, id: DocId, text: &[u8]) -> Result<()> {
        self.put(TableKey::Row(id).to_vec(&self.table), text)
    }

    fn delete_row(&mut self, id: DocId) -> Result<()> {
        self.delete(TableKey::Row(id).to_vec(&self.table))
    }

    fn max_row_id(&self) -> Result<Option<DocId>> {
        let prefix = kind_prefix(&self.table, KIND_ROW);
        // One byte past any 8-byte id payload under this prefix.
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 9]);
        let mut iter = self
            .db
            .iterator(IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if key.starts_with(&prefix) {
                    Ok(Some(decode_row_key(&key, prefix.len())?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    fn scan_rows<'a>(
        &'a self,
        order: ScanOrder,
    ) -> Result<Box<dyn Iterator<Item = Result<(DocId, Vec<u8>)>> + 'a>> {
        let prefix = kind_prefix(&self.table, KIND_ROW);
        let prefix_len = prefix.len();
        let iter = match order {
            ScanOrder::Ascending => self
                .db
                .iterator(IteratorMode::From(&prefix, Direction::Forward)),
            ScanOrder::Descending => {
                let mut upper = prefix.clone();
                upper.extend_from_slice(&[0xFF; 9]);
                self.db
                    .iterator(IteratorMode::From(&upper, Direction::Reverse))
            }
        };
        Ok(Box::new(
            iter.map(|item| item.map_err(Error::from))
                .take_while(move |item| match item {
                    Ok((key, _)) => key.starts_with(&prefix),
                    Err(_) => true,
                })
                .map(move |item| {
                    let (key, value) = item?;
                    Ok((decode_row_key(&key, prefix_len)?, value.into_vec()))
                }),
        ))
    }

    fn begin(&mut self) -> Result<()> {
        self.undo = Some(Vec::new());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.undo = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(undo) = self.undo.take() {
            for (key, old) in undo.into_iter().rev() {
                match old {
                    Some(value) => self.db.put(key, value)?,
                    None => self.db.delete(key)?,
                }
            }
        }
        Ok(())
    }

    fn rename(&mut self, new_name: &str) -> Result<()> {
        if new_name.is_empty() || new_name.len() > u16::MAX as usize {
            return Err(Error::Store(format!("bad table name {:?}", new_name)));
        }
        let old_prefix_len = table_prefix(&self.table).len();
        let new_prefix = table_prefix(new_name);
        let mut batch = WriteBatch::default();
        for (key, value) in self.collect_table()? {
            let mut new_key = new_prefix.clone();
            new_key.extend_from_slice(&key[old_prefix_len..]);
            batch.put(new_key, value);
            batch.delete(key);
        }
        self.db.write(batch)?;
        self.table = new_name.to_string();
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (key, _) in self.collect_table()? {
            batch.delete(key);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
