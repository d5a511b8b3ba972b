use crate::error::{Error, Result};
use crate::varint::{read_varint, write_varint, MAX_VARINT_LEN};
use crate::DocId;

/// Streaming decoder over a doclist blob.
///
/// A doclist encodes a strictly increasing id sequence as varints over
/// first-order deltas with base 0. The cursor owns its buffer; decoding is
/// one varint per step, so any truncation at a varint boundary is a valid
/// shorter doclist.
pub struct DoclistCursor {
    buf: Vec<u8>,
    offset: usize,
    last_id: DocId,
}

impl DoclistCursor {
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            buf,
            offset: 0,
            last_id: 0,
        }
    }

    /// Decode the next id, or `None` at end of buffer.
    pub fn next_id(&mut self) -> Result<Option<DocId>> {
        if self.offset >= self.buf.len() {
            return Ok(None);
        }
        let first = self.offset == 0;
        let (delta, n) = read_varint(&self.buf[self.offset..])?;
        self.offset += n;
        if !first && delta == 0 {
            return Err(Error::CorruptDoclist("ids are not strictly increasing"));
        }
        let delta =
            DocId::try_from(delta).map_err(|_| Error::CorruptDoclist("delta exceeds id range"))?;
        let id = self
            .last_id
            .checked_add(delta)
            .ok_or(Error::CorruptDoclist("id out of range"))?;
        self.last_id = id;
        Ok(Some(id))
    }

    /// Decode the remainder of the list.
    pub fn collect_ids(mut self) -> Result<Vec<DocId>> {
        let mut ids = Vec::new();
        while let Some(id) = self.next_id()? {
            ids.push(id);
        }
        Ok(ids)
    }
}

/// Append-only doclist encoder. Ids must be pushed in strictly increasing
/// order, starting at or above 0.
pub struct DoclistWriter {
    buf: Vec<u8>,
    last_id: DocId,
}

impl DoclistWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
            last_id: 0,
        }
    }

    pub fn push(&mut self, id: DocId) {
        debug_assert!(id >= 0, "document ids are non-negative");
        debug_assert!(
            self.buf.is_empty() || id > self.last_id,
            "ids must be strictly increasing"
        );
        write_varint(&mut self.buf, (id - self.last_id) as u64);
        self.last_id = id;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for DoclistWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a sorted id slice as a fresh doclist.
pub fn encode_all(ids: &[DocId]) -> Vec<u8> {
    let mut w = DoclistWriter::with_capacity(ids.len() * MAX_VARINT_LEN);
    for &id in ids {
        w.push(id);
    }
    w.into_bytes()
}

/// Produce a new doclist containing `(decode(old) ∪ add) \ remove`.
///
/// `add` and `remove` must each be sorted, duplicate free, and disjoint from
/// one another. This single linear pass is the only point at which doclists
/// grow or shrink on disk: an id present in both `old` and `add` is emitted
/// once, an id present in `remove` is dropped.
pub fn merge(old: Vec<u8>, add: &[DocId], remove: &[DocId]) -> Result<Vec<u8>> {
    debug_assert!(add.windows(2).all(|w| w[0] < w[1]));
    debug_assert!(remove.windows(2).all(|w| w[0] < w[1]));

    let mut out = DoclistWriter::with_capacity(old.len() + add.len() * MAX_VARINT_LEN);
    let mut cursor = DoclistCursor::new(old);
    let mut next_old = cursor.next_id()?;
    let mut add = add.iter().copied().peekable();
    let mut remove = remove.iter().copied().peekable();

    loop {
        let id = match (next_old, add.peek().copied()) {
            (None, None) => break,
            (Some(o), Some(a)) if o == a => {
                next_old = cursor.next_id()?;
                add.next();
                o
            }
            (Some(o), Some(a)) if o < a => {
                next_old = cursor.next_id()?;
                o
            }
            (Some(o), None) => {
                next_old = cursor.next_id()?;
                o
            }
            (_, Some(a)) => {
                add.next();
                a
            }
        };

        while remove.peek().map_or(false, |&r| r < id) {
            remove.next();
        }
        if remove.peek() == Some(&id) {
            remove.next();
            continue;
        }
        out.push(id);
    }

    Ok(out.into_bytes())
}
