//! A cursor walks one slot's open-addressed table looking for records
//! whose key matches. It holds an `Arc<Mapping>` for as long as it is
//! alive, which is this crate's registration: the generation a cursor is
//! reading from cannot be retired while the cursor still exists.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash;
use crate::layout::{self, SlotDescriptor, TableEntry};
use crate::mapping::Mapping;

/// A thread's (or task's) hold on one mapping generation. Produced by
/// [`crate::db::Db::register`] and consumed by [`Cursor::new`]; dropping
/// it is this crate's unregistration.
pub type Registration = Arc<Mapping>;

/// Iterates the records matching a key, in insertion order, within a
/// single registered generation.
pub struct Cursor {
    registration: Registration,
    key_hash: u32,
    table_base: u64,
    table_slots: u64,
    probe_pos: u64,
    probes_done: u64,
    started: bool,
    data_pos: u64,
    data_len: u32,
}

impl Cursor {
    pub(crate) fn new(registration: Registration) -> Self {
        Cursor {
            registration,
            key_hash: 0,
            table_base: 0,
            table_slots: 0,
            probe_pos: 0,
            probes_done: 0,
            started: false,
            data_pos: 0,
            data_len: 0,
        }
    }

    /// Resets probing state for `key`/`tag`. Always succeeds; the actual
    /// table walk happens lazily in [`find_next`](Cursor::find_next).
    pub fn find_start(&mut self, key: &[u8], tag: u8) {
        self.key_hash = hash::hash_with_tag(key, tag);
        self.started = false;
        self.probes_done = 0;
        self.data_len = 0;
    }

    /// Advances to the next record matching `key`/`tag` and returns its
    /// value. Returns `Ok(None)` once the probe sequence hits an empty
    /// slot or exhausts the table, meaning there are no more matches.
    /// `key` and `tag` must match the values last passed to
    /// [`find_start`](Cursor::find_start).
    pub fn find_next(&mut self, key: &[u8], tag: u8) -> Result<Option<&[u8]>> {
        // `bytes` borrows only `self.registration`; every subsequent
        // field write below is a direct, disjoint field projection on
        // `self` so it can coexist with this borrow. Avoid routing
        // through `&self`/`&mut self` methods here, which would
        // (correctly) be rejected as re-borrowing all of `self`.
        let bytes: &[u8] = self.registration.bytes();
        let filename: &Path = self.registration.filename();

        if !self.started {
            self.key_hash = hash::hash_with_tag(key, tag);
            let slot = hash::top_slot(self.key_hash);
            let desc = SlotDescriptor::read(bytes, slot)
                .ok_or_else(|| Error::format(filename, "truncated header"))?;
            if desc.slot_count == 0 {
                return Ok(None);
            }
            self.table_slots = desc.slot_count;
            self.table_base = desc.table_offset;
            let start = hash::probe_start(self.key_hash, desc.slot_count as u32) as u64;
            self.probe_pos = self.table_base + start * layout::TABLE_ENTRY_SIZE as u64;
            self.probes_done = 0;
            self.started = true;
        }

        while self.probes_done < self.table_slots {
            let index = (self.probe_pos - self.table_base) / layout::TABLE_ENTRY_SIZE as u64;
            let entry = TableEntry::read(bytes, self.table_base as usize, index)
                .ok_or_else(|| Error::format(filename, "truncated hash table"))?;

            self.probe_pos = advance_probe(self.probe_pos, self.table_base, self.table_slots);
            self.probes_done += 1;

            if entry.is_empty() {
                return Ok(None);
            }
            if entry.hash != self.key_hash {
                continue;
            }

            if let Some((data_pos, data_len)) =
                match_record(bytes, filename, entry.record_offset, key, tag)?
            {
                self.data_pos = data_pos;
                self.data_len = data_len;
                let start = data_pos as usize;
                let end = start + data_len as usize;
                return Ok(Some(&bytes[start..end]));
            }
        }
        Ok(None)
    }

    /// Convenience composition of `find_start` then `find_next`.
    pub fn find(&mut self, key: &[u8], tag: u8) -> Result<Option<&[u8]>> {
        self.find_start(key, tag);
        self.find_next(key, tag)
    }

    /// Length, in bytes, of the value the last successful `find_next`
    /// returned.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    /// Copies the current match's value into `buf`, which must be
    /// exactly [`data_len`](Cursor::data_len) bytes.
    pub fn read_into(&self, buf: &mut [u8]) -> Result<()> {
        let bytes = self.registration.bytes();
        let start = self.data_pos as usize;
        let end = start + buf.len();
        let src = bytes
            .get(start..end)
            .ok_or_else(|| Error::format(self.registration.filename(), "read past end of mapping"))?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

fn advance_probe(probe_pos: u64, table_base: u64, table_slots: u64) -> u64 {
    let next = probe_pos + layout::TABLE_ENTRY_SIZE as u64;
    let table_end = table_base + table_slots * layout::TABLE_ENTRY_SIZE as u64;
    if next >= table_end {
        table_base
    } else {
        next
    }
}

fn match_record(
    bytes: &[u8],
    filename: &Path,
    record_offset: u64,
    key: &[u8],
    tag: u8,
) -> Result<Option<(u64, u32)>> {
    let off = record_offset as usize;
    let klen =
        layout::read_u32be(bytes, off).ok_or_else(|| Error::format(filename, "truncated record header"))?;
    let vlen = layout::read_u32be(bytes, off + 4)
        .ok_or_else(|| Error::format(filename, "truncated record header"))?;

    let key_start = off + layout::RECORD_HEADER_SIZE;
    let stored_key = bytes
        .get(key_start..key_start + klen as usize)
        .ok_or_else(|| Error::format(filename, "truncated record key"))?;

    let matches = if tag != 0 {
        stored_key.len() == key.len() + 1 && stored_key[0] == tag && stored_key[1..] == *key
    } else {
        stored_key == key
    };

    if !matches {
        return Ok(None);
    }
    Ok(Some(((key_start + klen as usize) as u64, vlen)))
}
