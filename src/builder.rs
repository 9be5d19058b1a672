//! Streams key/value pairs into a new mcdb file. Records are written as
//! they arrive; the 256 hash tables and the header are only known once
//! every record has been seen, so they are written last, and the file is
//! published atomically by renaming a temporary file into place.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::hash;
use crate::layout::{self, HEADER_SIZE, HEADER_SLOTS};

/// Counts from a completed [`Builder::finish`], for callers that want to
/// report build progress without this crate taking a logging dependency
/// of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildStats {
    pub records: u64,
    pub tables_used: usize,
    pub bytes: u64,
}

/// Builds a new mcdb file at a given path. Dropping a `Builder` before
/// calling [`finish`](Builder::finish) discards everything written so
/// far; the destination path is never touched until `finish` succeeds.
pub struct Builder {
    tmp: NamedTempFile,
    final_path: PathBuf,
    pos: u64,
    slots: Box<[Vec<(u32, u64)>; HEADER_SLOTS]>,
    record_count: u64,
}

impl Builder {
    /// Opens a staging file in the same directory as `path`, so the final
    /// rename is on the same filesystem and therefore atomic.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(&final_path, e))?;
        tmp.as_file_mut()
            .seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(|e| Error::io(&final_path, e))?;
        Ok(Builder {
            tmp,
            final_path,
            pos: HEADER_SIZE as u64,
            slots: Box::new(std::array::from_fn(|_| Vec::new())),
            record_count: 0,
        })
    }

    /// Appends one record. Keys are not required to be unique; duplicates
    /// are retained in insertion order and surfaced to readers via
    /// repeated `find_next` calls.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.add_tagged(0, key, value)
    }

    /// Appends one record under a non-default tag, for callers that
    /// partition a single file into independent namespaces the way the
    /// original nss_mcdb maps did. The tag is folded into the stored
    /// key's hash and prepended to the stored key, matching
    /// [`crate::cursor::Cursor`]'s tagged lookup; `tag == 0` is equivalent
    /// to [`add`](Builder::add).
    pub fn add_tagged(&mut self, tag: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let stored_key_len = key.len() as u64 + if tag != 0 { 1 } else { 0 };
        if stored_key_len > layout::MAX_FIELD_LEN || value.len() as u64 > layout::MAX_FIELD_LEN {
            return Err(Error::format(
                &self.final_path,
                "key or value exceeds the maximum field length",
            ));
        }
        if self.record_count >= layout::MAX_RECORDS {
            return Err(Error::format(
                &self.final_path,
                "maximum record count exceeded",
            ));
        }

        let h = hash::hash_with_tag(key, tag);
        let record_offset = self.pos;

        let mut header = [0u8; layout::RECORD_HEADER_SIZE];
        layout::write_u32be(&mut header, 0, stored_key_len as u32);
        layout::write_u32be(&mut header, 4, value.len() as u32);

        let file = self.tmp.as_file_mut();
        file.write_all(&header)
            .map_err(|e| Error::io(&self.final_path, e))?;
        if tag != 0 {
            file.write_all(&[tag])
                .map_err(|e| Error::io(&self.final_path, e))?;
        }
        file.write_all(key)
            .map_err(|e| Error::io(&self.final_path, e))?;
        file.write_all(value)
            .map_err(|e| Error::io(&self.final_path, e))?;

        self.pos += layout::RECORD_HEADER_SIZE as u64 + stored_key_len + value.len() as u64;
        self.slots[hash::top_slot(h)].push((h, record_offset));
        self.record_count += 1;
        Ok(())
    }

    /// Writes the hash tables and header, fsyncs the data, and atomically
    /// publishes the file at its destination path.
    pub fn finish(mut self) -> Result<BuildStats> {
        self.pad_to_boundary()?;
        let tables_used = self.write_tables_and_header()?;

        let stats = BuildStats {
            records: self.record_count,
            tables_used,
            bytes: self.pos,
        };

        let Builder {
            tmp, final_path, ..
        } = self;
        tmp.persist(&final_path)
            .map_err(|e| Error::io(&final_path, e.error))?;
        Ok(stats)
    }

    fn pad_to_boundary(&mut self) -> Result<()> {
        let padded = layout::align_up(self.pos as usize, 8) as u64;
        if padded > self.pos {
            let pad = vec![0u8; (padded - self.pos) as usize];
            self.tmp
                .as_file_mut()
                .write_all(&pad)
                .map_err(|e| Error::io(&self.final_path, e))?;
            self.pos = padded;
        }
        Ok(())
    }

    fn write_tables_and_header(&mut self) -> Result<usize> {
        let mut header = vec![0u8; HEADER_SIZE];
        let mut table_offset = self.pos;
        let mut tables_used = 0usize;

        for slot in 0..HEADER_SLOTS {
            let entries = std::mem::take(&mut self.slots[slot]);
            if entries.is_empty() {
                layout::SlotDescriptor {
                    table_offset,
                    slot_count: 0,
                }
                .write(&mut header, slot);
                continue;
            }

            // At least double the entry count and round up to a power of
            // two, so linear probing keeps the load factor under 0.5 and
            // the probe sequence (hash % slot_count) covers every slot.
            let slot_count = (2 * entries.len() as u64).max(2).next_power_of_two();
            let mut table = vec![0u8; slot_count as usize * layout::TABLE_ENTRY_SIZE];
            for (h, offset) in entries {
                let mut idx = hash::probe_start(h, slot_count as u32) as u64;
                loop {
                    let existing =
                        layout::TableEntry::read(&table, 0, idx).expect("idx within table");
                    if existing.is_empty() {
                        layout::TableEntry {
                            hash: h,
                            record_offset: offset,
                        }
                        .write(&mut table, 0, idx);
                        break;
                    }
                    idx = (idx + 1) % slot_count;
                }
            }

            self.tmp
                .as_file_mut()
                .write_all(&table)
                .map_err(|e| Error::io(&self.final_path, e))?;
            layout::SlotDescriptor {
                table_offset,
                slot_count,
            }
            .write(&mut header, slot);
            table_offset += table.len() as u64;
            self.pos += table.len() as u64;
            tables_used += 1;
        }

        let file = self.tmp.as_file_mut();
        file.sync_all().map_err(|e| Error::io(&self.final_path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(&self.final_path, e))?;
        file.write_all(&header)
            .map_err(|e| Error::io(&self.final_path, e))?;
        file.sync_all().map_err(|e| Error::io(&self.final_path, e))?;
        Ok(tables_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn build_and_reopen_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mcdb");

        let mut b = Builder::new(&path).unwrap();
        b.add(b"alpha", b"1").unwrap();
        b.add(b"beta", b"2").unwrap();
        b.add(b"alpha", b"3").unwrap();
        b.finish().unwrap();

        let db = Db::open(dir.path(), "test.mcdb").unwrap();
        let mut cur = db.find_cursor();
        assert_eq!(cur.find_next(b"alpha", 0).unwrap(), Some(&b"1"[..]));
        assert_eq!(cur.find_next(b"alpha", 0).unwrap(), Some(&b"3"[..]));
        assert_eq!(cur.find_next(b"alpha", 0).unwrap(), None);

        let mut cur = db.find_cursor();
        assert_eq!(cur.find_next(b"missing", 0).unwrap(), None);
    }

    #[test]
    fn empty_database_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mcdb");
        Builder::new(&path).unwrap().finish().unwrap();

        let db = Db::open(dir.path(), "empty.mcdb").unwrap();
        let mut cur = db.find_cursor();
        assert_eq!(cur.find_next(b"anything", 0).unwrap(), None);
    }

    #[test]
    fn dropping_without_finish_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted.mcdb");
        {
            let mut b = Builder::new(&path).unwrap();
            b.add(b"k", b"v").unwrap();
        }
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
