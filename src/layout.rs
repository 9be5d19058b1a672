//! On-disk layout: a fixed 256-slot header, a stream of length-prefixed
//! records, and 256 open-addressed hash tables, one per slot. All
//! multi-byte integers are big-endian regardless of host architecture, so
//! a file built on one machine is byte-identical to one built on any
//! other.

/// Number of entries in the header, and the number of independent hash
/// tables a file is divided into.
pub const HEADER_SLOTS: usize = 256;

/// Bytes per header entry: `(table_offset: u64be, slot_count: u64be)`.
pub const SLOT_DESCRIPTOR_SIZE: usize = 16;

/// Total header size in bytes, always at the start of the file.
pub const HEADER_SIZE: usize = HEADER_SLOTS * SLOT_DESCRIPTOR_SIZE;

/// Bytes of fixed fields preceding a record's key and value:
/// `(klen: u32be, vlen: u32be)`.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Bytes per hash table entry: `(hash: u32be, record_offset: u64be)`.
pub const TABLE_ENTRY_SIZE: usize = 12;

/// Largest permitted key or value length, chosen so `RECORD_HEADER_SIZE +
/// klen + vlen` cannot overflow a `u32` record offset delta.
pub const MAX_FIELD_LEN: u64 = u32::MAX as u64 - RECORD_HEADER_SIZE as u64;

/// Largest number of records a single file may hold.
pub const MAX_RECORDS: u64 = 1 << 31;

pub fn read_u32be(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|s| u32::from_be_bytes(s.try_into().unwrap()))
}

pub fn write_u32be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn read_u64be(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8)
        .map(|s| u64::from_be_bytes(s.try_into().unwrap()))
}

pub fn write_u64be(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// One header entry: where a slot's hash table lives and how many
/// 12-byte entries it has. `slot_count == 0` means the slot is empty and
/// `table_offset` is meaningless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub table_offset: u64,
    pub slot_count: u64,
}

impl SlotDescriptor {
    pub fn read(buf: &[u8], slot: usize) -> Option<Self> {
        let off = slot * SLOT_DESCRIPTOR_SIZE;
        Some(SlotDescriptor {
            table_offset: read_u64be(buf, off)?,
            slot_count: read_u64be(buf, off + 8)?,
        })
    }

    pub fn write(&self, buf: &mut [u8], slot: usize) {
        let off = slot * SLOT_DESCRIPTOR_SIZE;
        write_u64be(buf, off, self.table_offset);
        write_u64be(buf, off + 8, self.slot_count);
    }
}

/// One hash table slot. A `record_offset` of zero marks the slot empty,
/// since the first record in a file always starts after the header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub hash: u32,
    pub record_offset: u64,
}

impl TableEntry {
    pub fn is_empty(&self) -> bool {
        self.record_offset == 0
    }

    pub fn read(buf: &[u8], table_base: usize, index: u64) -> Option<Self> {
        let off = table_base + index as usize * TABLE_ENTRY_SIZE;
        Some(TableEntry {
            hash: read_u32be(buf, off)?,
            record_offset: read_u64be(buf, off + 4)?,
        })
    }

    pub fn write(&self, buf: &mut [u8], table_base: usize, index: u64) {
        let off = table_base + index as usize * TABLE_ENTRY_SIZE;
        write_u32be(buf, off, self.hash);
        write_u64be(buf, off + 4, self.record_offset);
    }
}

/// Rounds `len` up to the next multiple of `align`, which must be a power
/// of two.
pub fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_the_format() {
        assert_eq!(HEADER_SIZE, 4096);
    }

    #[test]
    fn be_roundtrip() {
        let mut buf = [0u8; 12];
        write_u32be(&mut buf, 0, 0xdead_beef);
        write_u64be(&mut buf, 4, 0x0102_0304_0506_0708);
        assert_eq!(read_u32be(&buf, 0), Some(0xdead_beef));
        assert_eq!(read_u64be(&buf, 4), Some(0x0102_0304_0506_0708));
        assert_eq!(buf[0], 0xde);
    }

    #[test]
    fn truncated_read_is_none() {
        let buf = [0u8; 3];
        assert_eq!(read_u32be(&buf, 0), None);
    }

    #[test]
    fn slot_descriptor_roundtrip() {
        let mut buf = [0u8; SLOT_DESCRIPTOR_SIZE];
        let d = SlotDescriptor {
            table_offset: 4096,
            slot_count: 8,
        };
        d.write(&mut buf, 0);
        assert_eq!(SlotDescriptor::read(&buf, 0), Some(d));
    }

    #[test]
    fn align_up_rounds_correctly() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
    }
}
