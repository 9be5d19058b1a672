//! A single mmap'd generation of an mcdb file, plus the directory-relative
//! open/stat machinery that lets a later refresh see the current file at
//! a path even if it has since been renamed or unlinked out from under an
//! older generation.
//!
//! The lifetime of a generation is reference counted: `Arc<Mapping>` is
//! the registration refcount, `Arc::clone` a registration, and the last
//! drop the destruction the original design handled with a manual
//! refcount and a `free`-function callback.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::layout::{self, HEADER_SIZE};

/// A hook for hosts that want to account for the small bookkeeping
/// allocation each mapping generation makes, mirroring the allocator
/// function pointers the original design threaded through its mmap
/// lifecycle. The default does nothing.
pub trait MappingAllocator: Send + Sync {
    fn reserve(&self) -> Result<()> {
        Ok(())
    }
}

/// The allocator used when a caller does not supply one.
#[derive(Default)]
pub struct SystemAllocator;

impl MappingAllocator for SystemAllocator {
    fn reserve(&self) -> Result<()> {
        Ok(())
    }
}

fn path_to_cstring(p: &Path) -> Result<CString> {
    CString::new(p.as_os_str().as_bytes())
        .map_err(|_| Error::format(p, "path contains an interior NUL byte"))
}

/// An open directory file descriptor, kept for the lifetime of a mapping
/// so the file can be reopened relative to the directory rather than a
/// path, even if the path has been renamed or unlinked since.
struct DirHandle(RawFd);

impl DirHandle {
    fn open(dir: &Path) -> Result<Self> {
        let c = path_to_cstring(dir)?;
        let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY) };
        if fd < 0 {
            return Err(Error::io(dir, io::Error::last_os_error()));
        }
        Ok(DirHandle(fd))
    }

    fn openat(&self, filename: &Path) -> Result<File> {
        let c = path_to_cstring(filename)?;
        let fd = unsafe { libc::openat(self.0, c.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(Error::io(filename, io::Error::last_os_error()));
        }
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn fstatat(&self, filename: &Path) -> Result<libc::stat> {
        let c = path_to_cstring(filename)?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::fstatat(self.0, c.as_ptr(), &mut st, 0) };
        if rc != 0 {
            return Err(Error::io(filename, io::Error::last_os_error()));
        }
        Ok(st)
    }

    /// Duplicates the descriptor so a new generation can carry its own,
    /// independently closeable handle to the same directory.
    fn try_clone(&self) -> Result<Self> {
        let fd = unsafe { libc::dup(self.0) };
        if fd < 0 {
            return Err(Error::io(Path::new("<directory>"), io::Error::last_os_error()));
        }
        Ok(DirHandle(fd))
    }
}

impl Drop for DirHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// The subset of a file's metadata that tells us whether it has changed
/// since we mapped it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub size: u64,
}

impl FileStamp {
    fn from_stat(st: &libc::stat) -> Self {
        FileStamp {
            mtime_sec: st.st_mtime as i64,
            mtime_nsec: st.st_mtime_nsec as i64,
            size: st.st_size as u64,
        }
    }
}

/// One mmap'd generation of a file. Field order matters: on drop, Rust
/// runs destructors top to bottom, which here unmaps before closing the
/// directory descriptor, matching the teardown order the layout relies
/// on (the mapping must go before the fd it was opened through).
pub struct Mapping {
    mmap: Mmap,
    dir: DirHandle,
    filename: PathBuf,
    stamp: FileStamp,
    successor: OnceLock<Arc<Mapping>>,
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("filename", &self.filename)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

impl Mapping {
    /// Opens `filename` inside `dir` and maps it. This is the only way to
    /// create the first generation of a database; later generations come
    /// from [`reopen`](Mapping::reopen).
    pub fn open(
        dir: &Path,
        filename: &Path,
        allocator: &dyn MappingAllocator,
    ) -> Result<Arc<Mapping>> {
        let dirh = DirHandle::open(dir)?;
        Self::from_dir(dirh, filename, allocator)
    }

    /// Opens the same filename again through this generation's directory
    /// descriptor. Used by a refresh to pick up a file that has been
    /// atomically replaced at the same path.
    pub(crate) fn reopen(&self, allocator: &dyn MappingAllocator) -> Result<Arc<Mapping>> {
        let dirh = self.dir.try_clone()?;
        Self::from_dir(dirh, &self.filename, allocator)
    }

    fn from_dir(
        dirh: DirHandle,
        filename: &Path,
        allocator: &dyn MappingAllocator,
    ) -> Result<Arc<Mapping>> {
        allocator.reserve()?;
        let file = dirh.openat(filename)?;
        let st = dirh.fstatat(filename)?;
        let stamp = FileStamp::from_stat(&st);
        if stamp.size < HEADER_SIZE as u64 {
            return Err(Error::format(
                filename,
                format!(
                    "file is {} bytes, smaller than the {}-byte header",
                    stamp.size, HEADER_SIZE
                ),
            ));
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::map(filename, e))?;
        validate_header(&mmap, filename)?;

        Ok(Arc::new(Mapping {
            mmap,
            dir: dirh,
            filename: filename.to_path_buf(),
            stamp,
            successor: OnceLock::new(),
        }))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn stamp(&self) -> FileStamp {
        self.stamp
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Stats the file this generation was opened from, through the same
    /// directory descriptor, without touching the mapping itself.
    pub(crate) fn current_disk_stamp(&self) -> Result<FileStamp> {
        let st = self.dir.fstatat(&self.filename)?;
        Ok(FileStamp::from_stat(&st))
    }

    /// Follows the one-shot successor chain from `mapping` to its current
    /// head. A chain forms when refreshes race: only the first to
    /// publish wins a given generation's successor slot, and everyone
    /// else's lookup still lands on the newest generation by walking
    /// forward. A free function rather than a method taking `&Arc<Self>`,
    /// since that receiver form isn't available on stable Rust.
    pub fn head(mapping: &Arc<Mapping>) -> Arc<Mapping> {
        let mut current = Arc::clone(mapping);
        while let Some(next) = current.successor.get() {
            current = Arc::clone(next);
        }
        current
    }

    /// Installs `next` as this generation's successor if none is set yet.
    /// Returns `true` if this call won the race.
    pub(crate) fn publish_successor(&self, next: Arc<Mapping>) -> bool {
        self.successor.set(next).is_ok()
    }
}

fn validate_header(mmap: &[u8], filename: &Path) -> Result<()> {
    if mmap.len() < HEADER_SIZE {
        return Err(Error::format(filename, "truncated header"));
    }
    for slot in 0..layout::HEADER_SLOTS {
        let desc = layout::SlotDescriptor::read(mmap, slot)
            .ok_or_else(|| Error::format(filename, "truncated header"))?;
        if desc.slot_count == 0 {
            continue;
        }
        let table_bytes = desc
            .slot_count
            .checked_mul(layout::TABLE_ENTRY_SIZE as u64)
            .ok_or_else(|| Error::format(filename, "hash table size overflow"))?;
        let table_end = desc
            .table_offset
            .checked_add(table_bytes)
            .ok_or_else(|| Error::format(filename, "hash table offset overflow"))?;
        if desc.table_offset < HEADER_SIZE as u64 || table_end > mmap.len() as u64 {
            return Err(Error::format(
                filename,
                format!(
                    "slot {slot} hash table [{}, {}) out of bounds for a {}-byte file",
                    desc.table_offset,
                    table_end,
                    mmap.len()
                ),
            ));
        }
    }
    Ok(())
}
