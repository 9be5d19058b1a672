//! The long-lived handle to an mcdb file: the current mapping generation,
//! and the refresh protocol that swaps it out when the file on disk
//! changes.
//!
//! Readers never block on the fast path: [`Db::register`] and
//! [`Db::find_cursor`] only clone an `Arc`. Only [`Db::refresh`] takes a
//! lock, and only for the duration of installing a new generation, never
//! while anyone is reading from the old one.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cursor::{Cursor, Registration};
use crate::error::Result;
use crate::mapping::{Mapping, MappingAllocator, SystemAllocator};

/// An open mcdb database. Cheap to register against from many threads;
/// expensive operations (opening, refreshing) are rare and explicit.
pub struct Db {
    current: RwLock<Arc<Mapping>>,
    refresh_lock: Mutex<()>,
    allocator: Box<dyn MappingAllocator>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Opens `filename` inside `dir` and maps it, using the default
    /// allocator.
    pub fn open(dir: impl AsRef<Path>, filename: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_allocator(dir, filename, Box::new(SystemAllocator))
    }

    /// Opens `filename` inside `dir`, routing the mapping's bookkeeping
    /// allocation through a caller-supplied allocator.
    pub fn open_with_allocator(
        dir: impl AsRef<Path>,
        filename: impl AsRef<Path>,
        allocator: Box<dyn MappingAllocator>,
    ) -> Result<Self> {
        let mapping = Mapping::open(dir.as_ref(), filename.as_ref(), allocator.as_ref())?;
        Ok(Db {
            current: RwLock::new(mapping),
            refresh_lock: Mutex::new(()),
            allocator,
        })
    }

    /// Registers the calling thread's interest in the current generation,
    /// following any pending successor chain to its head. Keep the
    /// returned [`Registration`] alive for as long as any [`Cursor`] built
    /// from it is in use.
    pub fn register(&self) -> Registration {
        Mapping::head(&self.current.read())
    }

    /// Alias for [`register`](Db::register), named to match this crate's
    /// register/unregister vocabulary; unregistration is simply dropping
    /// the returned `Registration`.
    pub fn thread_register(&self) -> Registration {
        self.register()
    }

    /// Registers and returns a [`Cursor`] ready to search the current
    /// generation.
    pub fn find_cursor(&self) -> Cursor {
        Cursor::new(self.register())
    }

    /// Looks up the first value for `key` in a fresh cursor. For repeated
    /// lookups against duplicate keys, build a [`Cursor`] directly.
    pub fn find(&self, key: &[u8], tag: u8) -> Result<Option<Vec<u8>>> {
        let mut cursor = self.find_cursor();
        Ok(cursor.find(key, tag)?.map(|v| v.to_vec()))
    }

    /// Checks whether the file has changed on disk since the current
    /// generation was mapped and, if so, maps the new version and
    /// installs it as current. Returns `true` if a new generation was
    /// installed. Existing registrations and in-flight cursors keep
    /// reading from their own generation regardless of what this call
    /// does; nothing is invalidated out from under them.
    pub fn refresh(&self) -> Result<bool> {
        if !self.refresh_if_stale()? {
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock();
        // Re-check under the lock: another thread may have already
        // published a new generation while we were waiting.
        if !self.refresh_if_stale()? {
            return Ok(false);
        }

        let head = Mapping::head(&self.current.read());
        let next = head.reopen(self.allocator.as_ref())?;
        head.publish_successor(Arc::clone(&next));
        *self.current.write() = next;
        Ok(true)
    }

    /// Cheap pre-check for [`refresh`](Db::refresh): stats the current
    /// generation's file without opening or mapping anything.
    pub fn refresh_if_stale(&self) -> Result<bool> {
        let head = Mapping::head(&self.current.read());
        let disk = head.current_disk_stamp()?;
        Ok(disk != head.stamp())
    }

    /// Consumes the handle, releasing its generation. Equivalent to
    /// dropping it; provided so call sites can make closing a database
    /// explicit.
    pub fn close(self) {}
}
