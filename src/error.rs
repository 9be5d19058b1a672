//! Error types for the core. Key-absent / probe-exhausted is not an error
//! (see [`crate::cursor::Cursor::find_next`]); it is conveyed with `Option`.

use std::io;
use std::path::{Path, PathBuf};

/// Everything that can go wrong building, opening, or refreshing an mcdb
/// file. Nothing in this crate panics on caller-supplied data; operations
/// that can fail on bad input return one of these instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Open/stat/read/write/rename failed. Fatal for the operation it
    /// occurred in; a builder's partial output is removed, a refresh
    /// leaves the current mapping untouched.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `mmap` itself failed (address space exhaustion, file too large for
    /// a 32-bit process). The mapping being refreshed is left untouched.
    #[error("failed to map {path} into memory: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file's header, a slot's hash table, or a record is
    /// inconsistent with the file's actual size. Detected at
    /// mapping-creation time; the file is rejected outright.
    #[error("malformed mcdb file {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// A caller-supplied [`crate::mapping::MappingAllocator`] declined to
    /// reserve the bookkeeping it was asked for.
    #[error("allocator failed to reserve {what}")]
    Alloc { what: &'static str },
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn map(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Map {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Builds an [`Error::Alloc`]. Public, unlike the other constructors
    /// here, so a [`crate::mapping::MappingAllocator`] implemented outside
    /// this crate can report a failed reservation through the same error
    /// type everything else in this crate uses.
    pub fn alloc(what: &'static str) -> Self {
        Error::Alloc { what }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
