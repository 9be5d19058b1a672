//! A memory-mapped constant key/value database for read-mostly workloads.
//!
//! A database is built once with [`Builder`], producing a single
//! immutable file: a 256-slot header, a stream of length-prefixed
//! records, and 256 open-addressed hash tables (one per slot) built from
//! a 32-bit hash of each key. [`Db`] opens that file, maps it, and hands
//! out [`Cursor`]s that probe a slot's table to find every record
//! matching a key, in insertion order.
//!
//! Long-lived processes can call [`Db::refresh`] to pick up a file that
//! has been atomically replaced at the same path; readers that were
//! already mid-lookup keep reading the generation they started with,
//! since a [`Cursor`] holds an `Arc` on its generation for as long as it
//! is alive.
//!
//! This crate touches no environment variables, does no logging, and
//! reads no configuration; it only opens, maps, and reads the files it is
//! given. The `mcdb-tools` binary crate in this workspace builds on top
//! of it to add a CLI, logging, and error reporting.

pub mod builder;
pub mod cursor;
pub mod db;
pub mod error;
pub mod hash;
pub mod layout;
pub mod mapping;

pub use builder::{BuildStats, Builder};
pub use cursor::{Cursor, Registration};
pub use db::Db;
pub use error::{Error, Result};
pub use mapping::{Mapping, MappingAllocator, SystemAllocator};
