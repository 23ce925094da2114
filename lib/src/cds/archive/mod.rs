//! The archive file: layout, codecs, and the two ends that produce and consume it
//!
//! An archive is a [`FileHeader`] followed by four regions, each aligned to the alignment
//! recorded in the header and covered by its own CRC32:
//!
//!   - read-only: one [`ArchivedClass`] record per archived class, supertypes first
//!   - read-write: per-class state a process may update after restoring a class
//!   - misc data: a tagged stream of tables (symbols, shared dictionary, not-found classes,
//!     packages, shared paths, well-known classes)
//!   - misc code: the table of [`MetadataKind`]s the records are tagged with
//!
//! Everything inside the regions is little-endian.

mod builder;
mod compact_table;
mod header;
mod loader;
mod mapper;
mod metadata;
mod region;
mod symbols;
mod tables;

pub use builder::*;
pub use compact_table::*;
pub use header::*;
pub use loader::*;
pub use mapper::*;
pub use metadata::*;
pub use region::*;
pub use symbols::*;
pub use tables::*;

/// Tags opening each part of the misc data stream, in stream order
pub(crate) const SYMBOLS_TAG: u32 = u32::from_be_bytes(*b"SYMB");
pub(crate) const DICTIONARY_TAG: u32 = u32::from_be_bytes(*b"DICT");
pub(crate) const NOT_FOUND_TAG: u32 = u32::from_be_bytes(*b"NFND");
pub(crate) const PACKAGES_TAG: u32 = u32::from_be_bytes(*b"PKGS");
pub(crate) const SHARED_PATHS_TAG: u32 = u32::from_be_bytes(*b"PATH");
pub(crate) const WELL_KNOWN_TAG: u32 = u32::from_be_bytes(*b"WKCL");
pub(crate) const END_TAG: u32 = u32::from_be_bytes(*b"END_");
