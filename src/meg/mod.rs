//! MEG archive parsing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: header, name table, descriptor records and the resolved index
//! - [`parser`]: decodes those structures from raw bytes, in file order
//! - [`extractor`]: streams every resolved entry to disk
//!
//! ## MEG Format Overview
//!
//! All integers are little-endian.
//!
//! ```text
//! [8-byte prefix, only when dword@0 is 0xFFFFFFFF or 0x8FFFFFFF]
//! u32 length field (unused)
//! u32 descriptor count
//! u32 name count
//! u32 name table size in bytes
//! name table:       name count x { u16 len; u8[len] }
//! descriptor table: descriptor count x
//!     { u16 flags; u32 crc; i32 index; u32 size; u32 offset; u16 name index }
//! payloads, addressed by absolute offset
//! ```
//!
//! Descriptors are resolved to paths through the name table. When two
//! descriptors name the same path the later one wins.
//!
//! ## Limitations
//!
//! - No archive creation
//! - No compression
//! - CRCs are read but never verified

mod extractor;
mod parser;
mod structures;

#[cfg(test)]
pub(crate) mod testing;

pub use extractor::{
    DEFAULT_CHUNK_SIZE, EntryFailure, ExtractObserver, ExtractOptions, ExtractReport,
    FailurePolicy, MegExtractor, NoProgress, resolve_output_path,
};
pub use parser::MegParser;
pub use structures::*;
