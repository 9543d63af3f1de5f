//! # megdump
//!
//! Extracts every file embedded in a MEG game-asset archive, recreating the
//! archive's internal paths on disk.
//!
//! The archive is opened as a read-only byte source ([`MmapReader`] by
//! default, [`LocalFileReader`] as a positional-read fallback), its header,
//! name table and descriptor table are parsed into an immutable
//! [`DescriptorIndex`], and each entry is then streamed to its output file
//! in fixed-size chunks.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use megdump::{ExtractOptions, MegExtractor, MmapReader, NoProgress};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(MmapReader::open(Path::new("CONFIG.MEG"))?);
//!     let extractor = MegExtractor::new(reader);
//!
//!     let archive = extractor.open().await?;
//!     for (path, descriptor) in archive.index.iter() {
//!         println!("{path} ({} bytes)", descriptor.file_size);
//!     }
//!
//!     extractor
//!         .extract_all(&archive, &ExtractOptions::default(), Arc::new(NoProgress))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod meg;

pub use cli::Cli;
pub use error::{Error, ParsePhase, Result};
pub use io::{LocalFileReader, MmapReader, ReadAt};
pub use meg::{
    ArchiveHeader, DescriptorIndex, ExtractObserver, ExtractOptions, ExtractReport, FailurePolicy,
    FileDescriptor, MegArchive, MegExtractor, NameTable, NoProgress,
};
