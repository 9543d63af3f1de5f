//! Low-level MEG archive parser.
//!
//! Reads the container front to back from any source implementing
//! [`ReadAt`]:
//! 1. Header: sentinel check, length field, three metadata dwords
//! 2. Name table: `total_files` length-prefixed strings
//! 3. Descriptor table: `descriptor_count` fixed-size records, each resolved
//!    against the name table into a [`DescriptorIndex`]
//!
//! Every table is bounds-checked against the archive size before it is
//! read, so a truncated or lying header surfaces as
//! [`Error::Malformed`] instead of a short read.

use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::error::{Error, ParsePhase, Result};
use crate::io::ReadAt;

use super::structures::*;

/// Low-level MEG parser, generic over the reader so the same code runs over
/// a memory map or positional file reads.
pub struct MegParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> MegParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Parse all three tables in order.
    pub async fn parse(&self) -> Result<MegArchive> {
        let header = self.parse_header().await?;
        let names = self.parse_name_table(&header).await?;
        let index = self.parse_descriptors(&header, &names).await?;

        Ok(MegArchive {
            header,
            names,
            index: Arc::new(index),
        })
    }

    /// Decode the header and locate the end of its metadata block.
    ///
    /// When the first dword is one of [`EXTENDED_LENGTH_SENTINELS`] the
    /// archive carries an 8-byte prefix before the primary length field.
    /// A plain archive whose length happens to equal a sentinel is
    /// misdetected; nothing in the format tells the two apart.
    pub async fn parse_header(&self) -> Result<ArchiveHeader> {
        let first = self.region(0, 4, ParsePhase::Header, "first dword").await?;
        let first = LittleEndian::read_u32(&first);

        let extended = ArchiveHeader::is_extended(first);
        let mut offset = if extended { EXTENDED_PREFIX_SIZE } else { 0 };
        offset += LENGTH_FIELD_SIZE;

        let metadata = self
            .region(offset, METADATA_SIZE, ParsePhase::Header, "metadata block")
            .await?;
        let mut cursor = Cursor::new(&metadata);
        let descriptor_count = cursor.read_u32::<LittleEndian>()?;
        let total_files = cursor.read_u32::<LittleEndian>()?;
        let name_table_size = cursor.read_u32::<LittleEndian>()?;

        let header = ArchiveHeader {
            descriptor_count,
            total_files,
            name_table_size,
            extended,
            metadata_end: offset + METADATA_SIZE,
        };

        debug!(
            extended,
            descriptor_count,
            total_files,
            name_table_size,
            metadata_end = header.metadata_end,
            "parsed header"
        );

        Ok(header)
    }

    /// Decode `total_files` length-prefixed names.
    ///
    /// Name bytes are taken one byte per character, without any encoding
    /// validation.
    pub async fn parse_name_table(&self, header: &ArchiveHeader) -> Result<NameTable> {
        let table = self
            .region(
                header.name_table_offset(),
                header.name_table_size as u64,
                ParsePhase::NameTable,
                "name table",
            )
            .await?;

        // Every entry needs at least its 2-byte length prefix.
        let capacity = (header.total_files as usize).min(table.len() / 2);
        let mut names = Vec::with_capacity(capacity);
        let mut cursor = Cursor::new(&table);

        for i in 0..header.total_files {
            let len = cursor.read_u16::<LittleEndian>().map_err(|_| {
                Error::malformed(
                    ParsePhase::NameTable,
                    format!("length of name {i} runs past the end of the table"),
                )
            })?;

            let mut raw = vec![0u8; len as usize];
            cursor.read_exact(&mut raw).map_err(|_| {
                Error::malformed(
                    ParsePhase::NameTable,
                    format!("name {i} ({len} bytes) runs past the end of the table"),
                )
            })?;

            names.push(raw.into_iter().map(char::from).collect::<String>());
        }

        let unused = table.len() as u64 - cursor.position();
        if unused > 0 {
            debug!(unused, "name table has trailing bytes");
        }

        Ok(NameTable::new(names))
    }

    /// Decode the descriptor records and resolve each against `names`.
    ///
    /// Records are applied in file order; a later record for a path that
    /// is already indexed replaces the earlier one.
    pub async fn parse_descriptors(
        &self,
        header: &ArchiveHeader,
        names: &NameTable,
    ) -> Result<DescriptorIndex> {
        let table = self
            .region(
                header.descriptor_table_offset(),
                header.descriptor_table_size(),
                ParsePhase::Descriptors,
                "descriptor table",
            )
            .await?;

        let mut index = DescriptorIndex::new();

        for (i, record) in table.chunks_exact(FileDescriptor::SIZE).enumerate() {
            let descriptor = FileDescriptor::from_bytes(record)?;

            let name = names.get(descriptor.name_index as usize).ok_or_else(|| {
                Error::malformed(
                    ParsePhase::Descriptors,
                    format!(
                        "descriptor {i} references name {} but the table holds {}",
                        descriptor.name_index,
                        names.len()
                    ),
                )
            })?;

            if descriptor.data_end() > self.size {
                return Err(Error::malformed(
                    ParsePhase::Descriptors,
                    format!(
                        "descriptor {i} ({name}) spans {}..{} past archive end {}",
                        descriptor.data_offset,
                        descriptor.data_end(),
                        self.size
                    ),
                ));
            }

            if index.insert(name.to_string(), descriptor).is_some() {
                debug!(path = name, record = i, "later descriptor replaces earlier one");
            }
        }

        debug!(
            records = header.descriptor_count,
            entries = index.len(),
            "parsed descriptor table"
        );

        Ok(index)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Read `len` bytes at `offset`, failing as malformed when the range
    /// leaves the archive.
    async fn region(
        &self,
        offset: u64,
        len: u64,
        phase: ParsePhase,
        what: &str,
    ) -> Result<Vec<u8>> {
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= self.size => {}
            _ => {
                return Err(Error::malformed(
                    phase,
                    format!(
                        "{what} at offset {offset} ({len} bytes) exceeds archive size {}",
                        self.size
                    ),
                ));
            }
        }

        self.reader.read_bytes(offset, len as usize).await
    }
}
