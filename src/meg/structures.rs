use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::Result;

/// First-dword values announcing the 8-byte extended-length prefix.
pub const EXTENDED_LENGTH_SENTINELS: [u32; 2] = [0xFFFF_FFFF, 0x8FFF_FFFF];

/// Size of the extended-length prefix.
pub const EXTENDED_PREFIX_SIZE: u64 = 8;

/// Size of the primary length field, present in both header variants.
pub const LENGTH_FIELD_SIZE: u64 = 4;

/// descriptor_count + total_files + name_table_size
pub const METADATA_SIZE: u64 = 12;

/// Header metadata, derived once per archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub descriptor_count: u32,
    pub total_files: u32,
    pub name_table_size: u32,
    /// Whether the extended-length prefix was detected
    pub extended: bool,
    /// Absolute offset right after the metadata block
    pub metadata_end: u64,
}

impl ArchiveHeader {
    pub fn is_extended(first_dword: u32) -> bool {
        EXTENDED_LENGTH_SENTINELS.contains(&first_dword)
    }

    pub fn name_table_offset(&self) -> u64 {
        self.metadata_end
    }

    pub fn descriptor_table_offset(&self) -> u64 {
        self.metadata_end + self.name_table_size as u64
    }

    pub fn descriptor_table_size(&self) -> u64 {
        self.descriptor_count as u64 * FileDescriptor::SIZE as u64
    }
}

/// A fully parsed archive, frozen before extraction starts.
#[derive(Debug, Clone)]
pub struct MegArchive {
    pub header: ArchiveHeader,
    pub names: NameTable,
    pub index: Arc<DescriptorIndex>,
}

/// Fixed-size record locating one payload, packed to 2-byte alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub flags: u16,
    /// Payload checksum; carried through but never verified
    pub crc: u32,
    pub index: i32,
    pub file_size: u32,
    pub data_offset: u32,
    pub name_index: u16,
}

impl FileDescriptor {
    /// 2 + 4 + 4 + 4 + 4 + 2
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        Ok(Self {
            flags: cursor.read_u16::<LittleEndian>()?,
            crc: cursor.read_u32::<LittleEndian>()?,
            index: cursor.read_i32::<LittleEndian>()?,
            file_size: cursor.read_u32::<LittleEndian>()?,
            data_offset: cursor.read_u32::<LittleEndian>()?,
            name_index: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// One past the last payload byte.
    pub fn data_end(&self) -> u64 {
        self.data_offset as u64 + self.file_size as u64
    }
}

/// Ordered, index-addressable list of archive-internal paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Resolved path to descriptor mapping that drives extraction.
///
/// Iterates in first-insertion order. Inserting a path that is already
/// present replaces its descriptor but keeps its position, so a later
/// record always wins over an earlier one for the same path.
#[derive(Debug, Clone, Default)]
pub struct DescriptorIndex {
    entries: Vec<(String, FileDescriptor)>,
    positions: HashMap<String, usize>,
}

impl DescriptorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. Returns the replaced descriptor, if any.
    pub fn insert(&mut self, path: String, descriptor: FileDescriptor) -> Option<FileDescriptor> {
        match self.positions.entry(path) {
            Entry::Occupied(slot) => {
                let previous = &mut self.entries[*slot.get()].1;
                Some(std::mem::replace(previous, descriptor))
            }
            Entry::Vacant(slot) => {
                let path = slot.key().clone();
                slot.insert(self.entries.len());
                self.entries.push((path, descriptor));
                None
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileDescriptor> {
        self.positions.get(path).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileDescriptor)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d))
    }

    /// Sum of payload sizes over the resolved entries.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|(_, d)| d.file_size as u64).sum()
    }
}
