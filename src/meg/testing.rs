//! Hand-built fixture archives for unit tests.

use super::structures::{EXTENDED_PREFIX_SIZE, FileDescriptor, LENGTH_FIELD_SIZE, METADATA_SIZE};

enum Payload {
    Data(Vec<u8>),
    Raw { offset: u32, size: u32 },
}

struct Record {
    name_index: u16,
    payload: Payload,
}

/// Builds archive bytes: header, name table, descriptor table, then every
/// `Data` payload in record order.
#[derive(Default)]
pub(crate) struct ArchiveBuilder {
    sentinel: Option<u32>,
    names: Vec<Vec<u8>>,
    records: Vec<Record>,
    name_table_size: Option<u32>,
}

impl ArchiveBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn extended(mut self, sentinel: u32) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    pub(crate) fn name(self, name: &str) -> Self {
        self.raw_name(name.as_bytes().to_vec())
    }

    pub(crate) fn raw_name(mut self, name: Vec<u8>) -> Self {
        self.names.push(name);
        self
    }

    pub(crate) fn file(mut self, name_index: u16, data: &[u8]) -> Self {
        self.records.push(Record {
            name_index,
            payload: Payload::Data(data.to_vec()),
        });
        self
    }

    /// Descriptor with an explicit absolute range and no payload bytes.
    pub(crate) fn raw_descriptor(mut self, name_index: u16, offset: u32, size: u32) -> Self {
        self.records.push(Record {
            name_index,
            payload: Payload::Raw { offset, size },
        });
        self
    }

    /// Override the declared name table size.
    pub(crate) fn name_table_size(mut self, size: u32) -> Self {
        self.name_table_size = Some(size);
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut names = Vec::new();
        for name in &self.names {
            names.extend_from_slice(&(name.len() as u16).to_le_bytes());
            names.extend_from_slice(name);
        }

        let prefix = if self.sentinel.is_some() { EXTENDED_PREFIX_SIZE } else { 0 };
        let header_len = prefix + LENGTH_FIELD_SIZE + METADATA_SIZE;
        let descriptors_len = (self.records.len() * FileDescriptor::SIZE) as u64;
        let mut data_offset = (header_len + names.len() as u64 + descriptors_len) as u32;

        let mut descriptors = Vec::new();
        let mut payloads = Vec::new();
        for (i, record) in self.records.iter().enumerate() {
            let (offset, size) = match &record.payload {
                Payload::Data(data) => {
                    let range = (data_offset, data.len() as u32);
                    data_offset += data.len() as u32;
                    payloads.extend_from_slice(data);
                    range
                }
                Payload::Raw { offset, size } => (*offset, *size),
            };

            descriptors.extend_from_slice(&0u16.to_le_bytes());
            descriptors.extend_from_slice(&0u32.to_le_bytes());
            descriptors.extend_from_slice(&(i as i32).to_le_bytes());
            descriptors.extend_from_slice(&size.to_le_bytes());
            descriptors.extend_from_slice(&offset.to_le_bytes());
            descriptors.extend_from_slice(&record.name_index.to_le_bytes());
        }

        let mut out = Vec::new();
        if let Some(sentinel) = self.sentinel {
            out.extend_from_slice(&sentinel.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.names.len() as u32).to_le_bytes());
        let declared = self.name_table_size.unwrap_or(names.len() as u32);
        out.extend_from_slice(&declared.to_le_bytes());
        out.extend_from_slice(&names);
        out.extend_from_slice(&descriptors);
        out.extend_from_slice(&payloads);
        out
    }
}
