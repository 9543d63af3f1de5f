use std::path::Path;

use async_trait::async_trait;
use memmap2::Mmap;
use tracing::debug;

use super::{ReadAt, open_archive};
use crate::error::{Error, Result};

/// Read-only memory-mapped view over a whole archive.
pub struct MmapReader {
    // Zero-length files cannot be mapped on every platform.
    map: Option<Mmap>,
}

impl MmapReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_archive(path)?;
        let size = file
            .metadata()
            .map_err(|e| Error::io(format!("failed to stat {}", path.display()), e))?
            .len();

        let map = if size == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and the archive is not modified while open.
            let map = unsafe { Mmap::map(&file) }
                .map_err(|e| Error::io(format!("failed to map {}", path.display()), e))?;
            Some(map)
        };

        debug!(path = %path.display(), size, "mapped archive");
        Ok(Self { map })
    }

    /// The full archive contents.
    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

#[async_trait]
impl ReadAt for MmapReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.as_slice();
        let start = offset.min(data.len() as u64) as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }
}
