mod local;
mod mmap;

pub use local::LocalFileReader;
pub use mmap::MmapReader;

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Trait for random access reading from an archive
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    async fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::io(
                    format!("short read at offset {offset}: wanted {len} bytes, got {filled}"),
                    ErrorKind::UnexpectedEof.into(),
                ));
            }
            filled += n;
        }
        Ok(buf)
    }

    async fn read_u16_at(&self, offset: u64) -> Result<u16> {
        let buf = self.read_bytes(offset, 2).await?;
        Ok(LittleEndian::read_u16(&buf))
    }

    async fn read_u32_at(&self, offset: u64) -> Result<u32> {
        let buf = self.read_bytes(offset, 4).await?;
        Ok(LittleEndian::read_u32(&buf))
    }
}

/// Open an archive for reading, telling a missing path apart from other failures.
pub(crate) fn open_archive(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::InputNotFound(path.to_path_buf()),
        _ => Error::io(format!("failed to open {}", path.display()), e),
    })
}
