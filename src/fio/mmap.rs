//! Memory-mapped IO backend
//!
//! The map is taken once at open time, so this backend only makes sense for
//! files that no longer grow.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{CaskError, Result};

use super::IoManager;

/// Read-only memory map over a segment
pub struct MMapIo {
    /// `None` for an empty file (nothing to map)
    map: Option<Mmap>,
}

impl MMapIo {
    /// Map `path`, creating an empty file if it does not exist yet
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: segments handed to this backend are immutable; nothing
            // truncates or rewrites them while the map is alive.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IoManager for MMapIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.bytes();
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(CaskError::UnsupportedBackend(
            "write on a memory-mapped segment".to_string(),
        ))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.bytes().len() as u64)
    }

    fn truncate(&self, _len: u64) -> Result<()> {
        Err(CaskError::UnsupportedBackend(
            "truncate on a memory-mapped segment".to_string(),
        ))
    }
}
