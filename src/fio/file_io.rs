//! Standard file IO backend

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::Result;

use super::IoManager;

/// Plain file handle opened in append mode
pub struct FileIo {
    fd: File,
}

impl FileIo {
    /// Open or create `path` for reading and appending
    pub fn open(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).read(true).append(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(super::DATA_FILE_PERM);
        }

        let fd = options.open(path)?;
        Ok(Self { fd })
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.fd.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.fd.seek_read(buf, offset)
    }
}

impl IoManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        // Positional reads may return short counts; keep going until EOF
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let written = (&self.fd).write(buf)?;
        Ok(written)
    }

    fn sync(&self) -> Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // The descriptor itself is released on drop
        (&self.fd).flush()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.fd.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.fd.set_len(len)?;
        Ok(())
    }
}
