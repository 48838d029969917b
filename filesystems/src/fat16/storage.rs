// Scoped access to the backing volume image
//
// Every call opens its own handle and drops it before returning, so a
// failure in one operation never leaves a shared handle in a bad state.

use dosvol_core::DosResult;
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Positioned byte access to a volume image.
pub trait VolumeStorage: Send + Sync {
    /// Fill `buffer` from `offset`.
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> DosResult<()>;

    /// Write all of `data` at `offset` and make it durable before returning.
    fn write_at(&self, offset: u64, data: &[u8]) -> DosResult<()>;
}

/// Image file on the host filesystem, reopened for every operation.
#[derive(Debug, Clone)]
pub struct ImageFile {
    path: PathBuf,
}

impl ImageFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_for_read(&self) -> DosResult<File> {
        Ok(File::open(&self.path)?)
    }

    fn open_for_write(&self) -> DosResult<File> {
        Ok(OpenOptions::new().read(true).write(true).open(&self.path)?)
    }
}

impl VolumeStorage for ImageFile {
    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> DosResult<()> {
        trace!("read {} bytes at {:#x} from {}", buffer.len(), offset, self.path.display());
        let mut file = self.open_for_read()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> DosResult<()> {
        trace!("write {} bytes at {:#x} to {}", data.len(), offset, self.path.display());
        let mut file = self.open_for_write()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }
}
