use super::ReadAt;
use crate::error::ZipResult;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Local file reader with random access support
#[derive(Debug)]
pub struct LocalFileReader {
    file: File,
    size: u64,
    path: PathBuf,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> ZipResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            size,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadAt for LocalFileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if offset >= self.size {
            return Ok(0);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            // seek_read moves the shared cursor, which nothing else relies on
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
