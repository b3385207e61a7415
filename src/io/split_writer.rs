use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::ArchiveSink;
use super::split::self_describing_disk_path;
use crate::error::{ZipError, ZipResult};

/// Smallest split length accepted by [`SplitWriter::create`].
pub const MIN_SPLIT_LENGTH: u64 = 64 * 1024;

/// Writes a self-describing split archive.
///
/// The disk being written is always `name.zip`. When it fills up it is
/// renamed to `name.zNN` and a fresh `name.zip` is started, so whatever disk
/// is written last keeps the conventional extension.
#[derive(Debug)]
pub struct SplitWriter {
    path: PathBuf,
    file: File,
    split_length: u64,
    disk: u32,
    written: u64,
}

impl SplitWriter {
    pub fn create(path: &Path, split_length: u64) -> ZipResult<Self> {
        if split_length < MIN_SPLIT_LENGTH {
            return Err(ZipError::Format(format!(
                "split length {split_length} is below the minimum of {MIN_SPLIT_LENGTH}"
            )));
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            split_length,
            disk: 0,
            written: 0,
        })
    }

    pub fn split_length(&self) -> u64 {
        self.split_length
    }

    fn start_next_disk(&mut self) -> ZipResult<()> {
        self.file.flush()?;
        let finished = self_describing_disk_path(&self.path, self.disk);
        fs::rename(&self.path, &finished)?;
        self.file = File::create(&self.path)?;
        self.disk += 1;
        self.written = 0;
        debug!("split rollover: {} complete, now writing disk {}", finished.display(), self.disk);
        Ok(())
    }

    fn disk_path(&self, disk: u32) -> PathBuf {
        if disk == self.disk {
            self.path.clone()
        } else {
            self_describing_disk_path(&self.path, disk)
        }
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.written >= self.split_length {
            self.start_next_disk()?;
        }
        let room = (self.split_length - self.written).min(buf.len() as u64) as usize;
        let n = self.file.write(&buf[..room])?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl ArchiveSink for SplitWriter {
    fn position(&mut self) -> ZipResult<u64> {
        Ok(self.written)
    }

    fn current_disk(&self) -> u32 {
        self.disk
    }

    fn is_split(&self) -> bool {
        true
    }

    fn ensure_room(&mut self, len: u64) -> ZipResult<()> {
        if len > self.split_length {
            return Err(ZipError::Format(format!(
                "a {len}-byte header block cannot fit on a {}-byte disk",
                self.split_length
            )));
        }
        if self.written + len > self.split_length {
            self.start_next_disk()?;
        }
        Ok(())
    }

    fn patch(&mut self, disk: u32, offset: u64, bytes: &[u8]) -> ZipResult<()> {
        if disk > self.disk {
            return Err(ZipError::MissingDisk { disk });
        }
        if disk == self.disk {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(bytes)?;
            self.file.seek(SeekFrom::Start(self.written))?;
            return Ok(());
        }
        let mut file = OpenOptions::new().write(true).open(self.disk_path(disk))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_over_and_renames_disks() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("out.zip");
        let mut writer = SplitWriter::create(&zip, MIN_SPLIT_LENGTH).unwrap();
        let data = vec![0x5Au8; (MIN_SPLIT_LENGTH * 2 + 10) as usize];
        writer.write_all(&data).unwrap();
        writer.flush().unwrap();

        assert_eq!(writer.current_disk(), 2);
        assert_eq!(writer.position().unwrap(), 10);
        assert_eq!(
            fs::metadata(dir.path().join("out.z01")).unwrap().len(),
            MIN_SPLIT_LENGTH
        );
        assert_eq!(
            fs::metadata(dir.path().join("out.z02")).unwrap().len(),
            MIN_SPLIT_LENGTH
        );
        assert_eq!(fs::metadata(&zip).unwrap().len(), 10);
    }

    #[test]
    fn ensure_room_moves_blocks_to_next_disk() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("out.zip");
        let mut writer = SplitWriter::create(&zip, MIN_SPLIT_LENGTH).unwrap();
        writer.write_all(&vec![1u8; (MIN_SPLIT_LENGTH - 4) as usize]).unwrap();
        writer.ensure_room(30).unwrap();
        assert_eq!(writer.current_disk(), 1);
        assert_eq!(writer.position().unwrap(), 0);
        assert!(writer.ensure_room(MIN_SPLIT_LENGTH + 1).is_err());
    }

    #[test]
    fn patches_earlier_disks() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("out.zip");
        let mut writer = SplitWriter::create(&zip, MIN_SPLIT_LENGTH).unwrap();
        writer.write_all(&vec![0u8; (MIN_SPLIT_LENGTH + 4) as usize]).unwrap();
        writer.patch(0, 0, b"PK").unwrap();
        writer.patch(1, 2, b"!!").unwrap();
        writer.flush().unwrap();

        let first = fs::read(dir.path().join("out.z01")).unwrap();
        assert_eq!(&first[..3], b"PK\0");
        assert_eq!(fs::read(&zip).unwrap(), b"\0\0!!");
    }

    #[test]
    fn rejects_tiny_split_length() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SplitWriter::create(&dir.path().join("x.zip"), 1024).is_err());
    }
}
