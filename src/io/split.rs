//! Read side of split archives.
//!
//! A split archive is one logical byte stream cut into several physical
//! files. [`SplitReader`] opens every disk up front, records the cumulative
//! length in front of each one and serves positional reads across
//! boundaries.

use std::path::{Path, PathBuf};

use log::debug;

use super::{LocalFileReader, ReadAt};
use crate::error::{ZipError, ZipResult};

/// How the disks of an archive are named on the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitNaming {
    /// A plain, single-file archive.
    Single,
    /// `name.z01`, `name.z02`, ... followed by `name.zip` as the last disk.
    /// Records carry disk-relative offsets.
    SelfDescribing,
    /// `name.001`, `name.002`, ... cut after the fact from a regular archive.
    /// Records carry offsets into the concatenated stream.
    Numbered,
}

#[derive(Debug)]
struct Disk {
    reader: LocalFileReader,
    /// Logical offset of the first byte of this disk.
    start: u64,
}

/// A set of physical disks presented as one contiguous [`ReadAt`] source.
#[derive(Debug)]
pub struct SplitReader {
    disks: Vec<Disk>,
    naming: SplitNaming,
    size: u64,
}

impl SplitReader {
    /// Opens `path` and every sibling disk that belongs to it.
    pub fn open(path: &Path) -> ZipResult<Self> {
        let (naming, paths) = enumerate_disks(path)?;
        let readers = paths
            .iter()
            .map(|p| LocalFileReader::new(p))
            .collect::<ZipResult<Vec<_>>>()?;
        debug!("opened {} as {:?} archive with {} disk(s)", path.display(), naming, readers.len());
        Ok(Self::from_readers(readers, naming))
    }

    fn from_readers(readers: Vec<LocalFileReader>, naming: SplitNaming) -> Self {
        let mut start = 0u64;
        let disks = readers
            .into_iter()
            .map(|reader| {
                let disk = Disk { start, reader };
                start += disk.reader.size();
                disk
            })
            .collect();
        Self {
            disks,
            naming,
            size: start,
        }
    }

    pub fn naming(&self) -> SplitNaming {
        self.naming
    }

    /// Lengths of the individual disks, in order.
    pub fn disk_lengths(&self) -> Vec<u64> {
        self.disks.iter().map(|d| d.reader.size()).collect()
    }

    /// Index of the disk holding `offset`: the last disk whose start is at or
    /// before it.
    fn disk_index(&self, offset: u64) -> usize {
        self.disks
            .partition_point(|d| d.start <= offset)
            .saturating_sub(1)
    }
}

impl ReadAt for SplitReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let mut index = self.disk_index(offset);
        let mut filled = 0usize;
        let mut pos = offset;
        while filled < buf.len() && index < self.disks.len() {
            let disk = &self.disks[index];
            let n = disk.reader.read_at(pos - disk.start, &mut buf[filled..])?;
            if n == 0 {
                index += 1;
                continue;
            }
            filled += n;
            pos += n as u64;
        }
        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn disk_count(&self) -> u32 {
        match self.naming {
            SplitNaming::Numbered => 1,
            _ => self.disks.len() as u32,
        }
    }

    fn disk_offset(&self, disk: u32, offset: u64) -> ZipResult<u64> {
        match self.naming {
            SplitNaming::Numbered => Ok(offset),
            _ => self
                .disks
                .get(disk as usize)
                .map(|d| d.start + offset)
                .ok_or(ZipError::MissingDisk { disk }),
        }
    }
}

/// Path of disk `index` (zero-based) in the self-describing form.
pub(crate) fn self_describing_disk_path(zip_path: &Path, index: u32) -> PathBuf {
    zip_path.with_extension(format!("z{:02}", index + 1))
}

fn numbered_disk_path(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{:03}", index + 1));
    PathBuf::from(name)
}

fn enumerate_disks(path: &Path) -> ZipResult<(SplitNaming, Vec<PathBuf>)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    if let Some(ext) = ext.as_deref().filter(|e| e.len() == 3 && e.bytes().all(|b| b.is_ascii_digit())) {
        if ext.parse::<u32>().unwrap_or(0) == 0 {
            return Ok((SplitNaming::Single, vec![path.to_path_buf()]));
        }
        let base = path.with_extension("");
        let paths: Vec<PathBuf> = (0..)
            .map(|i| numbered_disk_path(&base, i))
            .take_while(|p| p.is_file())
            .collect();
        if !paths.iter().any(|p| p == path) {
            return Err(ZipError::MissingDisk { disk: 0 });
        }
        return Ok((SplitNaming::Numbered, paths));
    }

    let mut paths: Vec<PathBuf> = (0..)
        .map(|i| self_describing_disk_path(path, i))
        .take_while(|p| p.is_file())
        .collect();
    if paths.is_empty() {
        return Ok((SplitNaming::Single, vec![path.to_path_buf()]));
    }
    paths.push(path.to_path_buf());
    Ok((SplitNaming::SelfDescribing, paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_disks(dir: &Path, chunks: &[&[u8]]) -> PathBuf {
        let zip = dir.join("archive.zip");
        for (i, chunk) in chunks.iter().enumerate() {
            let path = if i + 1 == chunks.len() {
                zip.clone()
            } else {
                self_describing_disk_path(&zip, i as u32)
            };
            fs::write(path, chunk).unwrap();
        }
        zip
    }

    #[test]
    fn reads_straddle_disk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let zip = write_disks(dir.path(), &[b"abc", b"defg", b"hi"]);
        let reader = SplitReader::open(&zip).unwrap();
        assert_eq!(reader.naming(), SplitNaming::SelfDescribing);
        assert_eq!(reader.size(), 9);
        assert_eq!(reader.disk_count(), 3);

        let mut buf = [0u8; 5];
        reader.read_exact_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"cdefg");
        assert_eq!(reader.read_at(9, &mut buf).unwrap(), 0);
        assert_eq!(reader.disk_offset(2, 1).unwrap(), 8);
        assert!(matches!(
            reader.disk_offset(3, 0),
            Err(ZipError::MissingDisk { disk: 3 })
        ));
    }

    #[test]
    fn numbered_disks_use_logical_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("data.zip");
        fs::write(numbered_disk_path(&base, 0), b"1234").unwrap();
        fs::write(numbered_disk_path(&base, 1), b"5678").unwrap();

        let reader = SplitReader::open(&numbered_disk_path(&base, 0)).unwrap();
        assert_eq!(reader.naming(), SplitNaming::Numbered);
        assert_eq!(reader.disk_count(), 1);
        assert_eq!(reader.disk_offset(0, 6).unwrap(), 6);
        let mut buf = [0u8; 8];
        reader.read_exact_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"12345678");
    }

    #[test]
    fn plain_file_is_a_single_disk() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("plain.zip");
        fs::write(&zip, b"PK").unwrap();
        let reader = SplitReader::open(&zip).unwrap();
        assert_eq!(reader.naming(), SplitNaming::Single);
        assert_eq!(reader.disk_lengths(), vec![2]);
    }
}
