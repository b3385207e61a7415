//! Byte sources and sinks.
//!
//! Reading goes through [`ReadAt`], a positional interface that lets the
//! parser jump straight to the archive tail and lets a split archive present
//! its disks as one address space. Writing goes through [`ArchiveSink`],
//! which adds the disk-aware operations the encoder needs on top of
//! [`Write`].

mod local;
mod split;
mod split_writer;

pub use local::LocalFileReader;
pub use split::{SplitNaming, SplitReader};
pub use split_writer::{MIN_SPLIT_LENGTH, SplitWriter};

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{ZipError, ZipResult};

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer. Returns 0 at or
    /// past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Number of physical disks behind this source.
    fn disk_count(&self) -> u32 {
        1
    }

    /// Translates a disk-relative offset, as stored in ZIP records, into an
    /// offset in this source's address space.
    fn disk_offset(&self, disk: u32, offset: u64) -> ZipResult<u64> {
        if disk != 0 {
            return Err(ZipError::MissingDisk { disk });
        }
        Ok(offset)
    }

    /// Fills `buf` completely or fails with a format error.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> ZipResult<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(ZipError::Format(format!(
                    "unexpected end of archive at offset {offset}"
                )));
            }
            offset += n as u64;
            buf = &mut buf[n..];
        }
        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        self.as_slice().read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }

    fn disk_count(&self) -> u32 {
        (**self).disk_count()
    }

    fn disk_offset(&self, disk: u32, offset: u64) -> ZipResult<u64> {
        (**self).disk_offset(disk, offset)
    }
}

/// Sequential [`Read`] + [`Seek`] view over a [`ReadAt`] source.
pub struct ReadAtCursor<'a, R: ReadAt + ?Sized> {
    inner: &'a R,
    pos: u64,
}

impl<'a, R: ReadAt + ?Sized> ReadAtCursor<'a, R> {
    pub fn new(inner: &'a R, pos: u64) -> Self {
        Self { inner, pos }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: ReadAt + ?Sized> Read for ReadAtCursor<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: ReadAt + ?Sized> Seek for ReadAtCursor<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.inner.size().checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative offset",
            )),
        }
    }
}

/// Destination the encoder writes an archive into.
///
/// Offsets are disk-relative: `position` is the write position on
/// `current_disk`, which is what local headers and the central directory
/// record.
pub trait ArchiveSink: Write {
    fn position(&mut self) -> ZipResult<u64>;

    fn current_disk(&self) -> u32 {
        0
    }

    fn is_split(&self) -> bool {
        false
    }

    /// Guarantees the next `len` bytes land on a single disk.
    fn ensure_room(&mut self, _len: u64) -> ZipResult<()> {
        Ok(())
    }

    /// Overwrites bytes written earlier, leaving the write position alone.
    fn patch(&mut self, disk: u32, offset: u64, bytes: &[u8]) -> ZipResult<()>;
}

fn patch_seekable<S: Write + Seek>(sink: &mut S, disk: u32, offset: u64, bytes: &[u8]) -> ZipResult<()> {
    if disk != 0 {
        return Err(ZipError::State("cannot patch another disk of a single-file archive"));
    }
    let end = sink.stream_position()?;
    sink.seek(SeekFrom::Start(offset))?;
    sink.write_all(bytes)?;
    sink.seek(SeekFrom::Start(end))?;
    Ok(())
}

impl<T: AsRef<[u8]>> ArchiveSink for Cursor<T>
where
    Cursor<T>: Write,
{
    fn position(&mut self) -> ZipResult<u64> {
        Ok(Cursor::position(self))
    }

    fn patch(&mut self, disk: u32, offset: u64, bytes: &[u8]) -> ZipResult<()> {
        patch_seekable(self, disk, offset, bytes)
    }
}

impl ArchiveSink for File {
    fn position(&mut self) -> ZipResult<u64> {
        Ok(self.stream_position()?)
    }

    fn patch(&mut self, disk: u32, offset: u64, bytes: &[u8]) -> ZipResult<()> {
        patch_seekable(self, disk, offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reads_stop_at_end() {
        let data = b"0123456789".to_vec();
        let mut buf = [0u8; 4];
        assert_eq!(data.read_at(8, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(data.read_at(10, &mut buf).unwrap(), 0);
        assert!(data.read_exact_at(8, &mut buf).is_err());
    }

    #[test]
    fn cursor_reads_and_seeks() {
        let data = b"hello world".to_vec();
        let mut cursor = ReadAtCursor::new(&data, 0);
        cursor.seek(SeekFrom::End(-5)).unwrap();
        let mut out = String::new();
        cursor.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
        assert!(cursor.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn cursor_sink_patches_in_place() {
        let mut sink = Cursor::new(Vec::new());
        sink.write_all(b"abcdef").unwrap();
        sink.patch(0, 1, b"XY").unwrap();
        sink.write_all(b"g").unwrap();
        assert_eq!(sink.get_ref().as_slice(), b"aXYdefg");
        assert!(sink.patch(1, 0, b"z").is_err());
    }
}
