//! CRC-32 helpers.

use std::io::{self, Read};

use crc32fast::Hasher;

use crate::error::ZipResult;
use crate::progress::{ProgressSink, check_cancelled};

/// Reader that hashes everything passing through it.
///
/// Verification is left to the caller because the expected value may only
/// become known after the payload, from a trailing data descriptor.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    bytes_read: u64,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            bytes_read: 0,
        }
    }

    pub fn crc(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[..count]);
        self.bytes_read += count as u64;
        Ok(count)
    }
}

/// Computes the CRC-32 of everything `reader` yields, polling `progress`
/// for cancellation once per `buffer_size` chunk.
pub fn compute_crc32<R: Read>(
    mut reader: R,
    buffer_size: usize,
    progress: &dyn ProgressSink,
) -> ZipResult<u32> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut hasher = Hasher::new();
    loop {
        check_cancelled(progress)?;
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        progress.add_bytes(n as u64);
    }
    Ok(hasher.finalize())
}

/// Byte-wise CRC-32 table, needed by the legacy cipher's key schedule.
pub(crate) const CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Single step of the reflected CRC-32 register.
#[inline]
pub(crate) fn crc32_update(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZipError;
    use crate::progress::ProgressMonitor;

    #[test]
    fn table_step_matches_crc32fast() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = 0xffff_ffffu32;
        for &b in data.iter() {
            crc = crc32_update(crc, b);
        }
        assert_eq!(!crc, crc32fast::hash(data));
        assert_eq!(!crc, 0x414F_A339);
    }

    #[test]
    fn reader_hashes_passthrough() {
        let mut reader = Crc32Reader::new(&b"123456789"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(reader.crc(), 0xCBF4_3926);
        assert_eq!(reader.bytes_read(), 9);
    }

    #[test]
    fn compute_honours_cancellation() {
        let monitor = ProgressMonitor::new();
        let data = vec![7u8; 4096];
        let crc = compute_crc32(&data[..], 512, &monitor).unwrap();
        assert_eq!(crc, crc32fast::hash(&data));
        assert_eq!(monitor.bytes_processed(), 4096);

        monitor.cancel();
        let err = compute_crc32(&data[..], 512, &monitor).unwrap_err();
        assert!(matches!(err, ZipError::Cancelled));
    }
}
