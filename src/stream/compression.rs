//! Compressor/decompressor pair keyed by compression method.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::write::DeflateEncoder;

use super::inflate::InflaterReader;
use crate::error::{ZipError, ZipResult};
use crate::zip::{CompressionLevel, CompressionMethod};

pub enum Decompressor<R: Read> {
    Stored(R),
    Deflated(InflaterReader<R>),
}

impl<R: Read> Decompressor<R> {
    pub fn new(method: CompressionMethod, inner: R, buffer_size: usize) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Decompressor::Stored(inner)),
            CompressionMethod::Deflated => {
                Ok(Decompressor::Deflated(InflaterReader::new(inner, buffer_size)))
            }
            CompressionMethod::Aes => Err(ZipError::format("AES is not a compression method")),
        }
    }

    pub fn get_ref(&self) -> &R {
        match self {
            Decompressor::Stored(r) => r,
            Decompressor::Deflated(r) => r.get_ref(),
        }
    }

    /// Returns the inner reader and the number of bytes it yielded that the
    /// decompressor did not use.
    pub fn into_parts(self) -> (R, usize) {
        match self {
            Decompressor::Stored(r) => (r, 0),
            Decompressor::Deflated(r) => {
                let surplus = r.leftover().len();
                (r.into_inner(), surplus)
            }
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Stored(r) => r.read(buf),
            Decompressor::Deflated(r) => r.read(buf),
        }
    }
}

pub enum Compressor<W: Write> {
    Stored(W),
    Deflated(DeflateEncoder<W>),
}

impl<W: Write> Compressor<W> {
    pub fn new(method: CompressionMethod, level: CompressionLevel, inner: W) -> ZipResult<Self> {
        match method {
            CompressionMethod::Stored => Ok(Compressor::Stored(inner)),
            CompressionMethod::Deflated => Ok(Compressor::Deflated(DeflateEncoder::new(
                inner,
                Compression::new(level.deflate_level()),
            ))),
            CompressionMethod::Aes => Err(ZipError::format("AES is not a compression method")),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Stored(w) => Ok(w),
            Compressor::Deflated(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Stored(w) => w.write(buf),
            Compressor::Deflated(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Stored(w) => w.flush(),
            Compressor::Deflated(w) => w.flush(),
        }
    }
}
