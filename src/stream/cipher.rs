//! Decrypting and encrypting stream wrappers.

use std::io::{self, Read, Write};

use crate::crypto::{Decrypter, Encrypter};
use crate::error::ZipError;

/// Limits a reader to a declared length. Running out of input before the
/// limit is corruption, not end of stream.
pub struct BoundedReader<R> {
    inner: R,
    remaining: Option<u64>,
    consumed: u64,
}

impl<R> BoundedReader<R> {
    /// `limit` of `None` passes everything through.
    pub fn new(inner: R, limit: Option<u64>) -> Self {
        Self {
            inner,
            remaining: limit,
            consumed: 0,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn is_bounded(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = match self.remaining {
            Some(0) => return Ok(0),
            Some(left) => buf.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
            None => buf.len(),
        };
        if want == 0 {
            return Ok(0);
        }
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 && self.remaining.is_some() {
            return Err(ZipError::format("entry payload is truncated").into());
        }
        if let Some(left) = self.remaining.as_mut() {
            *left -= n as u64;
        }
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Decrypts everything read through it.
///
/// The ciphertext of the most recent read is retained, so bytes read past
/// the end of an entry can be handed back to the source undecrypted.
pub struct CipherReader<R> {
    inner: R,
    decrypter: Option<Decrypter>,
    raw: Vec<u8>,
}

impl<R> CipherReader<R> {
    pub fn new(inner: R, decrypter: Option<Decrypter>) -> Self {
        Self {
            inner,
            decrypter,
            raw: Vec::new(),
        }
    }

    /// Last `len` ciphertext bytes of the most recent read.
    pub fn raw_tail(&self, len: usize) -> &[u8] {
        &self.raw[self.raw.len().saturating_sub(len)..]
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_parts(self) -> (R, Option<Decrypter>) {
        (self.inner, self.decrypter)
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.raw.clear();
        self.raw.extend_from_slice(&buf[..n]);
        if let Some(decrypter) = self.decrypter.as_mut() {
            decrypter.decrypt(&mut buf[..n]);
        }
        Ok(n)
    }
}

/// Size of the scratch buffer used to encrypt without touching the
/// caller's data.
const SCRATCH_SIZE: usize = 16 * 1024;

/// Encrypts everything written through it.
///
/// Block ciphers only ever see whole blocks: a partial block is held back
/// until more data arrives or the stream is finished.
pub struct CipherWriter<W> {
    inner: W,
    encrypter: Option<Encrypter>,
    pending: Vec<u8>,
    written: u64,
}

impl<W: Write> CipherWriter<W> {
    pub fn new(inner: W, encrypter: Option<Encrypter>) -> Self {
        Self {
            inner,
            encrypter,
            pending: Vec::new(),
            written: 0,
        }
    }

    fn emit(&mut self, mut data: Vec<u8>) -> io::Result<()> {
        if let Some(encrypter) = self.encrypter.as_mut() {
            encrypter.encrypt(&mut data);
        }
        self.inner.write_all(&data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flushes the held-back tail and the cipher trailer. Returns the sink
    /// and the number of bytes written through it.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        let tail = std::mem::take(&mut self.pending);
        if !tail.is_empty() {
            self.emit(tail)?;
        }
        if let Some(encrypter) = self.encrypter.take() {
            let trailer = encrypter.finish();
            self.inner.write_all(&trailer)?;
            self.written += trailer.len() as u64;
        }
        Ok((self.inner, self.written))
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(block) = self.encrypter.as_ref().map(Encrypter::block_size) else {
            self.inner.write_all(buf)?;
            self.written += buf.len() as u64;
            return Ok(buf.len());
        };

        let take = buf.len().min(SCRATCH_SIZE);
        self.pending.extend_from_slice(&buf[..take]);
        let ready = self.pending.len() - self.pending.len() % block;
        if ready > 0 {
            let rest = self.pending.split_off(ready);
            let chunk = std::mem::replace(&mut self.pending, rest);
            self.emit(chunk)?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
