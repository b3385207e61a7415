use std::io::{self, Read};

/// Reader that can take bytes back.
///
/// A decompressor that reads past the end of its stream hands the surplus
/// back here, so the next record starts exactly where the payload ended.
pub struct PushbackReader<R> {
    inner: R,
    pending: Vec<u8>,
    pos: usize,
}

impl<R> PushbackReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// Makes `bytes` the next bytes returned, ahead of anything pending.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut pending = Vec::with_capacity(bytes.len() + self.pending.len() - self.pos);
        pending.extend_from_slice(bytes);
        pending.extend_from_slice(&self.pending[self.pos..]);
        self.pending = pending;
        self.pos = 0;
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for PushbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.pending.len() {
            let n = buf.len().min(self.pending.len() - self.pos);
            buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.pending.len() {
                self.pending.clear();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_bytes_come_first() {
        let mut reader = PushbackReader::new(&b"world"[..]);
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).unwrap();
        reader.unread(b"hello ");
        reader.unread(b">> ");
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, ">> hello rld");
    }
}
