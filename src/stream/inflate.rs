use std::io::{self, Read};

use flate2::{Decompress, FlushDecompress, Status};

use crate::error::ZipError;

/// Raw-deflate decoder that stops at the end of the deflate stream and
/// reports how much of its last input chunk it did not use.
///
/// Input is only refilled once the previous chunk is fully consumed, so any
/// surplus always comes from the most recent read of the inner reader.
pub struct InflaterReader<R> {
    inner: R,
    decompress: Decompress,
    input: Vec<u8>,
    pos: usize,
    len: usize,
    input_eof: bool,
    done: bool,
}

impl<R: Read> InflaterReader<R> {
    pub fn new(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            decompress: Decompress::new(false),
            input: vec![0u8; buffer_size.max(512)],
            pos: 0,
            len: 0,
            input_eof: false,
            done: false,
        }
    }

    /// Input bytes read but not part of the deflate stream.
    pub fn leftover(&self) -> &[u8] {
        &self.input[self.pos..self.len]
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for InflaterReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.done || out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos == self.len && !self.input_eof {
                self.len = self.inner.read(&mut self.input)?;
                self.pos = 0;
                self.input_eof = self.len == 0;
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let flush = if self.input_eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let status = self
                .decompress
                .decompress(&self.input[self.pos..self.len], out, flush)
                .map_err(|e| io::Error::from(ZipError::Format(format!("corrupt deflate stream: {e}"))))?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            self.pos += consumed;

            if status == Status::StreamEnd {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 {
                let msg = if self.input_eof {
                    "deflate stream ends prematurely"
                } else {
                    "deflate stream stalled"
                };
                return Err(ZipError::format(msg).into());
            }
        }
    }
}
