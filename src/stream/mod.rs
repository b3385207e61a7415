//! Entry streams: the read and write pipelines for one entry at a time.

mod cipher;
mod compression;
mod entry_reader;
mod entry_writer;
mod inflate;
mod pushback;

pub use cipher::{BoundedReader, CipherReader, CipherWriter};
pub use compression::{Compressor, Decompressor};
pub use entry_reader::{EntryReader, ReadOptions};
pub use entry_writer::{EntryOptions, EntryWriter};
pub use inflate::InflaterReader;
pub use pushback::PushbackReader;
