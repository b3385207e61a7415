//! # spanzip
//!
//! A ZIP codec with WinZip AES and legacy ZipCrypto encryption, Zip64 and
//! split (spanned) archives.
//!
//! The crate is layered leaves first:
//!
//! - [`zip`]: header model, binary codec and the [`ZipArchive`] read facade
//! - [`io`]: positional byte sources ([`ReadAt`]), split-disk reader and
//!   writer, and the [`ArchiveSink`] the encoder writes through
//! - [`crypto`]: AES-CTR with HMAC-SHA1, PBKDF2 key derivation, ZipCrypto
//! - [`stream`]: one-entry-at-a-time [`EntryReader`] and [`EntryWriter`]
//!
//! ## Example
//!
//! ```no_run
//! use std::io::{Cursor, Read, Write};
//! use spanzip::{
//!     EncryptionMethod, EntryOptions, EntryWriter, Password, ReadOptions, ZipArchive,
//! };
//!
//! fn main() -> spanzip::ZipResult<()> {
//!     let password = Password::utf8("secret");
//!     let mut writer = EntryWriter::new(Cursor::new(Vec::new()))?;
//!     let options = EntryOptions::new().encryption(EncryptionMethod::Aes, password.clone());
//!     writer.put_next_entry("hello.txt", options)?;
//!     writer.write_all(b"hello, world")?;
//!     let bytes = writer.finish()?.into_inner();
//!
//!     let archive = ZipArchive::new(bytes, ReadOptions::default())?;
//!     let mut entry = archive.by_index(0, &password)?;
//!     let mut text = String::new();
//!     entry.read_to_string(&mut text)?;
//!     entry.close_entry()?;
//!     assert_eq!(text, "hello, world");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod crc;
pub mod crypto;
pub mod error;
pub mod io;
pub mod progress;
pub mod stream;
pub mod zip;

pub use cli::Cli;
pub use crypto::{NoPassword, Password, PasswordSupplier};
pub use error::{ErrorKind, ZipError, ZipResult};
pub use io::{ArchiveSink, LocalFileReader, ReadAt, ReadAtCursor, SplitReader, SplitWriter};
pub use progress::{ProgressMonitor, ProgressSink, Unmonitored};
pub use stream::{EntryOptions, EntryReader, EntryWriter, ReadOptions};
pub use zip::{
    AesKeyStrength, AesVersion, ArchiveModel, Charset, CompressionLevel, CompressionMethod,
    DosDateTime, EncryptionMethod, FileHeader, ZipArchive,
};
