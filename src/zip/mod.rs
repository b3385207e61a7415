//! ZIP format: header model, binary codec and the archive facade.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed records (EOCD, Zip64 records), flags and enums
//! - [`extra`]: Zip64 and AES extra-data blocks
//! - [`model`]: local/central headers and the [`ArchiveModel`] aggregate
//! - [`parser`]: reads the trailing records and the central directory
//! - [`writer`]: serializes headers and the central directory
//! - [`archive`]: random-access reading on top of the parser
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and payload for each entry
//! 2. Central Directory with metadata for all entries
//! 3. Zip64 end-of-central-directory record and locator, when needed
//! 4. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD, so listing never touches entry payloads.
//! Split archives keep the same layout spread over several disks; every
//! offset in the records is relative to the disk it names.

mod archive;
mod charset;
mod extra;
mod model;
pub mod parser;
mod structures;
pub mod writer;

pub use archive::ZipArchive;
pub use charset::Charset;
pub use extra::{
    AES_EXTRA_ID, AesExtraDataRecord, ExtraFields, RawExtraField, ZIP64_EXTRA_ID, Zip64ExtendedInfo,
    Zip64Fields,
};
pub use model::{ArchiveModel, DataDescriptor, EntryCore, FileHeader, LocalFileHeader};
pub use parser::ZipParser;
pub use structures::*;
