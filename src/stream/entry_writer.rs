//! Sequential archive encoder.
//!
//! Entries are compressed, then encrypted, then written straight to the
//! sink. When an entry is closed its CRC and sizes go either into a data
//! descriptor or, for seekable sinks without descriptors, back into the
//! local header. `finish` appends the central directory.

use std::io::{self, Write};
use std::sync::Arc;

use log::{debug, warn};

use super::cipher::CipherWriter;
use super::compression::Compressor;
use crate::crypto::{
    AesEncrypter, Encrypter, Password, ZIPCRYPTO_HEADER_LENGTH, ZipCryptoEncrypter,
};
use crate::error::{ZipError, ZipResult};
use crate::io::ArchiveSink;
use crate::progress::{ProgressSink, Unmonitored, check_cancelled};
use crate::zip::writer::{
    finalize, update_local_file_header, write_data_descriptor, write_local_file_header,
};
use crate::zip::{
    AesExtraDataRecord, AesKeyStrength, AesVersion, ArchiveModel, Charset, CompressionLevel,
    CompressionMethod, DataDescriptor, DosDateTime, EncryptionMethod, EntryCore, ExtraFields,
    FileHeader, GeneralPurposeFlags, SINGLE_SEGMENT_SIGNATURE, SPLIT_ARCHIVE_SIGNATURE,
    VERSION_AES, VERSION_DEFAULT, VERSION_MADE_BY, VERSION_ZIP64, ZIP64_SENTINEL_U32,
    Zip64ExtendedInfo,
};

/// Entries declared at least this close to 4 GiB get a Zip64 local record,
/// leaving room for deflate and encryption overhead.
const ZIP64_HEADROOM: u64 = 16 * 1024 * 1024;

/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;

/// Per-entry settings.
#[derive(Debug, Clone)]
pub struct EntryOptions {
    pub compression_method: CompressionMethod,
    pub compression_level: CompressionLevel,
    pub encryption_method: EncryptionMethod,
    pub aes_key_strength: AesKeyStrength,
    pub aes_version: AesVersion,
    pub password: Option<Password>,
    pub last_modified: DosDateTime,
    pub comment: Vec<u8>,
    /// Defer CRC and sizes to a trailing descriptor. Required for sinks
    /// that cannot be patched.
    pub write_data_descriptor: bool,
    /// CRC known up front; checked against the data on close.
    pub entry_crc: Option<u32>,
    /// Uncompressed size known up front.
    pub entry_size: Option<u64>,
    pub external_attributes: u32,
    pub charset: Charset,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflated,
            compression_level: CompressionLevel::Normal,
            encryption_method: EncryptionMethod::None,
            aes_key_strength: AesKeyStrength::Aes256,
            aes_version: AesVersion::Ae2,
            password: None,
            last_modified: DosDateTime::default(),
            comment: Vec::new(),
            write_data_descriptor: true,
            entry_crc: None,
            entry_size: None,
            external_attributes: 0,
            charset: Charset::Utf8,
        }
    }
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn encryption(mut self, method: EncryptionMethod, password: Password) -> Self {
        self.encryption_method = method;
        self.password = Some(password);
        self
    }

    pub fn aes_key_strength(mut self, strength: AesKeyStrength) -> Self {
        self.aes_key_strength = strength;
        self
    }

    pub fn aes_version(mut self, version: AesVersion) -> Self {
        self.aes_version = version;
        self
    }

    pub fn last_modified(mut self, time: DosDateTime) -> Self {
        self.last_modified = time;
        self
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn data_descriptor(mut self, on: bool) -> Self {
        self.write_data_descriptor = on;
        self
    }

    pub fn entry_crc(mut self, crc: u32) -> Self {
        self.entry_crc = Some(crc);
        self
    }

    pub fn entry_size(mut self, size: u64) -> Self {
        self.entry_size = Some(size);
        self
    }

    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = attributes;
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }
}

struct OpenEntry<W: Write> {
    header: FileHeader,
    chain: Compressor<CipherWriter<W>>,
    prefix_len: u64,
    hasher: crc32fast::Hasher,
    uncompressed: u64,
    lfh_zip64: bool,
    options: EntryOptions,
    is_directory: bool,
}

/// Writes an archive entry by entry.
///
/// If writing entry data or closing an entry fails, the entry's bytes are
/// already in the sink without a central record. The writer is then
/// poisoned: further entries and `finish` fail with a `State` error and
/// the output must be discarded.
pub struct EntryWriter<W: ArchiveSink> {
    sink: Option<W>,
    entry: Option<Box<OpenEntry<W>>>,
    model: ArchiveModel,
    progress: Arc<dyn ProgressSink>,
    finished: bool,
    poisoned: bool,
}

impl<W: ArchiveSink> EntryWriter<W> {
    pub fn new(sink: W) -> ZipResult<Self> {
        Self::with_progress(sink, Arc::new(Unmonitored))
    }

    pub fn with_progress(mut sink: W, progress: Arc<dyn ProgressSink>) -> ZipResult<Self> {
        if sink.is_split() && sink.current_disk() == 0 && sink.position()? == 0 {
            sink.write_all(&SPLIT_ARCHIVE_SIGNATURE.to_le_bytes())?;
        }
        Ok(Self {
            sink: Some(sink),
            entry: None,
            model: ArchiveModel::new(),
            progress,
            finished: false,
            poisoned: false,
        })
    }

    /// Entries closed so far and the archive comment.
    pub fn model(&self) -> &ArchiveModel {
        &self.model
    }

    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> ZipResult<()> {
        self.model.set_comment(comment.into())
    }

    /// Starts a new entry. Names ending in `/` become directory entries,
    /// which are always stored, unencrypted and empty.
    pub fn put_next_entry(&mut self, name: &str, options: EntryOptions) -> ZipResult<()> {
        if self.finished {
            return Err(ZipError::State("archive is already finished"));
        }
        self.check_poisoned()?;
        if self.entry.is_some() {
            return Err(ZipError::State("previous entry has not been closed"));
        }
        check_cancelled(self.progress.as_ref())?;
        if name.is_empty() {
            return Err(ZipError::format("entry name has zero length"));
        }

        let mut options = options;
        let is_directory = name.ends_with('/');
        if is_directory {
            options.compression_method = CompressionMethod::Stored;
            options.encryption_method = EncryptionMethod::None;
            options.write_data_descriptor = false;
            options.entry_crc = Some(0);
            options.entry_size = Some(0);
            options.external_attributes |= DOS_DIRECTORY;
        }
        if options.compression_method == CompressionMethod::Aes {
            return Err(ZipError::format("AES is an encryption method, not a compression method"));
        }
        let password = match options.encryption_method {
            EncryptionMethod::None => None,
            _ => Some(
                options
                    .password
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or(ZipError::WrongPassword)?,
            ),
        };
        if options.encryption_method == EncryptionMethod::ZipCrypto
            && !options.write_data_descriptor
            && options.entry_crc.is_none()
        {
            return Err(ZipError::State(
                "ZipCrypto without a data descriptor needs the entry CRC up front",
            ));
        }

        let mut flags = GeneralPurposeFlags::default();
        flags.set_utf8(options.charset.is_utf8());
        flags.set_encrypted(options.encryption_method != EncryptionMethod::None);
        flags.set_data_descriptor(options.write_data_descriptor);
        if options.compression_method == CompressionMethod::Deflated {
            flags.set_compression_level(options.compression_level);
        }

        let mut extra = ExtraFields::default();
        let mut version_needed = VERSION_DEFAULT;
        let mut stored_method = options.compression_method;
        if options.encryption_method == EncryptionMethod::Aes {
            extra.aes = Some(AesExtraDataRecord {
                version: options.aes_version,
                key_strength: options.aes_key_strength,
                compression_method: options.compression_method,
            });
            stored_method = CompressionMethod::Aes;
            version_needed = VERSION_AES;
        }
        let lfh_zip64 = options
            .entry_size
            .is_some_and(|size| size >= ZIP64_SENTINEL_U32 as u64 - ZIP64_HEADROOM);
        if lfh_zip64 {
            extra.zip64 = Some(Zip64ExtendedInfo {
                uncompressed_size: Some(0),
                compressed_size: Some(0),
                ..Default::default()
            });
            version_needed = version_needed.max(VERSION_ZIP64);
        }

        let ae2 = options.encryption_method == EncryptionMethod::Aes
            && options.aes_version == AesVersion::Ae2;
        let crc32 = match (options.write_data_descriptor, ae2) {
            (false, false) => options.entry_crc.unwrap_or(0),
            _ => 0,
        };

        let mut header = FileHeader {
            core: EntryCore {
                version_needed,
                flags,
                compression_method: stored_method,
                last_modified: options.last_modified,
                crc32,
                compressed_size: 0,
                uncompressed_size: 0,
                file_name: name.to_string(),
                file_name_raw: options.charset.encode(name)?,
                extra,
            },
            version_made_by: VERSION_MADE_BY,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: options.external_attributes,
            local_header_offset: 0,
            file_comment: options.comment.clone(),
        };

        let sink = self
            .sink
            .as_mut()
            .ok_or(ZipError::State("archive is already finished"))?;
        let (disk, offset) = write_local_file_header(sink, &header.to_local_header())?;
        header.disk_number_start = disk;
        header.local_header_offset = offset;

        let (encrypter, prefix_len) = match (options.encryption_method, password) {
            (EncryptionMethod::ZipCrypto, Some(password)) => {
                let check = if options.write_data_descriptor {
                    (options.last_modified.time_part() >> 8) as u8
                } else {
                    (crc32 >> 24) as u8
                };
                let (encrypter, enc_header) = ZipCryptoEncrypter::new(password.as_bytes(), check);
                sink.write_all(&enc_header)?;
                (
                    Some(Encrypter::ZipCrypto(encrypter)),
                    ZIPCRYPTO_HEADER_LENGTH as u64,
                )
            }
            (EncryptionMethod::Aes, Some(password)) => {
                let encrypter = AesEncrypter::new(password.as_bytes(), options.aes_key_strength)?;
                let enc_header = encrypter.header();
                sink.write_all(&enc_header)?;
                (Some(Encrypter::Aes(encrypter)), enc_header.len() as u64)
            }
            _ => (None, 0),
        };

        let sink = self
            .sink
            .take()
            .ok_or(ZipError::State("archive is already finished"))?;
        let chain = Compressor::new(
            options.compression_method,
            options.compression_level,
            CipherWriter::new(sink, encrypter),
        )?;
        debug!(
            "entry {} started at disk {} offset {} ({:?}, {:?})",
            name, disk, offset, options.compression_method, options.encryption_method
        );
        self.entry = Some(Box::new(OpenEntry {
            header,
            chain,
            prefix_len,
            hasher: crc32fast::Hasher::new(),
            uncompressed: 0,
            lfh_zip64,
            options,
            is_directory,
        }));
        Ok(())
    }

    /// True once a failed entry has left unrecorded bytes in the sink.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_poisoned(&self) -> ZipResult<()> {
        if self.poisoned {
            return Err(ZipError::State("a failed entry left the archive unusable"));
        }
        Ok(())
    }

    /// Finishes the open entry and records it for the central directory.
    pub fn close_entry(&mut self) -> ZipResult<FileHeader> {
        let entry = self
            .entry
            .take()
            .ok_or(ZipError::State("no entry is open"))?;
        let result = self.complete_entry(*entry);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn complete_entry(&mut self, entry: OpenEntry<W>) -> ZipResult<FileHeader> {
        let OpenEntry {
            mut header,
            chain,
            prefix_len,
            hasher,
            uncompressed,
            lfh_zip64,
            options,
            ..
        } = entry;
        let (sink, written) = chain.finish()?.finish()?;
        let sink = self.sink.insert(sink);

        let crc = hasher.finalize();
        if let Some(expected) = options.entry_crc
            && expected != crc
        {
            return Err(ZipError::ChecksumMismatch {
                name: header.name().to_string(),
                expected,
                actual: crc,
            });
        }

        let ae2 = matches!(header.core.aes_record(), Some(r) if r.version == AesVersion::Ae2);
        let core = &mut header.core;
        core.crc32 = if ae2 { 0 } else { crc };
        core.compressed_size = prefix_len + written;
        core.uncompressed_size = uncompressed;

        if options.write_data_descriptor {
            let descriptor = DataDescriptor {
                crc32: core.crc32,
                compressed_size: core.compressed_size,
                uncompressed_size: core.uncompressed_size,
            };
            write_data_descriptor(sink, &descriptor, lfh_zip64 || core.needs_zip64_sizes())?;
        } else {
            if core.needs_zip64_sizes() && !lfh_zip64 {
                return Err(ZipError::Format(format!(
                    "{} grew past 4 GiB without a declared entry size",
                    core.file_name
                )));
            }
            let mut local = header.to_local_header();
            local.core.extra.zip64 = lfh_zip64.then(|| Zip64ExtendedInfo {
                uncompressed_size: Some(local.core.uncompressed_size),
                compressed_size: Some(local.core.compressed_size),
                ..Default::default()
            });
            update_local_file_header(
                sink,
                header.disk_number_start,
                header.local_header_offset,
                &local,
            )?;
        }

        debug!(
            "entry {} closed: {} -> {} bytes, crc {:#010x}",
            header.name(),
            header.core.uncompressed_size,
            header.core.compressed_size,
            crc
        );
        self.progress.entry_done();
        self.model.entries.push(header.clone());
        Ok(header)
    }

    /// Closes any open entry, writes the central directory and returns the
    /// sink.
    pub fn finish(mut self) -> ZipResult<W> {
        if self.finished {
            return Err(ZipError::State("archive is already finished"));
        }
        if self.entry.is_some() {
            self.close_entry()?;
        }
        self.check_poisoned()?;
        let mut sink = self
            .sink
            .take()
            .ok_or(ZipError::State("archive is already finished"))?;
        finalize(&mut self.model, &mut sink)?;
        if sink.is_split() && sink.current_disk() == 0 {
            // Everything fit on one disk.
            sink.patch(0, 0, &SINGLE_SEGMENT_SIGNATURE.to_le_bytes())?;
            sink.flush()?;
        }
        self.finished = true;
        Ok(sink)
    }
}

impl<W: ArchiveSink> Write for EntryWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        check_cancelled(self.progress.as_ref())?;
        let entry = self
            .entry
            .as_mut()
            .ok_or(ZipError::State("no entry is open"))?;
        if buf.is_empty() {
            return Ok(0);
        }
        if entry.is_directory {
            return Err(ZipError::State("directory entries carry no data").into());
        }
        let n = match entry.chain.write(buf) {
            Ok(n) => n,
            Err(err) => {
                self.poisoned = true;
                return Err(err);
            }
        };
        entry.hasher.update(&buf[..n]);
        entry.uncompressed += n as u64;
        self.progress.add_bytes(n as u64);
        Ok(n)
    }

    /// Entry data is flushed by `close_entry`; between entries this flushes
    /// the sink.
    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) if self.entry.is_none() => sink.flush(),
            _ => Ok(()),
        }
    }
}

impl<W: ArchiveSink> Drop for EntryWriter<W> {
    fn drop(&mut self) {
        if !self.finished && (self.entry.is_some() || self.sink.is_some()) {
            warn!("archive writer dropped before finish(); the archive has no central directory");
        }
    }
}
