//! Sequential, one-entry-at-a-time decoder.
//!
//! ```text
//! READY --next_entry--> ENTRY_OPEN --close_entry--> READY ... --close--> CLOSED
//! ```
//!
//! Payload bytes flow source -> bounded reader -> decryption ->
//! decompression -> CRC. Everything an entry promises (authentication code,
//! data descriptor, CRC, sizes) is verified once its last byte has been
//! delivered, so a damaged entry fails on the read that reaches its end.

use std::io::{self, Read};
use std::sync::Arc;

use log::{debug, trace};

use super::cipher::{BoundedReader, CipherReader};
use super::compression::Decompressor;
use super::pushback::PushbackReader;
use crate::crc::Crc32Reader;
use crate::crypto::{
    AUTH_CODE_LENGTH, AesDecrypter, Decrypter, Password, PasswordSupplier, ZIPCRYPTO_HEADER_LENGTH,
    ZipCryptoDecrypter,
};
use crate::error::{ZipError, ZipResult};
use crate::progress::{ProgressSink, Unmonitored, check_cancelled};
use crate::zip::parser::read_local_file_header;
use crate::zip::{
    AesVersion, CDFH_SIGNATURE, Charset, CompressionMethod, DataDescriptor, EncryptionMethod,
    EndOfCentralDirectory, FileHeader, LFH_SIGNATURE, LocalFileHeader, SINGLE_SEGMENT_SIGNATURE,
    SPLIT_ARCHIVE_SIGNATURE, Zip64EOCD,
};

/// Settings for reading archives.
#[derive(Clone)]
pub struct ReadOptions {
    /// Charset for names without the UTF-8 flag.
    pub(crate) charset: Charset,
    /// Never zero; the builder clamps it.
    pub(crate) buffer_size: usize,
    pub(crate) progress: Arc<dyn ProgressSink>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            charset: Charset::Cp437,
            buffer_size: 32 * 1024,
            progress: Arc::new(Unmonitored),
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

type EntryChain<R> = Crc32Reader<Decompressor<CipherReader<BoundedReader<PushbackReader<R>>>>>;

struct OpenEntry<R: Read> {
    header: FileHeader,
    chain: EntryChain<R>,
    encryption: EncryptionMethod,
    /// Payload bytes consumed before the chain: salt and verifier, or the
    /// legacy encryption header.
    prefix_len: u64,
    hinted: bool,
    zip64_descriptor: bool,
}

enum Stage<R: Read> {
    Ready(PushbackReader<R>),
    Open(Box<OpenEntry<R>>),
    /// Fully read and verified, waiting for `close_entry`.
    Drained(PushbackReader<R>),
    Closed,
}

/// Reads entries one after another from a sequential stream.
pub struct EntryReader<'a, R: Read> {
    stage: Stage<R>,
    passwords: &'a dyn PasswordSupplier,
    options: ReadOptions,
    at_start: bool,
    exhausted: bool,
    current: Option<FileHeader>,
}

/// Corruption found inside a legacy-encrypted entry almost always means the
/// check byte let a wrong password through.
fn suspect_password(encryption: EncryptionMethod, err: ZipError) -> ZipError {
    match (encryption, err) {
        (EncryptionMethod::ZipCrypto, ZipError::Format(_)) => ZipError::WrongPassword,
        (_, err) => err,
    }
}

fn classify(encryption: EncryptionMethod, err: io::Error) -> ZipError {
    suspect_password(encryption, ZipError::from(err))
}

impl<'a, R: Read> EntryReader<'a, R> {
    pub fn new(reader: R, passwords: &'a dyn PasswordSupplier, options: ReadOptions) -> Self {
        Self {
            stage: Stage::Ready(PushbackReader::new(reader)),
            passwords,
            options,
            at_start: true,
            exhausted: false,
            current: None,
        }
    }

    /// Header of the entry currently open, if any.
    pub fn current_entry(&self) -> Option<&FileHeader> {
        self.current.as_ref()
    }

    fn take_ready(&mut self) -> ZipResult<PushbackReader<R>> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Ready(source) => Ok(source),
            Stage::Closed => Err(ZipError::State("entry stream is closed")),
            other => {
                self.stage = other;
                Err(ZipError::State("previous entry has not been closed"))
            }
        }
    }

    /// Reads the next local header from the stream. Returns `None` once the
    /// central directory (or an empty archive's EOCD) is reached.
    pub fn next_entry(&mut self) -> ZipResult<Option<FileHeader>> {
        check_cancelled(self.options.progress.as_ref())?;
        let mut source = self.take_ready()?;
        if self.exhausted {
            self.stage = Stage::Ready(source);
            return Ok(None);
        }
        match self.read_local_header(&mut source)? {
            Some(local) => {
                let zip64_descriptor = local.core.extra.zip64.is_some();
                let header = FileHeader::from(local);
                self.open(source, header, false, zip64_descriptor).map(Some)
            }
            None => {
                self.exhausted = true;
                self.stage = Stage::Ready(source);
                Ok(None)
            }
        }
    }

    /// Opens the entry at the current position using sizes, CRC and
    /// encryption data from its central directory record.
    pub fn next_entry_with(&mut self, hint: &FileHeader) -> ZipResult<FileHeader> {
        check_cancelled(self.options.progress.as_ref())?;
        let mut source = self.take_ready()?;
        let local = self.read_local_header(&mut source)?.ok_or_else(|| {
            ZipError::Format(format!("local header of {} is missing", hint.name()))
        })?;
        if local.core.file_name_raw != hint.core.file_name_raw {
            return Err(ZipError::Format(format!(
                "local header names {:?}, central directory expects {}",
                local.core.file_name,
                hint.name()
            )));
        }
        let zip64_descriptor = local.core.extra.zip64.is_some() || hint.core.needs_zip64_sizes();
        self.open(source, hint.clone(), true, zip64_descriptor)
    }

    fn read_local_header(
        &mut self,
        source: &mut PushbackReader<R>,
    ) -> ZipResult<Option<LocalFileHeader>> {
        let mut sig = [0u8; 4];
        source.read_exact(&mut sig)?;
        if std::mem::take(&mut self.at_start) {
            let marker = u32::from_le_bytes(sig);
            if marker == SPLIT_ARCHIVE_SIGNATURE || marker == SINGLE_SEGMENT_SIGNATURE {
                source.read_exact(&mut sig)?;
            }
        }
        match u32::from_le_bytes(sig) {
            LFH_SIGNATURE => {
                source.unread(&sig);
                Ok(Some(read_local_file_header(source, self.options.charset)?))
            }
            CDFH_SIGNATURE | EndOfCentralDirectory::SIGNATURE | Zip64EOCD::SIGNATURE => {
                source.unread(&sig);
                Ok(None)
            }
            other => Err(ZipError::Format(format!(
                "expected a local file header, found signature {other:#010x}"
            ))),
        }
    }

    fn password_for(&self, header: &FileHeader) -> ZipResult<Password> {
        self.passwords
            .password(header)
            .filter(|p| !p.is_empty())
            .ok_or(ZipError::WrongPassword)
    }

    fn open(
        &mut self,
        mut source: PushbackReader<R>,
        header: FileHeader,
        hinted: bool,
        zip64_descriptor: bool,
    ) -> ZipResult<FileHeader> {
        let core = &header.core;
        let deferred = core.flags.has_data_descriptor();
        let sizes_known = hinted || !deferred;
        let method = core.actual_compression_method()?;
        let encryption = core.encryption_method();
        if !sizes_known && (method == CompressionMethod::Stored || encryption == EncryptionMethod::Aes) {
            return Err(ZipError::Format(format!(
                "{} defers its sizes and can only be read through the central directory",
                header.name()
            )));
        }

        let (decrypter, prefix_len) = match encryption {
            EncryptionMethod::None => (None, 0),
            EncryptionMethod::ZipCrypto => {
                let password = self.password_for(&header)?;
                let mut enc_header = [0u8; ZIPCRYPTO_HEADER_LENGTH];
                source.read_exact(&mut enc_header)?;
                let check = if deferred {
                    (core.last_modified.time_part() >> 8) as u8
                } else {
                    (core.crc32 >> 24) as u8
                };
                let decrypter = ZipCryptoDecrypter::new(password.as_bytes(), &enc_header, check)?;
                (
                    Some(Decrypter::ZipCrypto(decrypter)),
                    ZIPCRYPTO_HEADER_LENGTH as u64,
                )
            }
            EncryptionMethod::Aes => {
                let record = core
                    .aes_record()
                    .ok_or_else(|| ZipError::format("AES entry without AES extra field"))?;
                let password = self.password_for(&header)?;
                let mut salt = vec![0u8; record.key_strength.salt_length()];
                source.read_exact(&mut salt)?;
                let mut verifier = [0u8; 2];
                source.read_exact(&mut verifier)?;
                let decrypter =
                    AesDecrypter::new(password.as_bytes(), record.key_strength, &salt, &verifier)?;
                (
                    Some(Decrypter::Aes(decrypter)),
                    (salt.len() + verifier.len()) as u64,
                )
            }
        };

        let trailer_len = match encryption {
            EncryptionMethod::Aes => AUTH_CODE_LENGTH as u64,
            _ => 0,
        };
        let limit = match sizes_known {
            true => Some(
                core.compressed_size
                    .checked_sub(prefix_len + trailer_len)
                    .ok_or_else(|| {
                        ZipError::Format(format!(
                            "compressed size of {} cannot hold its encryption header",
                            header.name()
                        ))
                    })?,
            ),
            false => None,
        };

        let cipher = CipherReader::new(BoundedReader::new(source, limit), decrypter);
        let chain = Crc32Reader::new(Decompressor::new(method, cipher, self.options.buffer_size)?);
        debug!(
            "opened entry {} ({:?}, {:?}, {})",
            header.name(),
            method,
            encryption,
            if hinted { "central directory" } else { "streamed" }
        );

        self.current = Some(header.clone());
        self.stage = Stage::Open(Box::new(OpenEntry {
            header: header.clone(),
            chain,
            encryption,
            prefix_len,
            hinted,
            zip64_descriptor,
        }));
        Ok(header)
    }

    /// Drains what is left of an entry and checks everything it promised.
    fn complete(&self, entry: OpenEntry<R>) -> ZipResult<PushbackReader<R>> {
        let OpenEntry {
            header,
            mut chain,
            encryption,
            prefix_len,
            hinted,
            zip64_descriptor,
        } = entry;
        let progress = self.options.progress.as_ref();
        let mut scratch = vec![0u8; self.options.buffer_size];
        loop {
            check_cancelled(progress)?;
            let n = chain.read(&mut scratch).map_err(|e| classify(encryption, e))?;
            if n == 0 {
                break;
            }
            progress.add_bytes(n as u64);
        }
        let actual_crc = chain.crc();
        let uncompressed = chain.bytes_read();

        let (mut cipher, surplus) = chain.into_inner().into_parts();
        let bounded = cipher.get_ref().is_bounded();
        let pushback = if bounded {
            // Whatever the decompressor left unused still belongs to the
            // payload and must pass through the MAC.
            while cipher.read(&mut scratch).map_err(|e| classify(encryption, e))? > 0 {}
            Vec::new()
        } else {
            cipher.raw_tail(surplus).to_vec()
        };
        let (payload, decrypter) = cipher.into_parts();
        let mut compressed = prefix_len + payload.consumed() - pushback.len() as u64;
        let mut source = payload.into_inner();
        source.unread(&pushback);

        let core = &header.core;
        if let Some(Decrypter::Aes(decrypter)) = decrypter {
            let mut code = [0u8; AUTH_CODE_LENGTH];
            source.read_exact(&mut code)?;
            compressed += AUTH_CODE_LENGTH as u64;
            if !decrypter.verify(&code) {
                return Err(ZipError::AuthenticationFailed(header.name().to_string()));
            }
        }

        let mut expected_crc = core.crc32;
        if core.flags.has_data_descriptor() {
            let descriptor = DataDescriptor::read_from(&mut source, zip64_descriptor)?;
            trace!("data descriptor of {}: {:?}", header.name(), descriptor);
            if !hinted {
                if descriptor.compressed_size != compressed
                    || descriptor.uncompressed_size != uncompressed
                {
                    return Err(suspect_password(
                        encryption,
                        ZipError::Format(format!(
                            "data descriptor of {} disagrees with its payload",
                            header.name()
                        )),
                    ));
                }
                expected_crc = descriptor.crc32;
            }
        }
        if (hinted || !core.flags.has_data_descriptor()) && uncompressed != core.uncompressed_size {
            return Err(suspect_password(
                encryption,
                ZipError::Format(format!(
                    "{} holds {uncompressed} bytes, {} declared",
                    header.name(),
                    core.uncompressed_size
                )),
            ));
        }

        let crc_stored = !matches!(core.aes_record(), Some(r) if r.version == AesVersion::Ae2);
        if crc_stored && actual_crc != expected_crc {
            return Err(match encryption {
                EncryptionMethod::ZipCrypto => ZipError::WrongPassword,
                _ => ZipError::ChecksumMismatch {
                    name: header.name().to_string(),
                    expected: expected_crc,
                    actual: actual_crc,
                },
            });
        }

        progress.entry_done();
        trace!("entry {} verified", header.name());
        Ok(source)
    }

    fn finish_entry(&mut self) -> ZipResult<()> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Open(entry) => {
                let source = self.complete(*entry)?;
                self.stage = Stage::Drained(source);
            }
            other => self.stage = other,
        }
        Ok(())
    }

    /// Finishes the open entry, reading and verifying whatever the caller
    /// left unread.
    pub fn close_entry(&mut self) -> ZipResult<()> {
        self.current = None;
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Open(entry) => {
                let source = self.complete(*entry)?;
                self.stage = Stage::Ready(source);
                Ok(())
            }
            Stage::Drained(source) => {
                self.stage = Stage::Ready(source);
                Ok(())
            }
            Stage::Ready(source) => {
                self.stage = Stage::Ready(source);
                Err(ZipError::State("no entry is open"))
            }
            Stage::Closed => Err(ZipError::State("entry stream is closed")),
        }
    }

    /// Ends the stream. Any open entry is abandoned unverified.
    pub fn close(&mut self) {
        self.current = None;
        self.stage = Stage::Closed;
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        check_cancelled(self.options.progress.as_ref())?;
        let entry = match &mut self.stage {
            Stage::Open(entry) => entry,
            Stage::Drained(_) => return Ok(0),
            _ => return Err(ZipError::State("no entry is open").into()),
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match entry.chain.read(buf) {
            Ok(n) => n,
            Err(e) => return Err(classify(entry.encryption, e).into()),
        };
        if n > 0 {
            self.options.progress.add_bytes(n as u64);
            return Ok(n);
        }
        self.finish_entry()?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoPassword;
    use crate::stream::{EntryOptions, EntryWriter};
    use std::io::{Cursor, Write};

    fn two_entries(options: EntryOptions) -> Vec<u8> {
        let mut writer = EntryWriter::new(Cursor::new(Vec::new())).unwrap();
        for (name, data) in [("first.txt", &b"alpha alpha alpha"[..]), ("second.txt", &b"beta"[..])] {
            writer.put_next_entry(name, options.clone()).unwrap();
            writer.write_all(data).unwrap();
            writer.close_entry().unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn streams_deflated_entries_with_descriptors() {
        let bytes = two_entries(EntryOptions::new());
        let mut reader = EntryReader::new(&bytes[..], &NoPassword, ReadOptions::default());

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name(), "first.txt");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"alpha alpha alpha");
        reader.close_entry().unwrap();

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name(), "second.txt");
        // Left unread; close_entry drains and verifies it.
        reader.close_entry().unwrap();

        assert!(reader.next_entry().unwrap().is_none());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn zero_buffer_size_is_clamped() {
        let options = ReadOptions::new().buffer_size(0);
        assert_eq!(options.buffer_size, 1);

        let bytes = two_entries(EntryOptions::new());
        let mut reader = EntryReader::new(&bytes[..], &NoPassword, options);
        reader.next_entry().unwrap().unwrap();
        // Left unread so close_entry has to drain through the scratch buffer.
        reader.close_entry().unwrap();
        reader.next_entry().unwrap().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"beta");
        reader.close_entry().unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn deferred_stored_entry_needs_central_directory() {
        let bytes = two_entries(EntryOptions::new().compression(CompressionMethod::Stored));
        let mut reader = EntryReader::new(&bytes[..], &NoPassword, ReadOptions::default());
        assert!(matches!(reader.next_entry(), Err(ZipError::Format(_))));
    }

    #[test]
    fn stored_entries_without_descriptors_stream() {
        let options = EntryOptions::new()
            .compression(CompressionMethod::Stored)
            .data_descriptor(false);
        let bytes = two_entries(options);
        let mut reader = EntryReader::new(&bytes[..], &NoPassword, ReadOptions::default());
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out.len() as u64, entry.core.uncompressed_size);
            reader.close_entry().unwrap();
            names.push(entry.name().to_string());
        }
        assert_eq!(names, ["first.txt", "second.txt"]);
    }

    #[test]
    fn lifecycle_violations_are_state_errors() {
        let bytes = two_entries(EntryOptions::new());
        let mut reader = EntryReader::new(&bytes[..], &NoPassword, ReadOptions::default());
        assert!(matches!(reader.close_entry(), Err(ZipError::State(_))));
        reader.next_entry().unwrap();
        assert!(matches!(reader.next_entry(), Err(ZipError::State(_))));
        reader.close();
        assert!(matches!(reader.next_entry(), Err(ZipError::State(_))));
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn garbage_where_a_header_belongs_is_a_format_error() {
        let mut reader = EntryReader::new(&b"not a zip file"[..], &NoPassword, ReadOptions::default());
        assert!(matches!(reader.next_entry(), Err(ZipError::Format(_))));
    }
}
