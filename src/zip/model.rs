//! In-memory header model.
//!
//! Central and local headers share an [`EntryCore`]; the central-only
//! fields live on [`FileHeader`]. Sizes and offsets are always held at their
//! effective 64-bit values; the Zip64 extra record mirrors what is (or will
//! be) on the wire.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::extra::{AesExtraDataRecord, ExtraFields};
use super::structures::{
    CompressionMethod, DATA_DESCRIPTOR_SIGNATURE, DosDateTime, EncryptionMethod,
    EndOfCentralDirectory, GeneralPurposeFlags, ZIP64_SENTINEL_U32, Zip64EOCD, Zip64EOCDLocator,
};
use crate::error::{ZipError, ZipResult};

/// Fields shared by local and central headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCore {
    pub version_needed: u16,
    pub flags: GeneralPurposeFlags,
    /// Method as stored in the header; [`CompressionMethod::Aes`] for AES
    /// entries.
    pub compression_method: CompressionMethod,
    pub last_modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: String,
    /// Name bytes exactly as stored.
    pub file_name_raw: Vec<u8>,
    pub extra: ExtraFields,
}

impl EntryCore {
    pub fn encryption_method(&self) -> EncryptionMethod {
        if !self.flags.is_encrypted() {
            EncryptionMethod::None
        } else if self.extra.aes.is_some() {
            EncryptionMethod::Aes
        } else {
            EncryptionMethod::ZipCrypto
        }
    }

    /// The method applied to the plaintext, looking through the AES record.
    pub fn actual_compression_method(&self) -> ZipResult<CompressionMethod> {
        match (self.compression_method, &self.extra.aes) {
            (CompressionMethod::Aes, Some(aes)) => Ok(aes.compression_method),
            (CompressionMethod::Aes, None) => {
                Err(ZipError::format("AES method without AES extra field"))
            }
            (method, _) => Ok(method),
        }
    }

    pub fn aes_record(&self) -> Option<&AesExtraDataRecord> {
        self.extra.aes.as_ref()
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/') || self.file_name.ends_with('\\')
    }

    /// Checks invariants that make an entry unreadable regardless of payload.
    pub fn validate(&self) -> ZipResult<()> {
        if self.file_name_raw.is_empty() {
            return Err(ZipError::format("entry name has zero length"));
        }
        if self.flags.is_strong_encryption() {
            return Err(ZipError::format("strong encryption is not supported"));
        }
        let is_aes_method = self.compression_method == CompressionMethod::Aes;
        if is_aes_method != self.extra.aes.is_some() {
            return Err(ZipError::Format(format!(
                "entry {} mixes AES method and extra record inconsistently",
                self.file_name
            )));
        }
        if self.extra.aes.is_some() && !self.flags.is_encrypted() {
            return Err(ZipError::Format(format!(
                "entry {} has an AES record but is not flagged encrypted",
                self.file_name
            )));
        }
        Ok(())
    }

    /// True if either size needs 8-byte fields in a data descriptor.
    pub fn needs_zip64_sizes(&self) -> bool {
        self.compressed_size >= ZIP64_SENTINEL_U32 as u64
            || self.uncompressed_size >= ZIP64_SENTINEL_U32 as u64
    }
}

/// Header written immediately before each entry's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub core: EntryCore,
}

impl LocalFileHeader {
    /// Bytes occupied by the header, name and extra area.
    pub fn encoded_len(&self) -> ZipResult<u64> {
        Ok(super::structures::LFH_SIZE as u64
            + self.core.file_name_raw.len() as u64
            + self.core.extra.to_bytes()?.len() as u64)
    }
}

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub core: EntryCore,
    pub version_made_by: u16,
    pub disk_number_start: u32,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    /// Offset of the local header, relative to `disk_number_start`.
    pub local_header_offset: u64,
    pub file_comment: Vec<u8>,
}

impl FileHeader {
    pub fn name(&self) -> &str {
        &self.core.file_name
    }

    pub fn is_directory(&self) -> bool {
        self.core.is_directory()
    }

    pub fn encryption_method(&self) -> EncryptionMethod {
        self.core.encryption_method()
    }

    pub fn is_encrypted(&self) -> bool {
        self.core.flags.is_encrypted()
    }

    /// Builds the local header that precedes this entry's payload.
    pub fn to_local_header(&self) -> LocalFileHeader {
        let mut core = self.core.clone();
        if let Some(zip64) = core.extra.zip64.as_mut() {
            zip64.local_header_offset = None;
            zip64.disk_start = None;
        }
        LocalFileHeader { core }
    }
}

impl From<LocalFileHeader> for FileHeader {
    /// Central view of an entry met while streaming, before any central
    /// directory is available.
    fn from(local: LocalFileHeader) -> Self {
        FileHeader {
            core: local.core,
            version_made_by: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0,
            local_header_offset: 0,
            file_comment: Vec::new(),
        }
    }
}

/// Trailing size/CRC record for entries written with deferred sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Reads a descriptor whose signature is optional.
    pub fn read_from<R: Read>(reader: &mut R, zip64: bool) -> ZipResult<Self> {
        let first = reader.read_u32::<LittleEndian>()?;
        let crc32 = if first == DATA_DESCRIPTOR_SIGNATURE {
            reader.read_u32::<LittleEndian>()?
        } else {
            first
        };
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                reader.read_u64::<LittleEndian>()?,
                reader.read_u64::<LittleEndian>()?,
            )
        } else {
            (
                reader.read_u32::<LittleEndian>()? as u64,
                reader.read_u32::<LittleEndian>()? as u64,
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, zip64: bool) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            writer.write_u64::<LittleEndian>(self.compressed_size)?;
            writer.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            writer.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            writer.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        }
        Ok(())
    }
}

/// Aggregate root: everything the central directory says about an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveModel {
    pub entries: Vec<FileHeader>,
    pub end_of_central_directory: EndOfCentralDirectory,
    pub zip64_locator: Option<Zip64EOCDLocator>,
    pub zip64_end_of_central_directory: Option<Zip64EOCD>,
    pub split_archive: bool,
}

impl ArchiveModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(&self) -> &[u8] {
        &self.end_of_central_directory.comment
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) -> ZipResult<()> {
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::format("archive comment exceeds 65535 bytes"));
        }
        self.end_of_central_directory.comment = comment;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_zip64(&self) -> bool {
        self.zip64_end_of_central_directory.is_some()
    }

    /// Entry count as declared by the trailing records.
    pub fn declared_entries(&self) -> u64 {
        match &self.zip64_end_of_central_directory {
            Some(z) => z.total_entries,
            None => self.end_of_central_directory.total_entries as u64,
        }
    }

    /// Number of the last disk, which holds the EOCD.
    pub fn last_disk(&self) -> u32 {
        match &self.zip64_end_of_central_directory {
            Some(z) => z.disk_number,
            None => self.end_of_central_directory.disk_number as u32,
        }
    }

    /// (disk, disk-relative offset, size) of the central directory.
    pub fn central_directory_location(&self) -> (u32, u64, u64) {
        match &self.zip64_end_of_central_directory {
            Some(z) => (z.disk_with_cd, z.cd_offset, z.cd_size),
            None => {
                let eocd = &self.end_of_central_directory;
                (
                    eocd.disk_with_cd as u32,
                    eocd.cd_offset as u64,
                    eocd.cd_size as u64,
                )
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<(usize, &FileHeader)> {
        self.entries.iter().enumerate().find(|(_, e)| e.name() == name)
    }

    /// Entry count must match the declaration in the trailing records.
    pub fn validate(&self) -> ZipResult<()> {
        if self.declared_entries() != self.entries.len() as u64 {
            return Err(ZipError::Format(format!(
                "end of central directory declares {} entries, found {}",
                self.declared_entries(),
                self.entries.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::{AesKeyStrength, AesVersion};

    fn core(name: &str) -> EntryCore {
        EntryCore {
            version_needed: 20,
            flags: GeneralPurposeFlags::default(),
            compression_method: CompressionMethod::Stored,
            last_modified: DosDateTime::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            file_name: name.to_string(),
            file_name_raw: name.as_bytes().to_vec(),
            extra: ExtraFields::default(),
        }
    }

    #[test]
    fn encryption_method_follows_flags_and_aes_record() {
        let mut entry = core("a.txt");
        assert_eq!(entry.encryption_method(), EncryptionMethod::None);
        entry.flags.set_encrypted(true);
        assert_eq!(entry.encryption_method(), EncryptionMethod::ZipCrypto);
        entry.compression_method = CompressionMethod::Aes;
        entry.extra.aes = Some(AesExtraDataRecord {
            version: AesVersion::Ae2,
            key_strength: AesKeyStrength::Aes128,
            compression_method: CompressionMethod::Deflated,
        });
        assert_eq!(entry.encryption_method(), EncryptionMethod::Aes);
        assert_eq!(
            entry.actual_compression_method().unwrap(),
            CompressionMethod::Deflated
        );
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(core("").validate().is_err());
    }

    #[test]
    fn descriptor_signature_is_optional() {
        let with = [
            0x50, 0x4b, 0x07, 0x08, 0x78, 0x56, 0x34, 0x12, 10, 0, 0, 0, 20, 0, 0, 0,
        ];
        let without = &with[4..];
        for bytes in [&with[..], without] {
            let dd = DataDescriptor::read_from(&mut &bytes[..], false).unwrap();
            assert_eq!(dd.crc32, 0x1234_5678);
            assert_eq!(dd.compressed_size, 10);
            assert_eq!(dd.uncompressed_size, 20);
        }
    }

    #[test]
    fn model_count_mismatch_is_reported() {
        let mut model = ArchiveModel::new();
        model.end_of_central_directory.total_entries = 2;
        assert!(model.validate().is_err());
    }
}
