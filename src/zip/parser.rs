//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Offsets stored in the records are relative to the disk they name; the
//! parser maps every `(disk, offset)` pair through
//! [`ReadAt::disk_offset`] before reading.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};
use std::io::{Cursor, Read};

use crate::error::{ZipError, ZipResult};
use crate::io::{ReadAt, ReadAtCursor};

use super::charset::Charset;
use super::extra::{ExtraFields, Zip64Fields};
use super::model::{ArchiveModel, EntryCore, FileHeader, LocalFileHeader};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the trailing records of an archive sit in the reader's address
/// space.
#[derive(Debug, Clone, Copy)]
struct TrailerLayout {
    eocd_offset: u64,
    zip64_eocd_offset: Option<u64>,
}

/// Low-level ZIP file parser.
///
/// Stateless apart from the source it reads and the legacy charset used for
/// names without the UTF-8 flag.
pub struct ZipParser<'a, R: ReadAt + ?Sized> {
    reader: &'a R,
    size: u64,
    charset: Charset,
}

impl<'a, R: ReadAt + ?Sized> ZipParser<'a, R> {
    pub fn new(reader: &'a R, charset: Charset) -> Self {
        let size = reader.size();
        Self {
            reader,
            size,
            charset,
        }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record, comment attached, and its offset.
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::format("not a ZIP archive: too short"));
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        if signature_at(&buf, 0) == EndOfCentralDirectory::SIGNATURE
            && EndOfCentralDirectory::comment_len_at(&buf) == 0
        {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if signature_at(&buf, i) != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            // The comment must reach exactly to the end of the stream.
            let comment_len = EndOfCentralDirectory::comment_len_at(&buf[i..]);
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let mut eocd = EndOfCentralDirectory::from_bytes(&buf[i..])?;
                eocd.comment = buf[i + EndOfCentralDirectory::SIZE..].to_vec();
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(ZipError::format("end of central directory record not found"))
    }

    /// Reads the Zip64 locator sitting immediately before the EOCD, if any.
    fn read_zip64_locator(&self, eocd_offset: u64) -> ZipResult<Option<Zip64EOCDLocator>> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(None);
        };
        let mut buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut buf)?;
        if signature_at(&buf, 0) != Zip64EOCDLocator::SIGNATURE {
            return Ok(None);
        }
        Ok(Some(Zip64EOCDLocator::from_bytes(&buf)?))
    }

    /// Read the ZIP64 End of Central Directory record the locator points at.
    fn read_zip64_eocd(&self, locator: &Zip64EOCDLocator) -> ZipResult<(Zip64EOCD, u64)> {
        let offset = self
            .reader
            .disk_offset(locator.disk_with_eocd64, locator.eocd64_offset)?;
        let mut buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;
        Ok((Zip64EOCD::from_bytes(&buf)?, offset))
    }

    fn read_trailer(&self) -> ZipResult<(ArchiveModel, TrailerLayout)> {
        let (eocd, eocd_offset) = self.find_eocd()?;
        debug!(
            "EOCD at {eocd_offset}: {} entries, disk {}",
            eocd.total_entries, eocd.disk_number
        );

        let mut model = ArchiveModel {
            end_of_central_directory: eocd,
            ..Default::default()
        };
        let mut layout = TrailerLayout {
            eocd_offset,
            zip64_eocd_offset: None,
        };

        match self.read_zip64_locator(eocd_offset)? {
            Some(locator) => {
                let (zip64, offset) = self.read_zip64_eocd(&locator)?;
                debug!("Zip64 EOCD at {offset}: {} entries", zip64.total_entries);
                layout.zip64_eocd_offset = Some(offset);
                model.zip64_locator = Some(locator);
                model.zip64_end_of_central_directory = Some(zip64);
            }
            None if model.end_of_central_directory.is_zip64() => {
                return Err(ZipError::format(
                    "end of central directory holds Zip64 sentinels but no Zip64 locator precedes it",
                ));
            }
            None => {}
        }

        let declared_disks = model.last_disk() as u64 + 1;
        let present = self.reader.disk_count() as u64;
        if declared_disks > present {
            return Err(ZipError::MissingDisk {
                disk: present as u32,
            });
        }
        if declared_disks < present {
            return Err(ZipError::Format(format!(
                "archive declares {declared_disks} disk(s) but {present} were found"
            )));
        }
        Ok((model, layout))
    }

    /// Parses the trailing records and the whole central directory.
    pub fn parse(&self) -> ZipResult<ArchiveModel> {
        let (mut model, _) = self.read_trailer()?;

        let (cd_disk, cd_offset, cd_size) = model.central_directory_location();
        let cd_start = self.reader.disk_offset(cd_disk, cd_offset)?;
        if cd_start.checked_add(cd_size).is_none_or(|end| end > self.size) {
            return Err(ZipError::format("central directory extends past the end of the archive"));
        }

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_start, &mut cd_data)?;

        let total_entries = model.declared_entries();
        let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for _ in 0..total_entries {
            let entry = parse_central_header(&mut cursor, self.charset)?;
            trace!(
                "entry {} at disk {} offset {}",
                entry.name(),
                entry.disk_number_start,
                entry.local_header_offset
            );
            entries.push(entry);
        }
        if cursor.position() != cd_size {
            return Err(ZipError::Format(format!(
                "central directory is {cd_size} bytes but its {total_entries} entries span {}",
                cursor.position()
            )));
        }
        model.entries = entries;
        model.split_archive = model.last_disk() > 0 || self.starts_with_split_marker()?;
        model.validate()?;
        Ok(model)
    }

    fn starts_with_split_marker(&self) -> ZipResult<bool> {
        let mut sig = [0u8; 4];
        if self.reader.read_at(0, &mut sig)? < sig.len() {
            return Ok(false);
        }
        let sig = u32::from_le_bytes(sig);
        Ok(sig == SPLIT_ARCHIVE_SIGNATURE || sig == SINGLE_SEGMENT_SIGNATURE)
    }

    /// Checks the layout claims of a parsed archive against the bytes on
    /// disk.
    pub fn validate(&self, model: &ArchiveModel) -> ZipResult<()> {
        let (_, layout) = self.read_trailer()?;

        let (cd_disk, cd_offset, cd_size) = model.central_directory_location();
        let cd_start = self.reader.disk_offset(cd_disk, cd_offset)?;
        let next_record = layout.zip64_eocd_offset.unwrap_or(layout.eocd_offset);
        if cd_start + cd_size != next_record {
            return Err(ZipError::Format(format!(
                "central directory ends at {} but the next record starts at {next_record}",
                cd_start + cd_size
            )));
        }

        for entry in &model.entries {
            let (local, data_offset) = self.local_header(entry)?;
            if local.core.file_name_raw != entry.core.file_name_raw {
                return Err(ZipError::Format(format!(
                    "local header name does not match central entry {}",
                    entry.name()
                )));
            }
            let end = data_offset.checked_add(entry.core.compressed_size);
            if end.is_none_or(|end| end > cd_start) {
                return Err(ZipError::Format(format!(
                    "payload of {} runs past the central directory",
                    entry.name()
                )));
            }
        }
        debug!("validated {} entries", model.entries.len());
        Ok(())
    }

    /// Logical offset of an entry's local header.
    pub fn local_header_offset(&self, entry: &FileHeader) -> ZipResult<u64> {
        self.reader
            .disk_offset(entry.disk_number_start, entry.local_header_offset)
    }

    /// Reads the local header of `entry`; returns it with the logical offset
    /// where the payload starts.
    pub fn local_header(&self, entry: &FileHeader) -> ZipResult<(LocalFileHeader, u64)> {
        let offset = self.local_header_offset(entry)?;
        let mut cursor = ReadAtCursor::new(self.reader, offset);
        let header = read_local_file_header(&mut cursor, self.charset)?;
        Ok((header, cursor.position()))
    }
}

fn signature_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn decode_name(raw: Vec<u8>, flags: GeneralPurposeFlags, charset: Charset) -> ZipResult<(String, Vec<u8>)> {
    if raw.is_empty() {
        return Err(ZipError::format("entry name has zero length"));
    }
    let name = Charset::for_flag(flags.is_utf8(), charset).decode(&raw);
    Ok((name, raw))
}

/// Parse a Central Directory File Header from a cursor.
pub fn parse_central_header(cursor: &mut Cursor<&[u8]>, charset: Charset) -> ZipResult<FileHeader> {
    if cursor.read_u32::<LittleEndian>()? != CDFH_SIGNATURE {
        return Err(ZipError::format("invalid central directory file header signature"));
    }

    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = GeneralPurposeFlags(cursor.read_u16::<LittleEndian>()?);
    let compression_method = CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?)?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let internal_attributes = cursor.read_u16::<LittleEndian>()?;
    let external_attributes = cursor.read_u32::<LittleEndian>()?;
    let local_header_offset = cursor.read_u32::<LittleEndian>()?;

    let mut name = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut name)?;
    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra)?;
    let mut file_comment = vec![0u8; file_comment_length as usize];
    cursor.read_exact(&mut file_comment)?;

    let zip64_fields = Zip64Fields {
        uncompressed_size: uncompressed_size == ZIP64_SENTINEL_U32,
        compressed_size: compressed_size == ZIP64_SENTINEL_U32,
        local_header_offset: local_header_offset == ZIP64_SENTINEL_U32,
        disk_start: disk_number_start == ZIP64_SENTINEL_U16,
    };
    let extra = ExtraFields::parse(&extra, zip64_fields)?;
    let zip64 = extra.zip64.clone().unwrap_or_default();
    let (file_name, file_name_raw) = decode_name(name, flags, charset)?;

    let header = FileHeader {
        core: EntryCore {
            version_needed,
            flags,
            compression_method,
            last_modified: DosDateTime::from_parts(last_mod_date, last_mod_time),
            crc32,
            compressed_size: zip64.compressed_size.unwrap_or(compressed_size as u64),
            uncompressed_size: zip64.uncompressed_size.unwrap_or(uncompressed_size as u64),
            file_name,
            file_name_raw,
            extra,
        },
        version_made_by,
        disk_number_start: zip64.disk_start.unwrap_or(disk_number_start as u32),
        internal_attributes,
        external_attributes,
        local_header_offset: zip64.local_header_offset.unwrap_or(local_header_offset as u64),
        file_comment,
    };
    header.core.validate()?;
    Ok(header)
}

/// Reads a local file header, signature included, from a sequential
/// stream. The stream is left at the first payload byte.
pub fn read_local_file_header<R: Read>(reader: &mut R, charset: Charset) -> ZipResult<LocalFileHeader> {
    let mut fixed = [0u8; LFH_SIZE];
    reader.read_exact(&mut fixed)?;
    let mut cursor = Cursor::new(&fixed[..]);
    if cursor.read_u32::<LittleEndian>()? != LFH_SIGNATURE {
        return Err(ZipError::format("invalid local file header signature"));
    }

    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = GeneralPurposeFlags(cursor.read_u16::<LittleEndian>()?);
    let compression_method = CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?)?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;

    let mut name = vec![0u8; file_name_length as usize];
    reader.read_exact(&mut name)?;
    let mut extra = vec![0u8; extra_field_length as usize];
    reader.read_exact(&mut extra)?;

    // A local Zip64 record carries both sizes whenever it is present.
    let saturated =
        uncompressed_size == ZIP64_SENTINEL_U32 || compressed_size == ZIP64_SENTINEL_U32;
    let zip64_fields = Zip64Fields {
        uncompressed_size: saturated,
        compressed_size: saturated,
        ..Default::default()
    };
    let extra = ExtraFields::parse(&extra, zip64_fields)?;
    let zip64 = extra.zip64.clone().unwrap_or_default();
    let (file_name, file_name_raw) = decode_name(name, flags, charset)?;

    let header = LocalFileHeader {
        core: EntryCore {
            version_needed,
            flags,
            compression_method,
            last_modified: DosDateTime::from_parts(last_mod_date, last_mod_time),
            crc32,
            compressed_size: zip64.compressed_size.unwrap_or(compressed_size as u64),
            uncompressed_size: zip64.uncompressed_size.unwrap_or(uncompressed_size as u64),
            file_name,
            file_name_raw,
            extra,
        },
    };
    header.core.validate()?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal archive with one stored entry, built by hand.
    fn tiny_archive(comment: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&LFH_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[20, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        data.extend_from_slice(&crc32fast::hash(b"hi").to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[1, 0, 0, 0]);
        data.extend_from_slice(b"xhi");

        let cd_offset = data.len() as u32;
        data.extend_from_slice(&CDFH_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&[51, 3, 20, 0, 0, 0, 0, 0, 0, 0, 0x21, 0]);
        data.extend_from_slice(&crc32fast::hash(b"hi").to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"x");
        let cd_size = data.len() as u32 - cd_offset;

        let eocd = EndOfCentralDirectory {
            disk_entries: 1,
            total_entries: 1,
            cd_size,
            cd_offset,
            comment: comment.to_vec(),
            ..Default::default()
        };
        eocd.write_to(&mut data).unwrap();
        data
    }

    #[test]
    fn parses_minimal_archive() {
        let data = tiny_archive(b"");
        let parser = ZipParser::new(&data, Charset::Cp437);
        let model = parser.parse().unwrap();
        assert_eq!(model.entries.len(), 1);
        let entry = &model.entries[0];
        assert_eq!(entry.name(), "x");
        assert_eq!(entry.core.uncompressed_size, 2);
        assert_eq!(entry.core.last_modified.date(), (1980, 1, 1));
        assert!(!model.split_archive);
        parser.validate(&model).unwrap();

        let (_, data_offset) = parser.local_header(entry).unwrap();
        assert_eq!(&data[data_offset as usize..data_offset as usize + 2], b"hi");
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let data = tiny_archive(b"PK\x05\x06 decoy inside the comment");
        let model = ZipParser::new(&data, Charset::Cp437).parse().unwrap();
        assert_eq!(model.comment(), b"PK\x05\x06 decoy inside the comment");
    }

    #[test]
    fn truncation_is_reported() {
        let data = tiny_archive(b"");
        for cut in 1..data.len() {
            let truncated = data[..data.len() - cut].to_vec();
            let result = ZipParser::new(&truncated, Charset::Cp437).parse();
            assert!(result.is_err(), "cut of {cut} bytes parsed");
        }
    }

    #[test]
    fn unknown_method_is_a_format_error() {
        let mut data = tiny_archive(b"");
        // compression method of the central entry
        let cd = data.len() - EndOfCentralDirectory::SIZE - 47;
        data[cd + 10] = 14;
        let err = ZipParser::new(&data, Charset::Cp437).parse().unwrap_err();
        assert!(matches!(err, ZipError::Format(_)));
    }

    #[test]
    fn central_directory_size_must_match_its_entries() {
        let mut data = tiny_archive(b"");
        let eocd = data.len() - EndOfCentralDirectory::SIZE;
        let cd_size = u32::from_le_bytes(data[eocd + 12..eocd + 16].try_into().unwrap());
        // Claim the directory also covers the EOCD signature.
        data[eocd + 12..eocd + 16].copy_from_slice(&(cd_size + 4).to_le_bytes());
        let err = ZipParser::new(&data, Charset::Cp437).parse().unwrap_err();
        assert!(matches!(err, ZipError::Format(_)), "{err}");
    }

    #[test]
    fn zero_length_name_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LFH_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 26]);
        let err = read_local_file_header(&mut bytes.as_slice(), Charset::Utf8).unwrap_err();
        assert!(matches!(err, ZipError::Format(_)));
    }
}
