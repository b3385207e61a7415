//! Header serialization.
//!
//! Every header goes out as one contiguous block through
//! [`ArchiveSink::ensure_room`], so no header ever straddles two disks of a
//! split archive.

use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;

use crate::error::{ZipError, ZipResult};
use crate::io::ArchiveSink;

use super::extra::Zip64ExtendedInfo;
use super::model::{ArchiveModel, DataDescriptor, EntryCore, FileHeader, LocalFileHeader};
use super::structures::*;

fn narrow_u32(value: u64, what: &str) -> ZipResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v != ZIP64_SENTINEL_U32)
        .ok_or_else(|| ZipError::Format(format!("{what} {value} needs a Zip64 record")))
}

fn len_u16(len: usize, what: &str) -> ZipResult<u16> {
    u16::try_from(len).map_err(|_| ZipError::Format(format!("{what} exceeds 65535 bytes")))
}

fn write_core_prefix(out: &mut Vec<u8>, core: &EntryCore) -> ZipResult<()> {
    out.write_u16::<LittleEndian>(core.version_needed)?;
    out.write_u16::<LittleEndian>(core.flags.0)?;
    out.write_u16::<LittleEndian>(core.compression_method.as_u16())?;
    out.write_u16::<LittleEndian>(core.last_modified.time_part())?;
    out.write_u16::<LittleEndian>(core.last_modified.date_part())?;
    out.write_u32::<LittleEndian>(core.crc32)?;
    Ok(())
}

/// Encodes a local header. Sizes are written as sentinels when the header
/// carries a Zip64 record, which then holds both of them.
pub fn encode_local_file_header(header: &LocalFileHeader) -> ZipResult<Vec<u8>> {
    let core = &header.core;
    let extra = core.extra.to_bytes()?;
    let mut out = Vec::with_capacity(LFH_SIZE + core.file_name_raw.len() + extra.len());
    out.write_u32::<LittleEndian>(LFH_SIGNATURE)?;
    write_core_prefix(&mut out, core)?;
    if core.extra.zip64.is_some() {
        out.write_u32::<LittleEndian>(ZIP64_SENTINEL_U32)?;
        out.write_u32::<LittleEndian>(ZIP64_SENTINEL_U32)?;
    } else {
        out.write_u32::<LittleEndian>(narrow_u32(core.compressed_size, "compressed size")?)?;
        out.write_u32::<LittleEndian>(narrow_u32(core.uncompressed_size, "uncompressed size")?)?;
    }
    out.write_u16::<LittleEndian>(len_u16(core.file_name_raw.len(), "entry name")?)?;
    out.write_u16::<LittleEndian>(extra.len() as u16)?;
    out.extend_from_slice(&core.file_name_raw);
    out.extend_from_slice(&extra);
    Ok(out)
}

/// Writes a local header as one block and returns the disk and
/// disk-relative offset it starts at.
pub fn write_local_file_header<W: ArchiveSink>(
    sink: &mut W,
    header: &LocalFileHeader,
) -> ZipResult<(u32, u64)> {
    let bytes = encode_local_file_header(header)?;
    sink.ensure_room(bytes.len() as u64)?;
    let location = (sink.current_disk(), sink.position()?);
    sink.write_all(&bytes)?;
    Ok(location)
}

pub fn write_data_descriptor<W: ArchiveSink>(
    sink: &mut W,
    descriptor: &DataDescriptor,
    zip64: bool,
) -> ZipResult<()> {
    let mut bytes = Vec::with_capacity(24);
    descriptor.write_to(&mut bytes, zip64)?;
    sink.ensure_room(bytes.len() as u64)?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Rewrites CRC and sizes of a local header already on disk.
pub fn update_local_file_header<W: ArchiveSink>(
    sink: &mut W,
    disk: u32,
    offset: u64,
    header: &LocalFileHeader,
) -> ZipResult<()> {
    let core = &header.core;
    let mut fields = Vec::with_capacity(12);
    fields.write_u32::<LittleEndian>(core.crc32)?;
    if core.extra.zip64.is_some() {
        fields.write_u32::<LittleEndian>(ZIP64_SENTINEL_U32)?;
        fields.write_u32::<LittleEndian>(ZIP64_SENTINEL_U32)?;
        // The Zip64 record is always the first extra block.
        let mut sizes = Vec::with_capacity(16);
        sizes.write_u64::<LittleEndian>(core.uncompressed_size)?;
        sizes.write_u64::<LittleEndian>(core.compressed_size)?;
        let at = offset + LFH_SIZE as u64 + core.file_name_raw.len() as u64 + 4;
        sink.patch(disk, at, &sizes)?;
    } else {
        fields.write_u32::<LittleEndian>(narrow_u32(core.compressed_size, "compressed size")?)?;
        fields.write_u32::<LittleEndian>(narrow_u32(core.uncompressed_size, "uncompressed size")?)?;
    }
    sink.patch(disk, offset + 14, &fields)
}

/// Recomputes the Zip64 record of a central entry from its effective
/// values.
pub fn normalize_entry(entry: &mut FileHeader) {
    let core = &mut entry.core;
    let sentinel = ZIP64_SENTINEL_U32 as u64;
    let zip64 = Zip64ExtendedInfo {
        uncompressed_size: (core.uncompressed_size >= sentinel).then_some(core.uncompressed_size),
        compressed_size: (core.compressed_size >= sentinel).then_some(core.compressed_size),
        local_header_offset: (entry.local_header_offset >= sentinel)
            .then_some(entry.local_header_offset),
        disk_start: (entry.disk_number_start >= ZIP64_SENTINEL_U16 as u32)
            .then_some(entry.disk_number_start),
    };
    if zip64.is_empty() {
        core.extra.zip64 = None;
    } else {
        core.version_needed = core.version_needed.max(VERSION_ZIP64);
        core.extra.zip64 = Some(zip64);
    }
}

pub fn encode_central_header(entry: &FileHeader) -> ZipResult<Vec<u8>> {
    let core = &entry.core;
    let zip64 = core.extra.zip64.clone().unwrap_or_default();
    let extra = core.extra.to_bytes()?;
    let mut out = Vec::with_capacity(CDFH_MIN_SIZE + core.file_name_raw.len() + extra.len());
    out.write_u32::<LittleEndian>(CDFH_SIGNATURE)?;
    out.write_u16::<LittleEndian>(entry.version_made_by)?;
    write_core_prefix(&mut out, core)?;

    let u32_field = |present: bool, value: u64, what: &str| -> ZipResult<u32> {
        if present { Ok(ZIP64_SENTINEL_U32) } else { narrow_u32(value, what) }
    };
    out.write_u32::<LittleEndian>(u32_field(
        zip64.compressed_size.is_some(),
        core.compressed_size,
        "compressed size",
    )?)?;
    out.write_u32::<LittleEndian>(u32_field(
        zip64.uncompressed_size.is_some(),
        core.uncompressed_size,
        "uncompressed size",
    )?)?;
    out.write_u16::<LittleEndian>(len_u16(core.file_name_raw.len(), "entry name")?)?;
    out.write_u16::<LittleEndian>(extra.len() as u16)?;
    out.write_u16::<LittleEndian>(len_u16(entry.file_comment.len(), "entry comment")?)?;
    let disk = match zip64.disk_start {
        Some(_) => ZIP64_SENTINEL_U16,
        None => u16::try_from(entry.disk_number_start)
            .ok()
            .filter(|d| *d != ZIP64_SENTINEL_U16)
            .ok_or_else(|| ZipError::format("disk number needs a Zip64 record"))?,
    };
    out.write_u16::<LittleEndian>(disk)?;
    out.write_u16::<LittleEndian>(entry.internal_attributes)?;
    out.write_u32::<LittleEndian>(entry.external_attributes)?;
    out.write_u32::<LittleEndian>(u32_field(
        zip64.local_header_offset.is_some(),
        entry.local_header_offset,
        "local header offset",
    )?)?;
    out.extend_from_slice(&core.file_name_raw);
    out.extend_from_slice(&extra);
    out.extend_from_slice(&entry.file_comment);
    Ok(out)
}

/// Fills in the trailing records of `model` for a central directory placed
/// at `(disk, offset)` and returns the encoded block.
fn build_trailer(model: &mut ArchiveModel, disk: u32, offset: u64) -> ZipResult<Vec<u8>> {
    let mut block = Vec::new();
    for entry in &model.entries {
        block.extend_from_slice(&encode_central_header(entry)?);
    }
    let cd_size = block.len() as u64;
    let count = model.entries.len() as u64;

    let sentinel32 = ZIP64_SENTINEL_U32 as u64;
    let sentinel16 = ZIP64_SENTINEL_U16 as u64;
    let needs_zip64 = model.entries.iter().any(|e| e.core.extra.zip64.is_some())
        || count >= sentinel16
        || cd_size >= sentinel32
        || offset >= sentinel32
        || disk as u64 >= sentinel16;

    if needs_zip64 {
        let zip64 = Zip64EOCD {
            eocd64_size: Zip64EOCD::RECORD_SIZE,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_number: disk,
            disk_with_cd: disk,
            disk_entries: count,
            total_entries: count,
            cd_size,
            cd_offset: offset,
        };
        let locator = Zip64EOCDLocator {
            disk_with_eocd64: disk,
            eocd64_offset: offset + cd_size,
            total_disks: disk + 1,
        };
        zip64.write_to(&mut block)?;
        locator.write_to(&mut block)?;
        model.zip64_end_of_central_directory = Some(zip64);
        model.zip64_locator = Some(locator);
    } else {
        model.zip64_end_of_central_directory = None;
        model.zip64_locator = None;
    }

    // Only the fields that overflow carry sentinels.
    let clamp16 = |v: u64| if v >= sentinel16 { ZIP64_SENTINEL_U16 } else { v as u16 };
    let clamp32 = |v: u64| if v >= sentinel32 { ZIP64_SENTINEL_U32 } else { v as u32 };
    let eocd = &mut model.end_of_central_directory;
    eocd.disk_number = clamp16(disk as u64);
    eocd.disk_with_cd = clamp16(disk as u64);
    eocd.disk_entries = clamp16(count);
    eocd.total_entries = clamp16(count);
    eocd.cd_size = clamp32(cd_size);
    eocd.cd_offset = clamp32(offset);
    eocd.write_to(&mut block)?;
    Ok(block)
}

/// Writes the central directory, the Zip64 records when needed and the
/// EOCD as a single block at the sink's current position.
pub fn finalize<W: ArchiveSink>(model: &mut ArchiveModel, sink: &mut W) -> ZipResult<()> {
    if model.comment().len() > u16::MAX as usize {
        return Err(ZipError::format("archive comment exceeds 65535 bytes"));
    }
    for entry in &mut model.entries {
        normalize_entry(entry);
    }
    model.split_archive = sink.is_split();

    let mut location = (sink.current_disk(), sink.position()?);
    let mut block = build_trailer(model, location.0, location.1)?;
    sink.ensure_room(block.len() as u64)?;
    let now = (sink.current_disk(), sink.position()?);
    if now != location {
        location = now;
        block = build_trailer(model, location.0, location.1)?;
    }
    sink.write_all(&block)?;
    sink.flush()?;
    debug!(
        "central directory with {} entries written at disk {} offset {}",
        model.entries.len(),
        location.0,
        location.1
    );
    Ok(())
}

/// Serializes the header model alone: the central directory and trailing
/// records, with entry offsets taken as recorded.
pub fn serialize<W: ArchiveSink>(model: &mut ArchiveModel, sink: &mut W) -> ZipResult<()> {
    finalize(model, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::charset::Charset;
    use crate::zip::extra::{AesExtraDataRecord, ExtraFields};
    use crate::zip::model::EntryCore;
    use crate::zip::parser::ZipParser;
    use std::io::Cursor;

    fn entry(name: &str, offset: u64) -> FileHeader {
        FileHeader {
            core: EntryCore {
                version_needed: VERSION_DEFAULT,
                flags: GeneralPurposeFlags(1 << 11),
                compression_method: CompressionMethod::Deflated,
                last_modified: DosDateTime::from_date_and_time(2024, 2, 29, 12, 30, 10).unwrap(),
                crc32: 0xDEAD_BEEF,
                compressed_size: 1000,
                uncompressed_size: 4000,
                file_name: name.to_string(),
                file_name_raw: name.as_bytes().to_vec(),
                extra: ExtraFields::default(),
            },
            version_made_by: VERSION_MADE_BY,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0o100644 << 16,
            local_header_offset: offset,
            file_comment: Vec::new(),
        }
    }

    #[test]
    fn model_survives_serialize_then_parse() {
        let mut big = entry("big.iso", 7_000_000_000);
        big.core.uncompressed_size = 6_000_000_000;
        big.core.compressed_size = 5_000_000_000;

        let mut aes = entry("secret/b.bin", 10);
        aes.core.flags.set_encrypted(true);
        aes.core.compression_method = CompressionMethod::Aes;
        aes.core.crc32 = 0;
        aes.core.extra.aes = Some(AesExtraDataRecord {
            version: AesVersion::Ae2,
            key_strength: AesKeyStrength::Aes256,
            compression_method: CompressionMethod::Deflated,
        });

        let mut legacy = entry("c.pdf", 20);
        legacy.core.flags.set_encrypted(true);
        legacy.file_comment = b"legacy".to_vec();

        let mut model = ArchiveModel::new();
        model.entries = vec![entry("a.txt", 0), aes, legacy, big];
        model.set_comment(b"archive comment".to_vec()).unwrap();

        let mut sink = Cursor::new(vec![0u8; 64]);
        sink.set_position(64);
        serialize(&mut model, &mut sink).unwrap();
        assert!(model.is_zip64());
        assert!(model.entries[3].core.extra.zip64.is_some());
        assert_eq!(model.end_of_central_directory.cd_offset, 64);
        assert_eq!(model.end_of_central_directory.total_entries, 4);

        let bytes = sink.into_inner();
        let parsed = ZipParser::new(&bytes, Charset::Cp437).parse().unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn local_header_sentinels_only_with_zip64() {
        let mut header = entry("x", 0).to_local_header();
        let plain = encode_local_file_header(&header).unwrap();
        assert_eq!(&plain[18..22], &1000u32.to_le_bytes());

        header.core.extra.zip64 = Some(Zip64ExtendedInfo {
            uncompressed_size: Some(0),
            compressed_size: Some(0),
            ..Default::default()
        });
        let wide = encode_local_file_header(&header).unwrap();
        assert_eq!(&wide[18..26], &[0xFF; 8]);
        assert_eq!(wide.len(), LFH_SIZE + 1 + 20);
    }

    #[test]
    fn overflow_without_zip64_is_refused() {
        let mut header = entry("x", 0).to_local_header();
        header.core.compressed_size = 5_000_000_000;
        assert!(encode_local_file_header(&header).is_err());
    }
}
