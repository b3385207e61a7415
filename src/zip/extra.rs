//! Extra-data blocks: Zip64 extended information and the WinZip AES record.
//!
//! Blocks this crate does not interpret are kept verbatim so that a parsed
//! header serializes back to the same bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::structures::{AesKeyStrength, AesVersion, CompressionMethod};
use crate::error::{ZipError, ZipResult};

pub const ZIP64_EXTRA_ID: u16 = 0x0001;
pub const AES_EXTRA_ID: u16 = 0x9901;
pub const AES_EXTRA_DATA_SIZE: u16 = 7;
const AES_VENDOR_ID: [u8; 2] = *b"AE";

/// Which Zip64 fields a header carries, decided by which 32-bit (or 16-bit)
/// fields were saturated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Fields {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub local_header_offset: bool,
    pub disk_start: bool,
}

impl Zip64Fields {
    pub fn any(&self) -> bool {
        self.uncompressed_size || self.compressed_size || self.local_header_offset || self.disk_start
    }

    fn encoded_len(&self) -> usize {
        8 * (self.uncompressed_size as usize
            + self.compressed_size as usize
            + self.local_header_offset as usize)
            + 4 * self.disk_start as usize
    }
}

/// 64-bit overflow values; a field is present only if its narrow
/// counterpart overflowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtendedInfo {
    fn parse(data: &[u8], fields: Zip64Fields) -> ZipResult<Self> {
        if data.len() != fields.encoded_len() {
            return Err(ZipError::Format(format!(
                "Zip64 extra field declares {} bytes, expected {}",
                data.len(),
                fields.encoded_len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let mut info = Zip64ExtendedInfo::default();
        if fields.uncompressed_size {
            info.uncompressed_size = Some(cursor.read_u64::<LittleEndian>()?);
        }
        if fields.compressed_size {
            info.compressed_size = Some(cursor.read_u64::<LittleEndian>()?);
        }
        if fields.local_header_offset {
            info.local_header_offset = Some(cursor.read_u64::<LittleEndian>()?);
        }
        if fields.disk_start {
            info.disk_start = Some(cursor.read_u32::<LittleEndian>()?);
        }
        Ok(info)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        let len = 8 * (self.uncompressed_size.is_some() as u16
            + self.compressed_size.is_some() as u16
            + self.local_header_offset.is_some() as u16)
            + 4 * self.disk_start.is_some() as u16;
        out.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        out.write_u16::<LittleEndian>(len)?;
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        {
            out.write_u64::<LittleEndian>(value)?;
        }
        if let Some(disk) = self.disk_start {
            out.write_u32::<LittleEndian>(disk)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
            && self.disk_start.is_none()
    }
}

/// WinZip AES extra record (header id 0x9901).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraDataRecord {
    pub version: AesVersion,
    pub key_strength: AesKeyStrength,
    /// The method actually applied to the plaintext.
    pub compression_method: CompressionMethod,
}

impl AesExtraDataRecord {
    fn parse(data: &[u8]) -> ZipResult<Self> {
        if data.len() != AES_EXTRA_DATA_SIZE as usize {
            return Err(ZipError::Format(format!(
                "AES extra field declares {} bytes, expected {AES_EXTRA_DATA_SIZE}",
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let version = AesVersion::from_u16(cursor.read_u16::<LittleEndian>()?)?;
        let vendor = [cursor.read_u8()?, cursor.read_u8()?];
        if vendor != AES_VENDOR_ID {
            return Err(ZipError::format("AES extra field has unknown vendor id"));
        }
        let key_strength = AesKeyStrength::from_u8(cursor.read_u8()?)?;
        let compression_method = CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?)?;
        if compression_method == CompressionMethod::Aes {
            return Err(ZipError::format("AES extra field nests the AES method"));
        }
        Ok(Self {
            version,
            key_strength,
            compression_method,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) -> ZipResult<()> {
        out.write_u16::<LittleEndian>(AES_EXTRA_ID)?;
        out.write_u16::<LittleEndian>(AES_EXTRA_DATA_SIZE)?;
        out.write_u16::<LittleEndian>(self.version.as_u16())?;
        out.extend_from_slice(&AES_VENDOR_ID);
        out.write_u8(self.key_strength.as_u8())?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtraField {
    pub id: u16,
    pub data: Vec<u8>,
}

/// All extra-data blocks attached to one header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    pub zip64: Option<Zip64ExtendedInfo>,
    pub aes: Option<AesExtraDataRecord>,
    pub other: Vec<RawExtraField>,
}

impl ExtraFields {
    /// Parses the extra area of a header. Every block must fit exactly
    /// inside the area and every interpreted block must consume exactly the
    /// length it declares.
    pub fn parse(data: &[u8], zip64_fields: Zip64Fields) -> ZipResult<Self> {
        let mut fields = ExtraFields::default();
        let mut pos = 0usize;
        while pos < data.len() {
            if data.len() - pos < 4 {
                return Err(ZipError::format("truncated extra field header"));
            }
            let id = u16::from_le_bytes([data[pos], data[pos + 1]]);
            let size = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 4;
            if data.len() - pos < size {
                return Err(ZipError::Format(format!(
                    "extra field {id:#06x} declares {size} bytes but only {} remain",
                    data.len() - pos
                )));
            }
            let body = &data[pos..pos + size];
            pos += size;

            match id {
                ZIP64_EXTRA_ID => {
                    fields.zip64 = Some(Zip64ExtendedInfo::parse(body, zip64_fields)?);
                }
                AES_EXTRA_ID => fields.aes = Some(AesExtraDataRecord::parse(body)?),
                _ => fields.other.push(RawExtraField {
                    id,
                    data: body.to_vec(),
                }),
            }
        }

        if zip64_fields.any() && fields.zip64.is_none() {
            return Err(ZipError::format("saturated size field without Zip64 extra field"));
        }
        Ok(fields)
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(zip64) = self.zip64.as_ref().filter(|z| !z.is_empty()) {
            zip64.write_to(&mut out)?;
        }
        if let Some(aes) = &self.aes {
            aes.write_to(&mut out)?;
        }
        for raw in &self.other {
            out.write_u16::<LittleEndian>(raw.id)?;
            out.write_u16::<LittleEndian>(raw.data.len() as u16)?;
            out.extend_from_slice(&raw.data);
        }
        if out.len() > u16::MAX as usize {
            return Err(ZipError::format("extra field area exceeds 65535 bytes"));
        }
        Ok(out)
    }
}
