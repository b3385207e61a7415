//! Fixed-layout ZIP records and the small value types shared by every header.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::{ZipError, ZipResult};

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: u32 = 0x0403_4b50;
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: u32 = 0x0201_4b50;
pub const CDFH_MIN_SIZE: usize = 46;

/// Data descriptor, also used as the leading marker of a split archive.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const SPLIT_ARCHIVE_SIGNATURE: u32 = DATA_DESCRIPTOR_SIGNATURE;
/// Replaces the split marker when a split archive fits on a single disk.
pub const SINGLE_SEGMENT_SIGNATURE: u32 = 0x3030_4b50;

pub const ZIP64_SENTINEL_U16: u16 = 0xFFFF;
pub const ZIP64_SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// Version needed to extract, per feature.
pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
pub const VERSION_AES: u16 = 51;
/// Upper byte of "version made by": 3 = Unix.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_AES;

/// ZIP compression methods.
///
/// `Aes` is never a real method: it is the value stored in the header of an
/// AES-encrypted entry, whose true method lives in the AES extra record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Aes,
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> ZipResult<Self> {
        match value {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflated),
            99 => Ok(CompressionMethod::Aes),
            other => Err(ZipError::Format(format!(
                "unknown compression method {other}"
            ))),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Aes => 99,
        }
    }
}

/// Deflate effort, also reflected in general-purpose bits 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    Fast,
    #[default]
    Normal,
    Maximum,
    Ultra,
}

impl CompressionLevel {
    pub fn deflate_level(&self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Normal => 5,
            CompressionLevel::Maximum => 7,
            CompressionLevel::Ultra => 9,
        }
    }

    fn flag_bits(&self) -> u16 {
        match self {
            CompressionLevel::Normal => 0b000,
            CompressionLevel::Maximum => 0b010,
            CompressionLevel::Fast => 0b100,
            CompressionLevel::Fastest | CompressionLevel::Ultra => 0b110,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    #[default]
    None,
    /// Traditional PKWARE stream cipher.
    ZipCrypto,
    /// WinZip AES (AE-1 / AE-2).
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AesKeyStrength {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl AesKeyStrength {
    pub fn from_u8(value: u8) -> ZipResult<Self> {
        match value {
            1 => Ok(AesKeyStrength::Aes128),
            2 => Ok(AesKeyStrength::Aes192),
            3 => Ok(AesKeyStrength::Aes256),
            other => Err(ZipError::Format(format!("invalid AES key strength {other}"))),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AesKeyStrength::Aes128 => 1,
            AesKeyStrength::Aes192 => 2,
            AesKeyStrength::Aes256 => 3,
        }
    }

    pub fn key_length(&self) -> usize {
        match self {
            AesKeyStrength::Aes128 => 16,
            AesKeyStrength::Aes192 => 24,
            AesKeyStrength::Aes256 => 32,
        }
    }

    pub fn salt_length(&self) -> usize {
        self.key_length() / 2
    }
}

/// Vendor version of the AES extra record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AesVersion {
    /// AE-1: CRC-32 is stored and checked.
    Ae1,
    /// AE-2: CRC-32 is zero; only the authentication code protects the data.
    #[default]
    Ae2,
}

impl AesVersion {
    pub fn from_u16(value: u16) -> ZipResult<Self> {
        match value {
            1 => Ok(AesVersion::Ae1),
            2 => Ok(AesVersion::Ae2),
            other => Err(ZipError::Format(format!("unknown AES vendor version {other}"))),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            AesVersion::Ae1 => 1,
            AesVersion::Ae2 => 2,
        }
    }
}

/// General purpose bit flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeneralPurposeFlags(pub u16);

impl GeneralPurposeFlags {
    const ENCRYPTED: u16 = 1 << 0;
    const LEVEL_MASK: u16 = 0b110;
    const DATA_DESCRIPTOR: u16 = 1 << 3;
    const STRONG_ENCRYPTION: u16 = 1 << 6;
    const UTF8: u16 = 1 << 11;

    pub fn is_encrypted(&self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.0 & Self::DATA_DESCRIPTOR != 0
    }

    pub fn is_strong_encryption(&self) -> bool {
        self.0 & Self::STRONG_ENCRYPTION != 0
    }

    pub fn is_utf8(&self) -> bool {
        self.0 & Self::UTF8 != 0
    }

    pub fn set_encrypted(&mut self, on: bool) {
        self.set(Self::ENCRYPTED, on);
    }

    pub fn set_data_descriptor(&mut self, on: bool) {
        self.set(Self::DATA_DESCRIPTOR, on);
    }

    pub fn set_utf8(&mut self, on: bool) {
        self.set(Self::UTF8, on);
    }

    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        self.0 = (self.0 & !Self::LEVEL_MASK) | level.flag_bits();
    }

    fn set(&mut self, bit: u16, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// MS-DOS packed timestamp: date in the high word, time in the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime(pub u32);

impl Default for DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    fn default() -> Self {
        DosDateTime((1 << 5 | 1) << 16)
    }
}

impl DosDateTime {
    pub fn from_parts(date: u16, time: u16) -> Self {
        DosDateTime((date as u32) << 16 | time as u32)
    }

    /// Builds a timestamp from calendar fields; seconds are stored halved.
    pub fn from_date_and_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> ZipResult<Self> {
        if !(1980..=2107).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(ZipError::format("timestamp outside the MS-DOS range"));
        }
        let date = ((year - 1980) << 9) | ((month as u16) << 5) | day as u16;
        let time = ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 / 2);
        Ok(Self::from_parts(date, time))
    }

    pub fn date_part(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn time_part(&self) -> u16 {
        self.0 as u16
    }

    /// (year, month, day)
    pub fn date(&self) -> (u16, u8, u8) {
        let date = self.date_part();
        let day = (date & 0x1F) as u8;
        let month = ((date >> 5) & 0x0F) as u8;
        let year = ((date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// (hour, minute, second)
    pub fn time(&self) -> (u8, u8, u8) {
        let time = self.time_part();
        let second = ((time & 0x1F) * 2) as u8;
        let minute = ((time >> 5) & 0x3F) as u8;
        let hour = ((time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    /// Parses the fixed part; the comment is attached by the caller.
    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::format("truncated end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::format("invalid end of central directory signature"));
        }

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment: Vec::new(),
        })
    }

    pub fn comment_len_at(data: &[u8]) -> usize {
        u16::from_le_bytes([data[20], data[21]]) as usize
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        writer.write_u16::<LittleEndian>(self.disk_number)?;
        writer.write_u16::<LittleEndian>(self.disk_with_cd)?;
        writer.write_u16::<LittleEndian>(self.disk_entries)?;
        writer.write_u16::<LittleEndian>(self.total_entries)?;
        writer.write_u32::<LittleEndian>(self.cd_size)?;
        writer.write_u32::<LittleEndian>(self.cd_offset)?;
        writer.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    /// True if any field is saturated and the real value lives in Zip64.
    pub fn is_zip64(&self) -> bool {
        self.disk_number == ZIP64_SENTINEL_U16
            || self.disk_with_cd == ZIP64_SENTINEL_U16
            || self.disk_entries == ZIP64_SENTINEL_U16
            || self.total_entries == ZIP64_SENTINEL_U16
            || self.cd_size == ZIP64_SENTINEL_U32
            || self.cd_offset == ZIP64_SENTINEL_U32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: u32 = 0x0706_4b50;
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::format("truncated ZIP64 locator"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::format("invalid ZIP64 locator signature"));
        }

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        writer.write_u64::<LittleEndian>(self.eocd64_offset)?;
        writer.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x0606_4b50;
    pub const MIN_SIZE: usize = 56;
    /// Size of the fixed record minus the leading signature and size field.
    pub const RECORD_SIZE: u64 = 44;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(ZipError::format("truncated ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        if cursor.read_u32::<LittleEndian>()? != Self::SIGNATURE {
            return Err(ZipError::format("invalid ZIP64 end of central directory signature"));
        }

        let record = Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        };
        if record.eocd64_size < Self::RECORD_SIZE {
            return Err(ZipError::format("ZIP64 end of central directory size too small"));
        }
        Ok(record)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        writer.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        writer.write_u64::<LittleEndian>(Self::RECORD_SIZE)?;
        writer.write_u16::<LittleEndian>(self.version_made_by)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u32::<LittleEndian>(self.disk_number)?;
        writer.write_u32::<LittleEndian>(self.disk_with_cd)?;
        writer.write_u64::<LittleEndian>(self.disk_entries)?;
        writer.write_u64::<LittleEndian>(self.total_entries)?;
        writer.write_u64::<LittleEndian>(self.cd_size)?;
        writer.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_method_codes() {
        for method in [
            CompressionMethod::Stored,
            CompressionMethod::Deflated,
            CompressionMethod::Aes,
        ] {
            assert_eq!(CompressionMethod::from_u16(method.as_u16()).unwrap(), method);
        }
        assert!(CompressionMethod::from_u16(12).is_err());
    }

    #[test]
    fn level_bits_follow_appnote() {
        let mut flags = GeneralPurposeFlags(1);
        flags.set_compression_level(CompressionLevel::Maximum);
        assert_eq!(flags.0, 0b011);
        flags.set_compression_level(CompressionLevel::Fast);
        assert_eq!(flags.0, 0b101);
        flags.set_compression_level(CompressionLevel::Normal);
        assert_eq!(flags.0, 0b001);
    }

    #[test]
    fn dos_date_time_parts() {
        let ts = DosDateTime::from_date_and_time(2018, 8, 15, 20, 45, 6).unwrap();
        assert_eq!(ts.date(), (2018, 8, 15));
        assert_eq!(ts.time(), (20, 45, 6));
        assert_eq!(ts.time_part(), 0xA5A3);
        assert_eq!(ts.date_part(), 0x4D0F);
        assert!(DosDateTime::from_date_and_time(1979, 1, 1, 0, 0, 0).is_err());
    }

    #[test]
    fn eocd_write_then_parse() {
        let eocd = EndOfCentralDirectory {
            disk_number: 2,
            disk_with_cd: 2,
            disk_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 4096,
            comment: Vec::new(),
        };
        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(EndOfCentralDirectory::from_bytes(&buf).unwrap(), eocd);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn zip64_records_reject_bad_signatures() {
        assert!(Zip64EOCDLocator::from_bytes(&[0u8; 20]).is_err());
        assert!(Zip64EOCD::from_bytes(&[0u8; 56]).is_err());
        assert!(Zip64EOCD::from_bytes(&[0u8; 10]).is_err());
    }
}
