//! Binary layout of the archive pair.
//!
//! All integers are little-endian and fixed-width. Offsets are absolute byte
//! positions from the start of the file they appear in.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{AssetId, AssetType};

/// Signature bytes of an archive directory file.
pub const DIRECTORY_SIGNATURE: [u8; 4] = *b"GDIR";

/// Signature bytes of an archive content file.
pub const CONTENT_SIGNATURE: [u8; 4] = *b"GARC";

/// Current version of the archive pair layout.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Checksum algorithm used for all payload integrity checks.
pub const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Serialized size of a directory file header, including the signature.
pub const DIRECTORY_HEADER_SIZE: u32 = 36;

/// Serialized size of a content file header, including the signature.
pub const CONTENT_HEADER_SIZE: u32 = 28;

/// Byte position of the `(content size, crc32)` pair within a content header.
///
/// The writer patches these two fields after streaming the payload.
pub const CONTENT_SIZE_FIELD_OFFSET: u64 = 16;

/// Directory file header.
///
/// Followed, in order, by the asset-type section table, the asset-info table,
/// the archive-info table and the string table. The four size fields allow a
/// reader to seek to any section without parsing the preceding ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryHeader {
    /// Layout version, [`ARCHIVE_FORMAT_VERSION`].
    pub version: u32,
    /// Caller-supplied build identifier, same value as in the content files.
    pub build_code: u32,
    /// Size of this header; the section tables start here.
    pub header_size: u32,
    /// Number of entries in the asset-type section table.
    pub type_count: u32,
    /// Byte size of the asset-type section table.
    pub type_table_size: u32,
    /// Byte size of the asset-info table.
    pub asset_table_size: u32,
    /// Byte size of the archive-info table.
    pub archive_table_size: u32,
    /// Byte size of the string table.
    pub string_table_size: u32,
}

impl DirectoryHeader {
    /// Writes the header, signature included.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&DIRECTORY_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.build_code)?;
        w.write_u32::<LittleEndian>(self.header_size)?;
        w.write_u32::<LittleEndian>(self.type_count)?;
        w.write_u32::<LittleEndian>(self.type_table_size)?;
        w.write_u32::<LittleEndian>(self.asset_table_size)?;
        w.write_u32::<LittleEndian>(self.archive_table_size)?;
        w.write_u32::<LittleEndian>(self.string_table_size)
    }

    /// Reads the fields following the signature.
    ///
    /// The caller is expected to have consumed and validated the signature.
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            version: r.read_u32::<LittleEndian>()?,
            build_code: r.read_u32::<LittleEndian>()?,
            header_size: r.read_u32::<LittleEndian>()?,
            type_count: r.read_u32::<LittleEndian>()?,
            type_table_size: r.read_u32::<LittleEndian>()?,
            asset_table_size: r.read_u32::<LittleEndian>()?,
            archive_table_size: r.read_u32::<LittleEndian>()?,
            string_table_size: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Content file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHeader {
    /// Layout version, [`ARCHIVE_FORMAT_VERSION`].
    pub version: u32,
    /// Caller-supplied build identifier.
    pub build_code: u32,
    /// Size of this header; the payload starts here.
    pub header_size: u32,
    /// Byte size of the post-header payload.
    pub content_size: u64,
    /// CRC-32 of the entire post-header payload.
    pub crc32: u32,
}

impl ContentHeader {
    /// Writes the header, signature included.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&CONTENT_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.build_code)?;
        w.write_u32::<LittleEndian>(self.header_size)?;
        w.write_u64::<LittleEndian>(self.content_size)?;
        w.write_u32::<LittleEndian>(self.crc32)
    }

    /// Reads the fields following the signature.
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            version: r.read_u32::<LittleEndian>()?,
            build_code: r.read_u32::<LittleEndian>()?,
            header_size: r.read_u32::<LittleEndian>()?,
            content_size: r.read_u64::<LittleEndian>()?,
            crc32: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// One entry of the asset-type section table.
///
/// All assets of `kind` occupy the contiguous index range
/// `[first_asset_index, first_asset_index + asset_count)` of the asset-info
/// table, sorted by [`AssetId`], which makes them binary-searchable without
/// touching other sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetTypeSection {
    /// Type of every asset in this section.
    pub kind: AssetType,
    /// Index of the section's first record in the asset-info table.
    pub first_asset_index: u32,
    /// Number of records in the section.
    pub asset_count: u32,
}

impl AssetTypeSection {
    /// Serialized size of one record.
    pub const SIZE: u32 = 12;

    /// Writes one record.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.kind.to_raw())?;
        w.write_u32::<LittleEndian>(self.first_asset_index)?;
        w.write_u32::<LittleEndian>(self.asset_count)
    }

    /// Reads one record.
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let raw = r.read_u32::<LittleEndian>()?;
        let kind = AssetType::from_raw(raw).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown asset type discriminator {}", raw),
            )
        })?;
        Ok(Self {
            kind,
            first_asset_index: r.read_u32::<LittleEndian>()?,
            asset_count: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// One entry of the asset-info table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetInfo {
    /// Id of the asset.
    pub id: AssetId,
    /// Absolute byte position of the asset's filename in the directory file.
    pub name_offset: u32,
    /// Byte length of the filename.
    pub name_len: u32,
    /// CRC-32 of the uncompressed payload.
    pub crc32: u32,
    /// Index into the archive-info table of the content file holding the
    /// payload.
    pub archive_index: u32,
    /// Absolute byte position of the payload within the content file.
    pub byte_offset: u64,
    /// Byte length of the payload.
    pub byte_len: u64,
}

impl AssetInfo {
    /// Serialized size of one record.
    pub const SIZE: u32 = 48;

    /// Writes one record.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(self.id.as_bytes())?;
        w.write_u32::<LittleEndian>(self.name_offset)?;
        w.write_u32::<LittleEndian>(self.name_len)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.archive_index)?;
        w.write_u64::<LittleEndian>(self.byte_offset)?;
        w.write_u64::<LittleEndian>(self.byte_len)
    }

    /// Reads one record.
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut id = [0u8; 16];
        r.read_exact(&mut id)?;
        Ok(Self {
            id: AssetId::from_bytes(id),
            name_offset: r.read_u32::<LittleEndian>()?,
            name_len: r.read_u32::<LittleEndian>()?,
            crc32: r.read_u32::<LittleEndian>()?,
            archive_index: r.read_u32::<LittleEndian>()?,
            byte_offset: r.read_u64::<LittleEndian>()?,
            byte_len: r.read_u64::<LittleEndian>()?,
        })
    }
}

/// One entry of the archive-info table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// CRC-32 of the whole content-file body, used as a fast reject before
    /// per-asset checks.
    pub crc32: u32,
}

impl ArchiveInfo {
    /// Serialized size of one record.
    pub const SIZE: u32 = 4;

    /// Writes one record.
    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.crc32)
    }

    /// Reads one record.
    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            crc32: r.read_u32::<LittleEndian>()?,
        })
    }
}
