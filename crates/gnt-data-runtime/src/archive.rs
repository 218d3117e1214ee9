use std::{
    collections::HashSet,
    io::{self, Read, Seek, SeekFrom},
};

use thiserror::Error;

use crate::{
    format::{
        ArchiveInfo, AssetInfo, AssetTypeSection, ContentHeader, DirectoryHeader,
        ARCHIVE_FORMAT_VERSION, CONTENT_SIGNATURE, CRC32, DIRECTORY_SIGNATURE,
    },
    AssetId, AssetType,
};

/// Error returned when reading archive files.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The file does not start with the expected signature bytes.
    #[error("invalid archive signature")]
    InvalidSignature,
    /// The file was written by an incompatible version of the packager.
    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u32),
    /// An asset-info record points outside the bounds of its content file.
    #[error("asset range [{offset}, +{len}) lies outside the content bounds")]
    RangeOutOfBounds {
        /// Absolute byte position of the range.
        offset: u64,
        /// Byte length of the range.
        len: u64,
    },
    /// The same id appears more than once in the directory.
    #[error("duplicate asset id '{0}' in archive directory")]
    DuplicateAsset(AssetId),
    /// A type section is not sorted by asset id.
    #[error("asset-info records of type '{0}' are not sorted by id")]
    UnsortedSection(AssetType),
    /// A type section points past the end of the asset-info table.
    #[error("type section '{0}' exceeds the asset-info table")]
    SectionOutOfBounds(AssetType),
    /// The payload bytes of one asset do not match their recorded checksum.
    ///
    /// Fatal to loading that one asset only; the caller may substitute a
    /// placeholder.
    #[error("crc mismatch for asset '{id}': stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Id of the asset that failed verification.
        id: AssetId,
        /// Checksum recorded in the directory.
        stored: u32,
        /// Checksum of the bytes actually read.
        computed: u32,
    },
    /// The whole content-file body does not match the checksum in its header.
    #[error("archive body crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    BodyCrcMismatch {
        /// Checksum recorded in the content header.
        stored: u32,
        /// Checksum of the body actually read.
        computed: u32,
    },
    /// Underlying i/o failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// In-memory view of an archive directory file.
///
/// The layout is seekable: the fixed-size header locates the four variable
/// sections, and a lookup scans only the section of the requested
/// [`AssetType`]. The tables are small relative to the content files and are
/// held in memory after [`Self::read`].
pub struct ArchiveDirectory {
    header: DirectoryHeader,
    sections: Vec<AssetTypeSection>,
    assets: Vec<AssetInfo>,
    archives: Vec<ArchiveInfo>,
    string_table: Vec<u8>,
    string_table_pos: u64,
}

impl ArchiveDirectory {
    /// Reads and validates a directory file.
    pub fn read<R: Read + Seek>(r: &mut R) -> Result<Self, ArchiveError> {
        let mut signature = [0u8; 4];
        r.read_exact(&mut signature)?;
        if signature != DIRECTORY_SIGNATURE {
            return Err(ArchiveError::InvalidSignature);
        }
        let header = DirectoryHeader::read(r)?;
        if header.version != ARCHIVE_FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedVersion(header.version));
        }

        r.seek(SeekFrom::Start(u64::from(header.header_size)))?;
        let mut sections = Vec::with_capacity(header.type_count as usize);
        for _ in 0..header.type_count {
            sections.push(AssetTypeSection::read(r)?);
        }

        let asset_count = header.asset_table_size / AssetInfo::SIZE;
        let mut assets = Vec::with_capacity(asset_count as usize);
        for _ in 0..asset_count {
            assets.push(AssetInfo::read(r)?);
        }

        let archive_count = header.archive_table_size / ArchiveInfo::SIZE;
        let mut archives = Vec::with_capacity(archive_count as usize);
        for _ in 0..archive_count {
            archives.push(ArchiveInfo::read(r)?);
        }

        let mut string_table = vec![0u8; header.string_table_size as usize];
        r.read_exact(&mut string_table)?;

        let string_table_pos = u64::from(header.header_size)
            + u64::from(header.type_table_size)
            + u64::from(header.asset_table_size)
            + u64::from(header.archive_table_size);

        let directory = Self {
            header,
            sections,
            assets,
            archives,
            string_table,
            string_table_pos,
        };
        directory.validate()?;
        Ok(directory)
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        let mut seen = HashSet::with_capacity(self.assets.len());
        for asset in &self.assets {
            if !seen.insert(asset.id) {
                return Err(ArchiveError::DuplicateAsset(asset.id));
            }
        }
        for section in &self.sections {
            let end = section.first_asset_index as usize + section.asset_count as usize;
            if end > self.assets.len() {
                return Err(ArchiveError::SectionOutOfBounds(section.kind));
            }
            let assets = self.section_slice(section);
            if assets.windows(2).any(|pair| pair[0].id >= pair[1].id) {
                return Err(ArchiveError::UnsortedSection(section.kind));
            }
        }
        Ok(())
    }

    fn section_slice(&self, section: &AssetTypeSection) -> &[AssetInfo] {
        let first = section.first_asset_index as usize;
        let count = section.asset_count as usize;
        &self.assets[first..first + count]
    }

    /// Locates one asset by type and id.
    ///
    /// Scans only the section of `kind`: a linear probe over the (short)
    /// section table, then a binary search within the section.
    pub fn find(&self, kind: AssetType, id: AssetId) -> Option<&AssetInfo> {
        let section = self.sections.iter().find(|s| s.kind == kind)?;
        let assets = self.section_slice(section);
        let index = assets.binary_search_by(|a| a.id.cmp(&id)).ok()?;
        Some(&assets[index])
    }

    /// Returns all asset records of one type, sorted by id.
    pub fn assets_of_type(&self, kind: AssetType) -> &[AssetInfo] {
        self.sections
            .iter()
            .find(|s| s.kind == kind)
            .map_or(&[], |s| self.section_slice(s))
    }

    /// Returns the filename recorded for an asset, if it decodes as UTF-8.
    pub fn asset_name(&self, info: &AssetInfo) -> Option<&str> {
        let start = u64::from(info.name_offset).checked_sub(self.string_table_pos)? as usize;
        let end = start + info.name_len as usize;
        let bytes = self.string_table.get(start..end)?;
        std::str::from_utf8(bytes).ok()
    }

    /// Returns the header read from the file.
    pub fn header(&self) -> &DirectoryHeader {
        &self.header
    }

    /// Returns the per-type section table.
    pub fn sections(&self) -> &[AssetTypeSection] {
        &self.sections
    }

    /// Returns the full asset-info table.
    pub fn assets(&self) -> &[AssetInfo] {
        &self.assets
    }

    /// Returns the archive-info table, one entry per content file.
    pub fn archives(&self) -> &[ArchiveInfo] {
        &self.archives
    }
}

/// Reader over one archive content file.
pub struct ArchiveReader<R> {
    header: ContentHeader,
    inner: R,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Opens a content file, validating its signature and version.
    pub fn new(mut inner: R) -> Result<Self, ArchiveError> {
        let mut signature = [0u8; 4];
        inner.read_exact(&mut signature)?;
        if signature != CONTENT_SIGNATURE {
            return Err(ArchiveError::InvalidSignature);
        }
        let header = ContentHeader::read(&mut inner)?;
        if header.version != ARCHIVE_FORMAT_VERSION {
            return Err(ArchiveError::UnsupportedVersion(header.version));
        }
        Ok(Self { header, inner })
    }

    /// Returns the header read from the file.
    pub fn header(&self) -> &ContentHeader {
        &self.header
    }

    /// Recomputes the whole-body checksum and compares it against the header.
    ///
    /// A cheap reject for a truncated or corrupted file before any per-asset
    /// reads.
    pub fn verify_checksum(&mut self) -> Result<(), ArchiveError> {
        self.inner
            .seek(SeekFrom::Start(u64::from(self.header.header_size)))?;

        let mut digest = CRC32.digest();
        let mut remaining = self.header.content_size;
        let mut buffer = [0u8; 64 * 1024];
        while remaining > 0 {
            let chunk = remaining.min(buffer.len() as u64) as usize;
            self.inner.read_exact(&mut buffer[..chunk])?;
            digest.update(&buffer[..chunk]);
            remaining -= chunk as u64;
        }

        let computed = digest.finalize();
        if computed != self.header.crc32 {
            return Err(ArchiveError::BodyCrcMismatch {
                stored: self.header.crc32,
                computed,
            });
        }
        Ok(())
    }

    /// Reads and verifies the payload of one asset.
    ///
    /// Fails with [`ArchiveError::CrcMismatch`] if the bytes do not match the
    /// checksum recorded in the directory; the reader stays usable for other
    /// assets.
    pub fn read_asset(&mut self, info: &AssetInfo) -> Result<Vec<u8>, ArchiveError> {
        let body_start = u64::from(self.header.header_size);
        let body_end = body_start + self.header.content_size;
        let range_end = info.byte_offset.checked_add(info.byte_len);
        if info.byte_offset < body_start || range_end.map_or(true, |end| end > body_end) {
            return Err(ArchiveError::RangeOutOfBounds {
                offset: info.byte_offset,
                len: info.byte_len,
            });
        }

        self.inner.seek(SeekFrom::Start(info.byte_offset))?;
        let mut data = vec![0u8; info.byte_len as usize];
        self.inner.read_exact(&mut data)?;

        let computed = CRC32.checksum(&data);
        if computed != info.crc32 {
            return Err(ArchiveError::CrcMismatch {
                id: info.id,
                stored: info.crc32,
                computed,
            });
        }
        Ok(data)
    }
}
