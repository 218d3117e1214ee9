//! Writers for the archive pair.
//!
//! Writers are scoped: a content file is opened, fully written, flushed and
//! closed before the directory-building step references its bytes; no
//! partial-write state is observable outside this module.

use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
};

use byteorder::{LittleEndian, WriteBytesExt};
use gnt_data_runtime::format::{
    ArchiveInfo, AssetInfo, AssetTypeSection, ContentHeader, DirectoryHeader,
    ARCHIVE_FORMAT_VERSION, CONTENT_HEADER_SIZE, CONTENT_SIZE_FIELD_OFFSET, CRC32,
    DIRECTORY_HEADER_SIZE,
};

use crate::Error;

/// Result of writing one content file.
pub(crate) struct WrittenContent {
    /// CRC-32 of the whole post-header payload.
    pub whole_crc32: u32,
    /// CRC-32 of each asset payload, in input order.
    pub asset_crcs: Vec<u32>,
    /// Total payload size in bytes.
    pub content_size: u64,
}

/// Writes one archive content file from a list of compiled cache files.
///
/// The payload is streamed; each asset is individually checksummed during
/// the write so corruption in the cache is detected at the earliest point.
/// The header's `(content size, crc32)` fields are patched once the payload
/// is complete.
pub(crate) fn write_content_file(
    path: &Path,
    build_code: u32,
    sources: &[&Path],
) -> Result<WrittenContent, Error> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    ContentHeader {
        version: ARCHIVE_FORMAT_VERSION,
        build_code,
        header_size: CONTENT_HEADER_SIZE,
        content_size: 0,
        crc32: 0,
    }
    .write(&mut writer)?;

    let mut digest = CRC32.digest();
    let mut asset_crcs = Vec::with_capacity(sources.len());
    let mut content_size = 0u64;
    for source in sources {
        let data = std::fs::read(source)?;
        asset_crcs.push(CRC32.checksum(&data));
        digest.update(&data);
        content_size += data.len() as u64;
        writer.write_all(&data)?;
    }
    let whole_crc32 = digest.finalize();

    let mut file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.seek(SeekFrom::Start(CONTENT_SIZE_FIELD_OFFSET))?;
    file.write_u64::<LittleEndian>(content_size)?;
    file.write_u32::<LittleEndian>(whole_crc32)?;
    file.sync_all()?;

    Ok(WrittenContent {
        whole_crc32,
        asset_crcs,
        content_size,
    })
}

/// Writes the archive directory file.
///
/// Layout order after the fixed header: asset-type section table, asset-info
/// table, archive-info table, string table.
pub(crate) fn write_directory_file(
    path: &Path,
    build_code: u32,
    sections: &[AssetTypeSection],
    assets: &[AssetInfo],
    archives: &[ArchiveInfo],
    string_table: &[u8],
) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    DirectoryHeader {
        version: ARCHIVE_FORMAT_VERSION,
        build_code,
        header_size: DIRECTORY_HEADER_SIZE,
        type_count: sections.len() as u32,
        type_table_size: sections.len() as u32 * AssetTypeSection::SIZE,
        asset_table_size: assets.len() as u32 * AssetInfo::SIZE,
        archive_table_size: archives.len() as u32 * ArchiveInfo::SIZE,
        string_table_size: string_table.len() as u32,
    }
    .write(&mut writer)?;

    for section in sections {
        section.write(&mut writer)?;
    }
    for asset in assets {
        asset.write(&mut writer)?;
    }
    for archive in archives {
        archive.write(&mut writer)?;
    }
    writer.write_all(string_table)?;

    let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Returns the absolute byte position at which the string table starts.
pub(crate) fn string_table_position(
    section_count: usize,
    asset_count: usize,
    archive_count: usize,
) -> u64 {
    u64::from(DIRECTORY_HEADER_SIZE)
        + section_count as u64 * u64::from(AssetTypeSection::SIZE)
        + asset_count as u64 * u64::from(AssetInfo::SIZE)
        + archive_count as u64 * u64::from(ArchiveInfo::SIZE)
}
