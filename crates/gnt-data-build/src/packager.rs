use std::{
    collections::HashMap,
    fs,
    fs::File,
    path::{Path, PathBuf},
};

use gnt_data_offline::{AssetRegistry, Entry};
use gnt_data_runtime::{
    format::{ArchiveInfo, AssetInfo, AssetTypeSection, CONTENT_HEADER_SIZE},
    ArchiveReader,
};
use tracing::info;

use crate::{archive_writer, Error, PackagingOptions};

/// State of one packaging run.
///
/// Terminal on `Done`; `Failed` is reachable from any other state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagingState {
    /// Enumerating registry entries and probing the compiled cache.
    Collecting,
    /// Grouping, sorting and assigning assets to content-file buckets.
    Indexing,
    /// Emitting the content files and the directory file.
    Writing,
    /// Re-reading the emitted files and checking checksums.
    Verifying,
    /// The archive pair was published.
    Done,
    /// The run was aborted; no archive was published.
    Failed(String),
}

/// Files produced by a successful packaging run.
#[derive(Debug)]
pub struct PackagingOutput {
    /// The archive directory file.
    pub directory_file: PathBuf,
    /// The archive content files, in archive-index order.
    pub content_files: Vec<PathBuf>,
    /// Number of assets packaged.
    pub asset_count: usize,
}

struct PackAsset {
    entry: Entry,
    cache_path: PathBuf,
    size: u64,
    archive_index: u32,
    byte_offset: u64,
    crc32: u32,
}

/// Drives one archive packaging run.
///
/// Assumes no concurrent mutation of the registry or the compiled cache for
/// the duration of the run; the entry set is snapshotted once at the start of
/// the collecting phase.
pub struct Packager {
    options: PackagingOptions,
    state: PackagingState,
}

impl Packager {
    pub(crate) fn new(options: PackagingOptions) -> Self {
        Self {
            options,
            state: PackagingState::Collecting,
        }
    }

    /// Returns the current state of the run.
    pub fn state(&self) -> &PackagingState {
        &self.state
    }

    /// Runs packaging to completion.
    ///
    /// On failure every file written so far is discarded; the caller may
    /// retry the whole run.
    pub fn run(&mut self, registry: &AssetRegistry) -> Result<PackagingOutput, Error> {
        let mut written = Vec::new();
        match self.run_inner(registry, &mut written) {
            Ok(output) => {
                self.state = PackagingState::Done;
                info!(
                    "packaged {} assets into '{}' + {} content file(s)",
                    output.asset_count,
                    output.directory_file.display(),
                    output.content_files.len()
                );
                Ok(output)
            }
            Err(error) => {
                self.state = PackagingState::Failed(error.to_string());
                for path in written {
                    let _ = fs::remove_file(path);
                }
                Err(error)
            }
        }
    }

    fn run_inner(
        &mut self,
        registry: &AssetRegistry,
        written: &mut Vec<PathBuf>,
    ) -> Result<PackagingOutput, Error> {
        fs::create_dir_all(&self.options.output_dir)?;

        self.state = PackagingState::Collecting;
        info!("collecting registry entries");
        let mut assets = collect(registry)?;

        self.state = PackagingState::Indexing;
        info!("indexing {} assets", assets.len());
        let buckets = index(&mut assets, self.options.max_content_size);

        self.state = PackagingState::Writing;
        info!("writing {} content file(s)", buckets.len());
        let (content_files, archive_infos) = self.write_content_files(&buckets, &mut assets, written)?;

        let sections = build_sections(&assets);
        let (asset_infos, string_table) =
            build_asset_infos(&assets, sections.len(), archive_infos.len());

        let directory_file = self
            .options
            .output_dir
            .join(format!("{}.gdir", self.options.name));
        written.push(directory_file.clone());
        archive_writer::write_directory_file(
            &directory_file,
            self.options.build_code,
            &sections,
            &asset_infos,
            &archive_infos,
            &string_table,
        )?;

        self.state = PackagingState::Verifying;
        info!("verifying archive output");
        self.verify(&content_files, &archive_infos, &asset_infos)?;

        Ok(PackagingOutput {
            directory_file,
            content_files,
            asset_count: assets.len(),
        })
    }

    fn write_content_files(
        &self,
        buckets: &[Vec<usize>],
        assets: &mut [PackAsset],
        written: &mut Vec<PathBuf>,
    ) -> Result<(Vec<PathBuf>, Vec<ArchiveInfo>), Error> {
        let mut content_files = Vec::with_capacity(buckets.len());
        let mut archive_infos = Vec::with_capacity(buckets.len());
        for (archive_index, bucket) in buckets.iter().enumerate() {
            let path = self
                .options
                .output_dir
                .join(format!("{}_{:03}.garc", self.options.name, archive_index));
            written.push(path.clone());

            let sources: Vec<&Path> = bucket
                .iter()
                .map(|&i| assets[i].cache_path.as_path())
                .collect();
            let result =
                archive_writer::write_content_file(&path, self.options.build_code, &sources)?;
            for (&i, crc32) in bucket.iter().zip(result.asset_crcs) {
                assets[i].crc32 = crc32;
            }

            archive_infos.push(ArchiveInfo {
                crc32: result.whole_crc32,
            });
            content_files.push(path);
        }
        Ok((content_files, archive_infos))
    }

    fn verify(
        &self,
        content_files: &[PathBuf],
        archive_infos: &[ArchiveInfo],
        asset_infos: &[AssetInfo],
    ) -> Result<(), Error> {
        let corrupt = |e: gnt_data_runtime::ArchiveError| Error::CorruptOutput(e.to_string());

        for (path, expected) in content_files.iter().zip(archive_infos) {
            let mut reader = ArchiveReader::new(File::open(path)?).map_err(corrupt)?;
            if reader.header().crc32 != expected.crc32 {
                return Err(Error::CorruptOutput(format!(
                    "content header of '{}' disagrees with the directory",
                    path.display()
                )));
            }
            reader.verify_checksum().map_err(corrupt)?;
        }

        if asset_infos.is_empty() || self.options.verify_sample == 0 {
            return Ok(());
        }
        // deterministic sample: every n-th asset of the sorted table
        let step = (asset_infos.len() / self.options.verify_sample).max(1);
        let mut readers: HashMap<u32, ArchiveReader<File>> = HashMap::new();
        for info in asset_infos.iter().step_by(step) {
            if !readers.contains_key(&info.archive_index) {
                let file = File::open(&content_files[info.archive_index as usize])?;
                readers.insert(info.archive_index, ArchiveReader::new(file).map_err(corrupt)?);
            }
            let reader = readers
                .get_mut(&info.archive_index)
                .expect("reader inserted above");
            reader.read_asset(info).map_err(corrupt)?;
        }
        Ok(())
    }
}

fn collect(registry: &AssetRegistry) -> Result<Vec<PackAsset>, Error> {
    let mut entries = registry.entries();
    entries.sort_by(|a, b| {
        (a.kind.to_raw(), a.id).cmp(&(b.kind.to_raw(), b.id))
    });

    let mut assets = Vec::with_capacity(entries.len());
    for entry in entries {
        let cache_path = registry.compiled_asset_path(entry.id);
        let size = fs::metadata(&cache_path)
            .map(|m| m.len())
            .map_err(|_| Error::MissingCompiledAsset {
                id: entry.id,
                path: cache_path.clone(),
            })?;
        assets.push(PackAsset {
            entry,
            cache_path,
            size,
            archive_index: 0,
            byte_offset: 0,
            crc32: 0,
        });
    }
    Ok(assets)
}

/// Greedy size-capped packing of assets into content-file buckets.
///
/// Assets are visited in (type, id) order; an asset at or above the cap gets
/// a dedicated bucket. Returns buckets of indices into `assets` and assigns
/// each asset its archive index and absolute byte offset.
fn index(assets: &mut [PackAsset], max_content_size: u64) -> Vec<Vec<usize>> {
    let mut buckets: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = 0u64;
    for i in 0..assets.len() {
        let size = assets[i].size;
        if size >= max_content_size {
            if !current.is_empty() {
                buckets.push(std::mem::take(&mut current));
                current_size = 0;
            }
            buckets.push(vec![i]);
            continue;
        }
        if current_size + size > max_content_size && !current.is_empty() {
            buckets.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(i);
        current_size += size;
    }
    if !current.is_empty() {
        buckets.push(current);
    }

    for (archive_index, bucket) in buckets.iter().enumerate() {
        let mut offset = u64::from(CONTENT_HEADER_SIZE);
        for &i in bucket {
            assets[i].archive_index = archive_index as u32;
            assets[i].byte_offset = offset;
            offset += assets[i].size;
        }
    }
    buckets
}

fn build_sections(assets: &[PackAsset]) -> Vec<AssetTypeSection> {
    let mut sections: Vec<AssetTypeSection> = Vec::new();
    for (i, asset) in assets.iter().enumerate() {
        match sections.last_mut() {
            Some(section) if section.kind == asset.entry.kind => section.asset_count += 1,
            _ => sections.push(AssetTypeSection {
                kind: asset.entry.kind,
                first_asset_index: i as u32,
                asset_count: 1,
            }),
        }
    }
    sections
}

fn build_asset_infos(
    assets: &[PackAsset],
    section_count: usize,
    archive_count: usize,
) -> (Vec<AssetInfo>, Vec<u8>) {
    let string_table_pos =
        archive_writer::string_table_position(section_count, assets.len(), archive_count);

    let mut string_table: Vec<u8> = Vec::new();
    let mut interned: HashMap<String, (u32, u32)> = HashMap::new();
    let mut asset_infos = Vec::with_capacity(assets.len());
    for asset in assets {
        let name = asset.entry.source_path.to_string_lossy().into_owned();
        let (name_offset, name_len) = *interned.entry(name.clone()).or_insert_with(|| {
            let relative = string_table.len() as u64;
            string_table.extend_from_slice(name.as_bytes());
            ((string_table_pos + relative) as u32, name.len() as u32)
        });
        asset_infos.push(AssetInfo {
            id: asset.entry.id,
            name_offset,
            name_len,
            crc32: asset.crc32,
            archive_index: asset.archive_index,
            byte_offset: asset.byte_offset,
            byte_len: asset.size,
        });
    }
    (asset_infos, string_table)
}
