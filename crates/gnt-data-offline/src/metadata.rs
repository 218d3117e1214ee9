use std::{
    ffi::OsString,
    fs,
    io,
    path::{Path, PathBuf},
};

use gnt_data_runtime::{AssetId, AssetType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Extension appended to a source path to form its sidecar path.
pub const METADATA_EXT: &str = "meta";

/// Error returned by meta-file operations.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// `Undefined` is never a valid import target.
    #[error("'Undefined' is not a valid asset type for a subasset")]
    InvalidAssetType,
    /// IO error on the sidecar file.
    #[error("io on '{0}' failed with {1}")]
    Io(PathBuf, #[source] io::Error),
    /// Sidecar serialization error.
    #[error("serialization of '{0}' failed with {1}")]
    Serialization(PathBuf, #[source] serde_json::Error),
}

/// One logically distinct output of a source file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubAsset {
    /// Human-readable name, unique within the meta file.
    pub name: String,
    /// Stable identity, assigned on first import.
    pub id: AssetId,
    /// Type of the compiled output.
    pub kind: AssetType,
}

/// Sidecar record of one source asset path.
///
/// Stored adjacent to the source file as pretty-printed JSON
/// (`rock.png` -> `rock.png.meta`) so it stays human-diffable. The subasset
/// list preserves first-import order; within one meta file subasset names are
/// unique and every [`AssetId`] appears exactly once.
///
/// Mutated only by the owning importer during an import pass, created lazily
/// on first import.
#[derive(Serialize, Deserialize, Debug)]
pub struct MetaFile {
    importer_version: u32,
    subassets: Vec<SubAsset>,
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
}

impl MetaFile {
    /// Returns the sidecar path of a source file.
    pub fn metadata_path(source: &Path) -> PathBuf {
        let mut name = OsString::from(source.as_os_str());
        name.push(".");
        name.push(METADATA_EXT);
        PathBuf::from(name)
    }

    /// Returns the implicit subasset name of a source with no explicit one.
    pub fn default_subasset_name(source: &Path) -> String {
        source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Loads the sidecar of `source`, or creates an empty one in memory.
    ///
    /// A missing sidecar is the lazy-creation case. A corrupt sidecar is
    /// logged and replaced; its identities regenerate on this import pass.
    pub fn load_or_default(source: &Path) -> Result<Self, MetadataError> {
        let path = Self::metadata_path(source);
        let empty = |path: PathBuf| Self {
            importer_version: 0,
            subassets: Vec::new(),
            path,
            dirty: false,
        };

        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Self>(&text) {
                Ok(mut meta) => {
                    meta.path = path;
                    meta.dirty = false;
                    Ok(meta)
                }
                Err(error) => {
                    warn!(
                        "corrupt meta file '{}' ({}), rebuilding",
                        path.display(),
                        error
                    );
                    Ok(empty(path))
                }
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(empty(path)),
            Err(error) => Err(MetadataError::Io(path, error)),
        }
    }

    /// Returns the id mapped to `name`, creating and recording a new one on
    /// first use.
    ///
    /// Every subsequent call with the same name returns the same id, which is
    /// what keeps identities stable across reimports.
    pub fn get_or_create_subasset(
        &mut self,
        name: &str,
        kind: AssetType,
    ) -> Result<AssetId, MetadataError> {
        if kind == AssetType::Undefined {
            return Err(MetadataError::InvalidAssetType);
        }
        if let Some(existing) = self.subassets.iter().find(|s| s.name == name) {
            return Ok(existing.id);
        }

        let id = AssetId::create_random();
        self.subassets.push(SubAsset {
            name: name.to_owned(),
            id,
            kind,
        });
        self.dirty = true;
        Ok(id)
    }

    /// Finds a subasset by name.
    pub fn find_subasset(&self, name: &str) -> Option<&SubAsset> {
        self.subassets.iter().find(|s| s.name == name)
    }

    /// Returns the primary subasset - the first ever imported.
    pub fn primary(&self) -> Option<&SubAsset> {
        self.subassets.first()
    }

    /// Returns all subassets in first-import order.
    pub fn subassets(&self) -> &[SubAsset] {
        &self.subassets
    }

    /// Returns the importer version last applied to the source.
    pub fn importer_version(&self) -> u32 {
        self.importer_version
    }

    /// Returns whether unsaved subassets were added since the load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persists the mapping and the supplied importer version.
    ///
    /// Writes to a temporary sibling first, then renames over the sidecar, so
    /// a crash never leaves a truncated file behind.
    pub fn save(&mut self, importer_version: u32) -> Result<(), MetadataError> {
        self.importer_version = importer_version;

        let mut tmp = OsString::from(self.path.as_os_str());
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let text = serde_json::to_string_pretty(self)
            .map_err(|e| MetadataError::Serialization(self.path.clone(), e))?;
        fs::write(&tmp, text).map_err(|e| MetadataError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| MetadataError::Io(self.path.clone(), e))?;

        self.dirty = false;
        Ok(())
    }
}
