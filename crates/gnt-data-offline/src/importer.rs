use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use gnt_data_runtime::AssetType;
use thiserror::Error;
use tracing::warn;

use crate::{AssetRegistry, MetaFile, MetadataError};

/// Error returned by importer registration and dispatch.
#[derive(Error, Debug)]
pub enum ImportError {
    /// No importer is registered for the source's extension.
    ///
    /// Recoverable: a batch caller may treat it as fatal, a directory watcher
    /// may skip the file.
    #[error("no importer registered for extension '{0}'")]
    NoImporterForExtension(String),
    /// An importer was registered with `AssetType::Undefined`.
    ///
    /// Programmer error, fatal to that registration only.
    #[error("'Undefined' is not a valid asset type for an importer")]
    InvalidAssetType,
    /// The import re-entered a source already being imported on this call
    /// stack.
    #[error("circular dependency while importing '{0}'")]
    CircularDependency(PathBuf),
    /// The source path does not exist or is not readable.
    #[error("invalid source path '{0}'")]
    InvalidSourcePath(PathBuf),
    /// The importer reported success without recording any subasset.
    #[error("import of '{0}' produced no subassets")]
    NothingImported(PathBuf),
    /// The importer body failed.
    #[error("importer failed: {0}")]
    ImporterFailed(String),
    /// Meta-file error during the import pass.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// IO error during the import pass.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Import callback of one registered importer.
///
/// Receives the registry (for dependency imports), the compiled-cache
/// directory and the source path. On success it must have written one cache
/// file per subasset, named by the subasset's id text form, and saved the
/// source's [`MetaFile`] with its own version.
pub type ImportFn =
    dyn Fn(&AssetRegistry, &Path, &Path) -> Result<(), ImportError> + Send + Sync;

/// A registered importer: an extension, a version and an import closure.
///
/// No inheritance hierarchy; hot-swappable editor plugins register plain
/// closures.
pub struct Importer {
    /// Type of the importer's primary output.
    pub kind: AssetType,
    /// Importer release version, monotonically increasing. Bumping it marks
    /// every asset produced by this importer stale.
    pub version: u32,
    pub(crate) import_fn: Box<ImportFn>,
}

/// Table mapping file extensions to importers.
#[derive(Default)]
pub struct ImporterRegistry {
    table: HashMap<String, Arc<Importer>>,
}

impl ImporterRegistry {
    /// Associates a file extension with exactly one importer.
    ///
    /// Re-registering the same extension replaces the prior mapping
    /// (last-registered wins) and logs a warning.
    pub fn register(
        &mut self,
        extension: &str,
        kind: AssetType,
        version: u32,
        import_fn: Box<ImportFn>,
    ) -> Result<(), ImportError> {
        if kind == AssetType::Undefined {
            return Err(ImportError::InvalidAssetType);
        }

        let extension = extension.trim_start_matches('.').to_lowercase();
        let importer = Arc::new(Importer {
            kind,
            version,
            import_fn,
        });
        if let Some(previous) = self.table.insert(extension.clone(), importer) {
            warn!(
                "importer for extension '{}' replaced (was version {})",
                extension, previous.version
            );
        }
        Ok(())
    }

    /// Resolves the importer mapped to a source path's extension.
    pub fn find(&self, source: &Path) -> Result<Arc<Importer>, ImportError> {
        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.table
            .get(&extension)
            .cloned()
            .ok_or(ImportError::NoImporterForExtension(extension))
    }
}

/// Returns whether `source` must be re-imported.
///
/// An asset is stale when the recorded importer version differs from the
/// current one, or any of its compiled cache entries is missing or older than
/// the source file. Fresh assets are skipped entirely, which is the
/// idempotence contract for incremental builds.
pub fn is_stale(
    importer: &Importer,
    meta: &MetaFile,
    source: &Path,
    cache_dir: &Path,
) -> bool {
    if meta.subassets().is_empty() {
        return true;
    }
    if meta.importer_version() != importer.version {
        return true;
    }

    let source_mtime = match fs::metadata(source).and_then(|m| m.modified()) {
        Ok(mtime) => mtime,
        Err(_) => return true,
    };
    for subasset in meta.subassets() {
        let compiled = cache_dir.join(subasset.id.to_string());
        match fs::metadata(&compiled).and_then(|m| m.modified()) {
            Ok(mtime) if mtime >= source_mtime => {}
            _ => return true,
        }
    }
    false
}
