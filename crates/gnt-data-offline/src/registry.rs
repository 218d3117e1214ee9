use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crossbeam_channel::{Receiver, Sender};
use gnt_data_runtime::{AssetId, AssetType};
use tracing::{error, info};

use crate::{is_stale, ImportError, ImporterRegistry, MetaFile, MetadataError};

/// One indexed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Stable identity of the asset.
    pub id: AssetId,
    /// Display name, the subasset name from the meta file.
    pub name: String,
    /// Source file the asset was imported from.
    pub source_path: PathBuf,
    /// Type of the compiled output.
    pub kind: AssetType,
}

/// Notification sent to the running asset manager after a successful
/// reimport, so already-loaded instances can be hot-swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Type of the reimported asset.
    pub kind: AssetType,
    /// Identity of the reimported asset.
    pub id: AssetId,
}

/// Status of one import job, purely observational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The import is in progress.
    Running,
    /// The import completed.
    Succeeded,
    /// The import failed with the contained reason.
    Failed(String),
}

struct Inner {
    entries: HashMap<AssetId, Entry>,
    by_path: HashMap<PathBuf, Vec<AssetId>>,
    orphaned: HashSet<AssetId>,
}

thread_local! {
    // source paths currently being imported on this thread's call stack
    static IMPORT_STACK: RefCell<Vec<PathBuf>> = RefCell::new(Vec::new());
}

struct ImportScope;

impl ImportScope {
    fn enter(source: &Path) -> Result<Self, ImportError> {
        IMPORT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|p| p == source) {
                return Err(ImportError::CircularDependency(source.to_owned()));
            }
            stack.push(source.to_owned());
            Ok(Self)
        })
    }
}

impl Drop for ImportScope {
    fn drop(&mut self) {
        IMPORT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The system of record for all known assets.
///
/// Maps every [`AssetId`] to its [`Entry`] and maintains the inverse
/// path-to-ids mapping for fast invalidation when a source file changes. An
/// explicitly constructed service object, passed by reference to importer
/// callbacks; tests run against an isolated instance.
///
/// The index lock is held only for the duration of index reads and writes,
/// never across an importer's file i/o. Meta-file access for a single source
/// path is serialized by a per-path lock; imports of different paths proceed
/// fully in parallel.
pub struct AssetRegistry {
    inner: RwLock<Inner>,
    importers: RwLock<ImporterRegistry>,
    compiled_assets_dir: PathBuf,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    tasks: Mutex<HashMap<PathBuf, TaskStatus>>,
    reload_subscribers: Mutex<Vec<Sender<ReloadEvent>>>,
}

impl AssetRegistry {
    /// Creates a registry writing compiled output under `compiled_assets_dir`.
    pub fn new(compiled_assets_dir: impl AsRef<Path>) -> Result<Self, ImportError> {
        let compiled_assets_dir = compiled_assets_dir.as_ref().to_owned();
        fs::create_dir_all(&compiled_assets_dir)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                by_path: HashMap::new(),
                orphaned: HashSet::new(),
            }),
            importers: RwLock::new(ImporterRegistry::default()),
            compiled_assets_dir,
            path_locks: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            reload_subscribers: Mutex::new(Vec::new()),
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("poisoned registry index lock")
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("poisoned registry index lock")
    }

    /// Registers an importer for a file extension.
    ///
    /// Last-registered wins; replacing an existing mapping is logged. This is
    /// what hot-swappable editor plugins call on load.
    pub fn register_importer<F>(
        &self,
        extension: &str,
        kind: AssetType,
        version: u32,
        import_fn: F,
    ) -> Result<(), ImportError>
    where
        F: Fn(&AssetRegistry, &Path, &Path) -> Result<(), ImportError> + Send + Sync + 'static,
    {
        self.importers
            .write()
            .expect("poisoned importer table lock")
            .register(extension, kind, version, Box::new(import_fn))
    }

    /// Imports a source file, returning the primary subasset's id.
    ///
    /// Resolves the importer by extension, runs the staleness gate and only
    /// invokes the importer when the recorded state is out of date. Importers
    /// that reference other assets re-enter here for their dependencies; a
    /// cyclic reference fails fast with
    /// [`ImportError::CircularDependency`] instead of recursing unboundedly.
    pub fn import(&self, path: &Path) -> Result<AssetId, ImportError> {
        let source = path.to_owned();
        if !source.is_file() {
            return Err(ImportError::InvalidSourcePath(source));
        }

        let importer = self
            .importers
            .read()
            .expect("poisoned importer table lock")
            .find(&source)?;

        let _scope = ImportScope::enter(&source)?;
        self.set_task(&source, TaskStatus::Running);

        // serialize meta-file read/modify/save per source path
        let path_lock = self.path_lock(&source);
        let _guard = path_lock.lock().expect("poisoned source path lock");

        let result = self.import_locked(&importer, &source);
        match &result {
            Ok(_) => self.set_task(&source, TaskStatus::Succeeded),
            Err(e) => {
                error!("import of '{}' failed: {}", source.display(), e);
                self.set_task(&source, TaskStatus::Failed(e.to_string()));
            }
        }
        result
    }

    fn import_locked(
        &self,
        importer: &crate::Importer,
        source: &Path,
    ) -> Result<AssetId, ImportError> {
        let meta = MetaFile::load_or_default(source)?;
        if !is_stale(importer, &meta, source, &self.compiled_assets_dir) {
            // fresh: refresh the index from the sidecar, invoke nothing
            self.index_metafile(source, &meta);
            return Ok(meta.primary().expect("non-empty fresh meta file").id);
        }

        info!("importing '{}'", source.display());
        (importer.import_fn)(self, &self.compiled_assets_dir, source)?;

        let meta = MetaFile::load_or_default(source)?;
        let primary = meta
            .primary()
            .ok_or_else(|| ImportError::NothingImported(source.to_owned()))?
            .id;
        self.index_metafile(source, &meta);

        for subasset in meta.subassets() {
            self.notify_reload(ReloadEvent {
                kind: subasset.kind,
                id: subasset.id,
            });
        }
        Ok(primary)
    }

    fn index_metafile(&self, source: &Path, meta: &MetaFile) {
        let mut inner = self.write_inner();
        let ids = inner.by_path.entry(source.to_owned()).or_default();
        *ids = meta.subassets().iter().map(|s| s.id).collect();
        for subasset in meta.subassets() {
            inner.entries.insert(
                subasset.id,
                Entry {
                    id: subasset.id,
                    name: subasset.name.clone(),
                    source_path: source.to_owned(),
                    kind: subasset.kind,
                },
            );
            inner.orphaned.remove(&subasset.id);
        }
    }

    fn path_lock(&self, source: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.path_locks.lock().expect("poisoned path lock table");
        locks
            .entry(source.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn set_task(&self, source: &Path, status: TaskStatus) {
        self.tasks
            .lock()
            .expect("poisoned task table lock")
            .insert(source.to_owned(), status);
    }

    /// Returns the status of the last import job of a source path.
    pub fn task_status(&self, source: &Path) -> Option<TaskStatus> {
        self.tasks
            .lock()
            .expect("poisoned task table lock")
            .get(source)
            .cloned()
    }

    /// Returns whether an id is known to the index. Never triggers an import.
    pub fn has_asset(&self, id: AssetId) -> bool {
        self.read_inner().entries.contains_key(&id)
    }

    /// Looks up the entry of an id. Never triggers an import.
    pub fn try_get_asset_data(&self, id: AssetId) -> Option<Entry> {
        self.read_inner().entries.get(&id).cloned()
    }

    /// Loads-or-creates the meta file of a source path.
    ///
    /// The importer's entry point for recording subasset identities.
    pub fn get_meta_file_by_path(&self, source: &Path) -> Result<MetaFile, MetadataError> {
        MetaFile::load_or_default(source)
    }

    /// Returns the compiled asset cache directory.
    ///
    /// Importers write their output directly under this path, one file per
    /// subasset named by the subasset's id text form.
    pub fn compiled_assets_path(&self) -> &Path {
        &self.compiled_assets_dir
    }

    /// Returns the cache file path of one compiled asset.
    pub fn compiled_asset_path(&self, id: AssetId) -> PathBuf {
        self.compiled_assets_dir.join(id.to_string())
    }

    /// Flags every asset of a deleted source path as orphaned.
    ///
    /// Entries remain addressable so runtime references already holding the
    /// ids stay valid; actual removal happens only in [`Self::compact`].
    /// Returns the number of flagged assets.
    pub fn mark_orphaned(&self, source: &Path) -> usize {
        let mut inner = self.write_inner();
        let ids = inner.by_path.get(source).cloned().unwrap_or_default();
        for id in &ids {
            inner.orphaned.insert(*id);
        }
        ids.len()
    }

    /// Removes every orphaned entry from the index.
    ///
    /// The explicit compaction pass; nothing is removed implicitly. Returns
    /// the removed entries.
    pub fn compact(&self) -> Vec<Entry> {
        let mut inner = self.write_inner();
        let orphaned = std::mem::take(&mut inner.orphaned);

        let mut removed = Vec::with_capacity(orphaned.len());
        for id in &orphaned {
            if let Some(entry) = inner.entries.remove(id) {
                removed.push(entry);
            }
        }
        inner.by_path.retain(|_, ids| {
            ids.retain(|id| !orphaned.contains(id));
            !ids.is_empty()
        });
        removed.sort_by(|a, b| a.id.cmp(&b.id));
        removed
    }

    /// Returns a snapshot of all non-orphaned entries.
    ///
    /// The packager's consistent view at the start of its collecting phase.
    pub fn entries(&self) -> Vec<Entry> {
        let inner = self.read_inner();
        inner
            .entries
            .values()
            .filter(|e| !inner.orphaned.contains(&e.id))
            .cloned()
            .collect()
    }

    /// Rebuilds the index by scanning a directory tree for meta files.
    ///
    /// A meta file whose source no longer exists has its assets flagged
    /// orphaned rather than dropped. Returns the number of meta files read.
    pub fn scan_metafiles(&self, dir: &Path) -> Result<usize, ImportError> {
        let mut count = 0;
        let mut pending = vec![dir.to_owned()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some(crate::METADATA_EXT) {
                    continue;
                }
                let source = match (path.parent(), path.file_stem()) {
                    (Some(parent), Some(stem)) => parent.join(stem),
                    _ => continue,
                };

                let meta = MetaFile::load_or_default(&source)?;
                self.index_metafile(&source, &meta);
                if !source.is_file() {
                    self.mark_orphaned(&source);
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// Subscribes to reload notifications.
    ///
    /// Fire-and-forget: a full or dropped receiver never stalls an import.
    pub fn subscribe_reloads(&self) -> Receiver<ReloadEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.reload_subscribers
            .lock()
            .expect("poisoned subscriber lock")
            .push(tx);
        rx
    }

    fn notify_reload(&self, event: ReloadEvent) {
        self.reload_subscribers
            .lock()
            .expect("poisoned subscriber lock")
            .retain(|tx| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Barrier,
        },
        time::Duration,
    };

    use gnt_data_runtime::AssetType;

    use super::AssetRegistry;
    use crate::{ImportError, MetaFile, TaskStatus};

    fn copying_importer(
        kind: AssetType,
        version: u32,
        invocations: Arc<AtomicUsize>,
    ) -> impl Fn(&AssetRegistry, &Path, &Path) -> Result<(), ImportError> {
        move |registry, cache_dir, source| {
            invocations.fetch_add(1, Ordering::SeqCst);
            let mut meta = registry.get_meta_file_by_path(source)?;
            let name = MetaFile::default_subasset_name(source);
            let id = meta.get_or_create_subasset(&name, kind)?;
            fs::write(cache_dir.join(id.to_string()), fs::read(source)?)?;
            meta.save(version)?;
            Ok(())
        }
    }

    fn registry(dir: &Path) -> AssetRegistry {
        AssetRegistry::new(dir.join("cache")).unwrap()
    }

    #[test]
    fn reimport_of_unchanged_source_invokes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rock.tex");
        fs::write(&source, b"pixels").unwrap();

        let registry = registry(dir.path());
        let invocations = Arc::new(AtomicUsize::new(0));
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, invocations.clone()),
            )
            .unwrap();

        let first = registry.import(&source).unwrap();
        let second = registry.import(&source).unwrap();
        assert_eq!(first, second);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(registry.task_status(&source), Some(TaskStatus::Succeeded));
    }

    #[test]
    fn version_bump_marks_exactly_that_importers_assets_stale() {
        let dir = tempfile::tempdir().unwrap();
        let texture = dir.path().join("rock.tex");
        let mesh = dir.path().join("rock.msh");
        fs::write(&texture, b"pixels").unwrap();
        fs::write(&mesh, b"triangles").unwrap();

        let registry = registry(dir.path());
        let tex_runs = Arc::new(AtomicUsize::new(0));
        let msh_runs = Arc::new(AtomicUsize::new(0));
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, tex_runs.clone()),
            )
            .unwrap();
        registry
            .register_importer(
                "msh",
                AssetType::Mesh3d,
                1,
                copying_importer(AssetType::Mesh3d, 1, msh_runs.clone()),
            )
            .unwrap();

        registry.import(&texture).unwrap();
        registry.import(&mesh).unwrap();

        // bump only the texture importer; last-registered wins
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                2,
                copying_importer(AssetType::Texture, 2, tex_runs.clone()),
            )
            .unwrap();

        registry.import(&texture).unwrap();
        registry.import(&mesh).unwrap();
        assert_eq!(tex_runs.load(Ordering::SeqCst), 2);
        assert_eq!(msh_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmapped_extension_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        fs::write(&source, b"...").unwrap();

        let registry = registry(dir.path());
        assert!(matches!(
            registry.import(&source),
            Err(ImportError::NoImporterForExtension(ext)) if ext == "txt"
        ));
    }

    #[test]
    fn lookups_never_trigger_an_import() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let invocations = Arc::new(AtomicUsize::new(0));
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, invocations.clone()),
            )
            .unwrap();

        let id = gnt_data_runtime::AssetId::create_random();
        assert!(!registry.has_asset(id));
        assert!(registry.try_get_asset_data(id).is_none());
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dependency_cycle_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let material = dir.path().join("rock.mat");
        let texture = dir.path().join("rock.ctex");
        fs::write(&material, b"mat").unwrap();
        fs::write(&texture, b"tex").unwrap();

        let registry = Arc::new(registry(dir.path()));
        let material_path = material.clone();
        let texture_path = texture.clone();

        // each importer resolves the other as a dependency
        registry
            .register_importer("mat", AssetType::Material, 1, move |reg, cache, source| {
                reg.import(&texture_path)?;
                let mut meta = reg.get_meta_file_by_path(source)?;
                let id = meta.get_or_create_subasset("rock", AssetType::Material)?;
                fs::write(cache.join(id.to_string()), b"compiled")?;
                meta.save(1)?;
                Ok(())
            })
            .unwrap();
        registry
            .register_importer("ctex", AssetType::Texture, 1, move |reg, _, _| {
                reg.import(&material_path)?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            registry.import(&material),
            Err(ImportError::CircularDependency(p)) if p == material
        ));
        assert!(matches!(
            registry.task_status(&material),
            Some(TaskStatus::Failed(_))
        ));
    }

    #[test]
    fn importer_failure_is_isolated_per_asset() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.tex");
        let good = dir.path().join("good.msh");
        fs::write(&bad, b"x").unwrap();
        fs::write(&good, b"y").unwrap();

        let registry = registry(dir.path());
        registry
            .register_importer("tex", AssetType::Texture, 1, |_, _, _| {
                Err(ImportError::ImporterFailed("decode error".into()))
            })
            .unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        registry
            .register_importer(
                "msh",
                AssetType::Mesh3d,
                1,
                copying_importer(AssetType::Mesh3d, 1, runs.clone()),
            )
            .unwrap();

        assert!(registry.import(&bad).is_err());
        // an unrelated asset still imports fine afterwards
        registry.import(&good).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn orphaning_defers_removal_to_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rock.tex");
        fs::write(&source, b"pixels").unwrap();

        let registry = registry(dir.path());
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, Arc::new(AtomicUsize::new(0))),
            )
            .unwrap();
        let id = registry.import(&source).unwrap();

        fs::remove_file(&source).unwrap();
        assert_eq!(registry.mark_orphaned(&source), 1);

        // still addressable, but excluded from the packaging snapshot
        assert!(registry.has_asset(id));
        assert!(registry.entries().is_empty());

        let removed = registry.compact();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, id);
        assert!(!registry.has_asset(id));
    }

    #[test]
    fn reload_notification_is_sent_on_reimport() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rock.tex");
        fs::write(&source, b"pixels").unwrap();

        let registry = registry(dir.path());
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, Arc::new(AtomicUsize::new(0))),
            )
            .unwrap();

        let events = registry.subscribe_reloads();
        let id = registry.import(&source).unwrap();

        let event = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.kind, AssetType::Texture);
    }

    #[test]
    fn scan_rebuilds_index_and_orphans_deleted_sources() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.tex");
        let deleted = dir.path().join("deleted.tex");
        fs::write(&kept, b"a").unwrap();
        fs::write(&deleted, b"b").unwrap();

        let (kept_id, deleted_id) = {
            let registry = registry(dir.path());
            registry
                .register_importer(
                    "tex",
                    AssetType::Texture,
                    1,
                    copying_importer(AssetType::Texture, 1, Arc::new(AtomicUsize::new(0))),
                )
                .unwrap();
            (
                registry.import(&kept).unwrap(),
                registry.import(&deleted).unwrap(),
            )
        };
        fs::remove_file(&deleted).unwrap();

        // a fresh registry rebuilt purely from sidecars
        let registry = registry(dir.path());
        assert_eq!(registry.scan_metafiles(dir.path()).unwrap(), 2);

        assert!(registry.has_asset(kept_id));
        assert!(registry.has_asset(deleted_id));
        let entries = registry.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, kept_id);
    }

    #[test]
    fn different_paths_import_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tex");
        let b = dir.path().join("b.tex");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let registry = Arc::new(registry(dir.path()));
        // both importers must be inside their bodies at the same time for the
        // barrier to release; a serialized run would deadlock the test
        let barrier = Arc::new(Barrier::new(2));
        let rendezvous = barrier.clone();
        registry
            .register_importer("tex", AssetType::Texture, 1, move |reg, cache, source| {
                rendezvous.wait();
                let mut meta = reg.get_meta_file_by_path(source)?;
                let name = MetaFile::default_subasset_name(source);
                let id = meta.get_or_create_subasset(&name, AssetType::Texture)?;
                fs::write(cache.join(id.to_string()), fs::read(source)?)?;
                meta.save(1)?;
                Ok(())
            })
            .unwrap();

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|source| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.import(&source))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }

    #[test]
    fn same_path_imports_serialize_without_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rock.tex");
        fs::write(&source, b"pixels").unwrap();

        let registry = Arc::new(registry(dir.path()));
        let invocations = Arc::new(AtomicUsize::new(0));
        registry
            .register_importer(
                "tex",
                AssetType::Texture,
                1,
                copying_importer(AssetType::Texture, 1, invocations.clone()),
            )
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let source = source.clone();
                std::thread::spawn(move || registry.import(&source))
            })
            .collect();
        let ids: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        // both orderings leave one identity and a parseable sidecar
        assert_eq!(ids[0], ids[1]);
        let meta = MetaFile::load_or_default(&source).unwrap();
        assert_eq!(meta.subassets().len(), 1);
        assert_eq!(meta.subassets()[0].id, ids[0]);
        assert!(invocations.load(Ordering::SeqCst) >= 1);
    }
}
