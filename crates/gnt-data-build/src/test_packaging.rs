use std::{
    fs,
    fs::File,
    path::{Path, PathBuf},
};

use gnt_data_offline::{AssetRegistry, ImportError, MetaFile};
use gnt_data_runtime::{ArchiveDirectory, ArchiveError, ArchiveReader, AssetType};

use crate::{Error, PackagingOptions, PackagingState};

fn copying_importer(
    kind: AssetType,
) -> impl Fn(&AssetRegistry, &Path, &Path) -> Result<(), ImportError> {
    move |registry, cache_dir, source| {
        let mut meta = registry.get_meta_file_by_path(source)?;
        let name = MetaFile::default_subasset_name(source);
        let id = meta.get_or_create_subasset(&name, kind)?;
        fs::write(cache_dir.join(id.to_string()), fs::read(source)?)?;
        meta.save(1)?;
        Ok(())
    }
}

fn test_registry(root: &Path) -> AssetRegistry {
    let registry = AssetRegistry::new(root.join("cache")).expect("cache dir");
    registry
        .register_importer("tex", AssetType::Texture, 1, copying_importer(AssetType::Texture))
        .unwrap();
    registry
        .register_importer("msh", AssetType::Mesh3d, 1, copying_importer(AssetType::Mesh3d))
        .unwrap();
    registry
}

fn write_source(root: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn lookup_scans_only_matching_section_and_crc_round_trips() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let texture = write_source(root.path(), "a.tex", &[0xAAu8; 100]);
    let mesh = write_source(root.path(), "b.msh", &[0xBBu8; 4096]);
    registry.import(&texture).unwrap();
    let mesh_id = registry.import(&mesh).unwrap();

    let mut packager = PackagingOptions::new(root.path().join("out")).create();
    let output = packager.run(&registry).unwrap();
    assert_eq!(*packager.state(), PackagingState::Done);
    assert_eq!(output.asset_count, 2);

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();

    // mesh is found through the Mesh3d section alone
    let info = directory.find(AssetType::Mesh3d, mesh_id).unwrap();
    assert!(directory.find(AssetType::Texture, mesh_id).is_none());
    assert_eq!(info.byte_len, 4096);
    assert_eq!(
        directory.asset_name(info),
        Some(mesh.to_string_lossy().as_ref())
    );

    // the byte range the directory reports recomputes to the stored crc
    let content = File::open(&output.content_files[info.archive_index as usize]).unwrap();
    let mut reader = ArchiveReader::new(content).unwrap();
    reader.verify_checksum().unwrap();
    assert_eq!(reader.read_asset(info).unwrap(), vec![0xBBu8; 4096]);
}

#[test]
fn rerun_is_byte_identical() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    for (name, size) in [("a.tex", 100usize), ("b.tex", 321), ("c.msh", 4096)] {
        let source = write_source(root.path(), name, &vec![0x5Au8; size]);
        registry.import(&source).unwrap();
    }

    let run = |out: &str| {
        let mut packager = PackagingOptions::new(root.path().join(out))
            .build_code(42)
            .create();
        packager.run(&registry).unwrap()
    };
    let first = run("out1");
    let second = run("out2");

    assert_eq!(
        fs::read(&first.directory_file).unwrap(),
        fs::read(&second.directory_file).unwrap()
    );
    assert_eq!(first.content_files.len(), second.content_files.len());
    for (a, b) in first.content_files.iter().zip(&second.content_files) {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}

#[test]
fn missing_compiled_asset_fails_the_run() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let source = write_source(root.path(), "a.tex", b"pixels");
    let id = registry.import(&source).unwrap();
    fs::remove_file(registry.compiled_asset_path(id)).unwrap();

    let out_dir = root.path().join("out");
    let mut packager = PackagingOptions::new(&out_dir).create();
    match packager.run(&registry) {
        Err(Error::MissingCompiledAsset { id: missing, .. }) => assert_eq!(missing, id),
        other => panic!("expected missing compiled asset, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(packager.state(), PackagingState::Failed(_)));

    // no partial archive is published
    assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
}

#[test]
fn oversized_assets_get_dedicated_content_files() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let big = write_source(root.path(), "big.msh", &vec![1u8; 2000]);
    let small_a = write_source(root.path(), "a.tex", &vec![2u8; 300]);
    let small_b = write_source(root.path(), "b.tex", &vec![3u8; 300]);
    let big_id = registry.import(&big).unwrap();
    registry.import(&small_a).unwrap();
    registry.import(&small_b).unwrap();

    let mut packager = PackagingOptions::new(root.path().join("out"))
        .max_content_size(1024)
        .create();
    let output = packager.run(&registry).unwrap();
    assert_eq!(output.content_files.len(), 2);

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();
    assert_eq!(directory.archives().len(), 2);

    let info = directory.find(AssetType::Mesh3d, big_id).unwrap();
    let mut reader =
        ArchiveReader::new(File::open(&output.content_files[info.archive_index as usize]).unwrap())
            .unwrap();
    assert_eq!(reader.header().content_size, 2000);
    assert_eq!(reader.read_asset(info).unwrap(), vec![1u8; 2000]);
}

#[test]
fn orphaned_assets_disappear_from_the_next_run() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let kept = write_source(root.path(), "kept.tex", b"keep");
    let dropped = write_source(root.path(), "dropped.tex", b"drop");
    let kept_id = registry.import(&kept).unwrap();
    let dropped_id = registry.import(&dropped).unwrap();

    fs::remove_file(&dropped).unwrap();
    registry.mark_orphaned(&dropped);
    registry.compact();

    let mut packager = PackagingOptions::new(root.path().join("out")).create();
    let output = packager.run(&registry).unwrap();
    assert_eq!(output.asset_count, 1);

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();
    assert!(directory.find(AssetType::Texture, kept_id).is_some());
    assert!(directory.find(AssetType::Texture, dropped_id).is_none());
}

#[test]
fn verification_catches_a_corrupted_write() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let source = write_source(root.path(), "a.tex", &[0xCDu8; 512]);
    let id = registry.import(&source).unwrap();

    let mut packager = PackagingOptions::new(root.path().join("out")).create();
    let output = packager.run(&registry).unwrap();

    // flip one payload byte behind the packager's back
    let content_path = &output.content_files[0];
    let mut bytes = fs::read(content_path).unwrap();
    let index = bytes.len() - 10;
    bytes[index] ^= 0xFF;
    fs::write(content_path, bytes).unwrap();

    let mut reader = ArchiveReader::new(File::open(content_path).unwrap()).unwrap();
    assert!(matches!(
        reader.verify_checksum(),
        Err(ArchiveError::BodyCrcMismatch { .. })
    ));

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();
    let info = directory.find(AssetType::Texture, id).unwrap();
    assert!(matches!(
        reader.read_asset(info),
        Err(ArchiveError::CrcMismatch { id: bad, .. }) if bad == id
    ));
}

#[test]
fn importer_version_bump_keeps_identities() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let source = write_source(root.path(), "a.tex", b"pixels");
    let id = registry.import(&source).unwrap();

    // a new importer release re-registers under the same extension
    registry
        .register_importer("tex", AssetType::Texture, 2, copying_importer(AssetType::Texture))
        .unwrap();
    let reimported = registry.import(&source).unwrap();
    assert_eq!(reimported, id);

    let mut packager = PackagingOptions::new(root.path().join("out")).create();
    let output = packager.run(&registry).unwrap();
    assert_eq!(output.asset_count, 1);
}

#[test]
fn stable_ids_survive_packaging_twice_with_edits() {
    let root = tempfile::tempdir().unwrap();
    let registry = test_registry(root.path());

    let source = write_source(root.path(), "a.tex", b"v1");
    let id = registry.import(&source).unwrap();
    let mut packager = PackagingOptions::new(root.path().join("out1")).create();
    packager.run(&registry).unwrap();

    // edit the source, reimport, repackage: same identity, new payload
    fs::write(&source, b"v2-longer").unwrap();
    filetime_touch(&source);
    assert_eq!(registry.import(&source).unwrap(), id);

    let mut packager = PackagingOptions::new(root.path().join("out2")).create();
    let output = packager.run(&registry).unwrap();

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();
    let info = directory.find(AssetType::Texture, id).unwrap();
    let mut reader =
        ArchiveReader::new(File::open(&output.content_files[info.archive_index as usize]).unwrap())
            .unwrap();
    assert_eq!(reader.read_asset(info).unwrap(), b"v2-longer");
}

// pushes a source file's mtime past its compiled cache entry
fn filetime_touch(path: &Path) {
    let now = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    let _ = file.set_modified(now);
}

#[test]
fn empty_registry_packages_an_empty_archive() {
    let root = tempfile::tempdir().unwrap();
    let registry = AssetRegistry::new(root.path().join("cache")).unwrap();

    let mut packager = PackagingOptions::new(root.path().join("out")).create();
    let output = packager.run(&registry).unwrap();
    assert_eq!(output.asset_count, 0);
    assert!(output.content_files.is_empty());

    let mut directory_file = File::open(&output.directory_file).unwrap();
    let directory = ArchiveDirectory::read(&mut directory_file).unwrap();
    assert!(directory.sections().is_empty());
    assert!(directory.assets().is_empty());
}
