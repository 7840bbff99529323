//! Hard-link deduplication across store entries.


use implstore::infrastructure::config::StoreConfig;
use implstore::manifest::{ManifestDigest, ManifestFormat};
use implstore::storage::{DirectoryStore, Store};
use implstore::TaskHandle;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use store_test_helpers::{digest_of, write_file, StoreTestWorkspace};

const SHARED: &[u8] = b"shared library contents";

async fn add_tree(
    workspace: &StoreTestWorkspace,
    name: &str,
    files: &[(&str, &[u8], i64)],
    format: ManifestFormat,
) -> (ManifestDigest, PathBuf) {
    let source = workspace.scratch(name);
    for (relative, content, mtime) in files {
        write_file(&source, relative, content, *mtime);
    }
    let digest = digest_of(&source, format);
    let path = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();
    (digest, path)
}

#[cfg(unix)]
fn inode(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).unwrap().ino()
}

#[cfg(unix)]
#[tokio::test]
async fn test_optimise_links_identical_files_once() {
    let workspace = StoreTestWorkspace::new();
    let (first, first_path) = add_tree(
        &workspace,
        "a",
        &[("lib/shared.so", SHARED, 1000), ("a.txt", b"a", 1000)],
        ManifestFormat::Sha256New,
    )
    .await;
    let (second, second_path) = add_tree(
        &workspace,
        "b",
        &[("shared.so", SHARED, 1000), ("b.txt", b"b", 1000)],
        ManifestFormat::Sha256New,
    )
    .await;
    assert_ne!(
        inode(&first_path.join("lib/shared.so")),
        inode(&second_path.join("shared.so"))
    );

    let saved = workspace.store.optimise(&TaskHandle::new()).await.unwrap();

    assert_eq!(saved, SHARED.len() as u64);
    assert_eq!(
        inode(&first_path.join("lib/shared.so")),
        inode(&second_path.join("shared.so"))
    );
    // Linking must not change what the entries hash to
    workspace.store.verify(&first, &TaskHandle::new()).await.unwrap();
    workspace.store.verify(&second, &TaskHandle::new()).await.unwrap();

    assert_eq!(workspace.store.optimise(&TaskHandle::new()).await.unwrap(), 0);
    let mut expected = vec![first.to_string(), second.to_string()];
    expected.sort();
    assert_eq!(workspace.root_names(), expected);
}

#[cfg(unix)]
#[tokio::test]
async fn test_interrupted_link_leaves_entries_intact() {
    let workspace = StoreTestWorkspace::new();
    let (digest, path) = add_tree(
        &workspace,
        "a",
        &[("shared.so", SHARED, 1000)],
        ManifestFormat::Sha1New,
    )
    .await;

    // What a crash between linking and renaming leaves behind
    let orphan = workspace.store.root().join(".tmp-999-orphan");
    std::fs::create_dir(&orphan).unwrap();
    std::fs::hard_link(path.join("shared.so"), orphan.join("link-0")).unwrap();
    let old = SystemTime::now() - Duration::from_secs(72 * 3600);
    filetime::set_file_mtime(&orphan, filetime::FileTime::from_system_time(old)).unwrap();

    workspace.store.verify(&digest, &TaskHandle::new()).await.unwrap();

    let config = StoreConfig {
        cache_dir: workspace.store.root().to_path_buf(),
        ..Default::default()
    };
    let store = DirectoryStore::open(&config).unwrap();
    assert!(!orphan.exists());
    assert_eq!(workspace.root_names(), vec![digest.to_string()]);
    store.verify(&digest, &TaskHandle::new()).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_optimise_keeps_files_with_different_mtimes_apart() {
    let workspace = StoreTestWorkspace::new();
    let (_, first_path) = add_tree(
        &workspace,
        "a",
        &[("shared.so", SHARED, 1000)],
        ManifestFormat::Sha1New,
    )
    .await;
    let (_, second_path) = add_tree(
        &workspace,
        "b",
        &[("shared.so", SHARED, 2000), ("extra", b"x", 2000)],
        ManifestFormat::Sha1New,
    )
    .await;

    let saved = workspace.store.optimise(&TaskHandle::new()).await.unwrap();

    assert_eq!(saved, 0);
    assert_ne!(
        inode(&first_path.join("shared.so")),
        inode(&second_path.join("shared.so"))
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_optimise_handles_old_layout_entries() {
    let workspace = StoreTestWorkspace::new();
    let (old, old_path) = add_tree(
        &workspace,
        "old",
        &[("sub/shared.so", SHARED, 1000)],
        ManifestFormat::Sha1,
    )
    .await;
    let (_, new_path) = add_tree(
        &workspace,
        "new",
        &[("shared.so", SHARED, 1000), ("other", b"o", 1000)],
        ManifestFormat::Sha1New,
    )
    .await;

    let saved = workspace.store.optimise(&TaskHandle::new()).await.unwrap();

    assert_eq!(saved, SHARED.len() as u64);
    assert_eq!(inode(&old_path.join("sub/shared.so")), inode(&new_path.join("shared.so")));
    // Directory mtimes are part of sha1 digests and must survive the relink
    workspace.store.verify(&old, &TaskHandle::new()).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_optimise_only_links_within_one_hash_algorithm() {
    let workspace = StoreTestWorkspace::new();
    add_tree(&workspace, "a", &[("shared.so", SHARED, 1000)], ManifestFormat::Sha1New).await;
    add_tree(&workspace, "b", &[("shared.so", SHARED, 1000)], ManifestFormat::Sha256New).await;

    assert_eq!(workspace.store.optimise(&TaskHandle::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_optimise_empty_store() {
    let workspace = StoreTestWorkspace::new();
    assert_eq!(workspace.store.optimise(&TaskHandle::new()).await.unwrap(), 0);
}
