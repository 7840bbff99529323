//! Directory store integration tests: add, verify, audit, remove.


use futures::StreamExt;
use implstore::manifest::{Manifest, ManifestDigest, ManifestFormat, MANIFEST_FILE_NAME};
use implstore::storage::{DirectoryStore, Store};
use implstore::{StoreError, TaskHandle};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store_test_helpers::{
    digest_of, full_digest_of, hello_tree, write_file, StoreTestWorkspace, HELLO_SHA1NEW,
};

#[tokio::test]
async fn test_mismatch_leaves_empty_store_empty() {
    let workspace = StoreTestWorkspace::new();
    let source = workspace.scratch("pkg");
    write_file(&source, "file", b"BBB", 1000);
    let claimed: ManifestDigest = format!("sha256new={}", "a".repeat(64)).parse().unwrap();

    let error = workspace
        .store
        .add_directory(&source, &claimed, &TaskHandle::new())
        .await
        .unwrap_err();

    let detail = error.mismatch_detail().expect("digest mismatch");
    assert_eq!(detail.format, ManifestFormat::Sha256New);
    assert_eq!(detail.expected, "a".repeat(64));
    assert_eq!(
        detail.actual,
        digest_of(&source, ManifestFormat::Sha256New)
            .get(ManifestFormat::Sha256New)
            .unwrap()
    );
    assert!(workspace.root_names().is_empty());
    assert!(workspace.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hello_scenario() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

    workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();

    let listed = workspace.store.list_all().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].to_string(), HELLO_SHA1NEW);

    let path = workspace.store.get_path(&digest).await.unwrap();
    assert_eq!(path, workspace.store.root().join(HELLO_SHA1NEW));
    let regenerated =
        Manifest::generate(&path, ManifestFormat::Sha1New, &TaskHandle::new()).unwrap();
    assert_eq!(regenerated.digest().to_string(), HELLO_SHA1NEW);

    // The stored manifest is the one the digest was computed from
    let stored = Manifest::load(&path.join(MANIFEST_FILE_NAME), ManifestFormat::Sha1New).unwrap();
    assert_eq!(stored, regenerated);
}

#[tokio::test]
async fn test_every_format_is_checked() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));

    let mut digest = full_digest_of(&source);
    assert_eq!(digest.len(), 3);
    digest.insert(ManifestFormat::Sha1, "0".repeat(40)).unwrap();

    let error = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap_err();
    assert_eq!(error.mismatch_detail().unwrap().format, ManifestFormat::Sha1);
    assert!(workspace.root_names().is_empty());

    let digest = full_digest_of(&source);
    let path = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();
    // Committed under the best format only
    assert_eq!(path.file_name().unwrap().to_string_lossy(), digest.to_string());
    assert!(digest.to_string().starts_with("sha256new="));

    // Any format finds it
    let by_sha1: ManifestDigest = ManifestDigest::with(
        ManifestFormat::Sha1,
        digest.get(ManifestFormat::Sha1).unwrap(),
    );
    assert!(!workspace.store.contains(&by_sha1).await);
    let by_sha256: ManifestDigest = ManifestDigest::with(
        ManifestFormat::Sha256New,
        digest.get(ManifestFormat::Sha256New).unwrap(),
    );
    assert_eq!(workspace.store.get_path(&by_sha256).await.unwrap(), path);
}

#[cfg(unix)]
#[tokio::test]
async fn test_committed_entries_are_read_only() {
    use std::os::unix::fs::PermissionsExt;

    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

    let path = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();

    for name in ["hello.txt", MANIFEST_FILE_NAME] {
        let mode = fs::metadata(path.join(name)).unwrap().permissions().mode();
        assert_eq!(mode & 0o222, 0, "{} is writable", name);
    }
    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o222, 0);

    // The source is left alone
    let mode = fs::metadata(source.join("hello.txt")).unwrap().permissions().mode();
    assert_ne!(mode & 0o200, 0);

    // Removal copes with the write protection
    workspace.store.remove(&digest).await.unwrap();
    assert!(workspace.root_names().is_empty());
}

#[tokio::test]
async fn test_tampering_is_detected() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
    let path = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();

    implstore::utils::fs::make_writable_recursive(&path).unwrap();
    write_file(&path, "hello.txt", b"ho", 1234567890);

    let error = workspace
        .store
        .verify(&digest, &TaskHandle::new())
        .await
        .unwrap_err();
    let detail = error.mismatch_detail().unwrap();
    assert_eq!(detail.expected, HELLO_SHA1NEW.trim_start_matches("sha1new="));
    assert!(detail.expected_manifest.is_some());
    assert!(detail.actual_manifest.is_some());

    // Adding the genuine content again refuses to overwrite the damaged entry
    let error = workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::ImplementationAlreadyInStore { .. }));

    let problems: Vec<_> = workspace
        .store
        .audit(None, &TaskHandle::new())
        .expect("directory stores can audit")
        .collect()
        .await;
    assert_eq!(problems.len(), 1);
    let problem = problems.into_iter().next().unwrap().unwrap();
    assert_eq!(problem.digest.to_string(), HELLO_SHA1NEW);
    assert_eq!(problem.path.as_deref(), Some(path.as_path()));
    assert!(problem.expected.is_some() && problem.actual.is_some());
    assert_ne!(problem.expected, problem.actual);
}

#[tokio::test]
async fn test_audit_reports_missing_targets_and_continues() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
    workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();

    let missing: ManifestDigest = format!("sha1new={}", "1".repeat(40)).parse().unwrap();
    let problems: Vec<_> = workspace
        .store
        .audit(Some(vec![missing.clone(), digest]), &TaskHandle::new())
        .unwrap()
        .collect()
        .await;

    assert_eq!(problems.len(), 1);
    let problem = problems.into_iter().next().unwrap().unwrap();
    assert_eq!(problem.digest, missing);
    assert!(problem.path.is_none());
}

#[tokio::test]
async fn test_cancelled_audit_ends_with_error() {
    let workspace = StoreTestWorkspace::new();
    let handle = TaskHandle::new();
    handle.cancel();

    let results: Vec<_> = workspace.store.audit(None, &handle).unwrap().collect().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(StoreError::UserCanceled)));
}

#[tokio::test]
async fn test_remove_then_not_found() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();
    workspace
        .store
        .add_directory(&source, &digest, &TaskHandle::new())
        .await
        .unwrap();

    workspace.store.remove(&digest).await.unwrap();

    assert!(workspace.store.get_path(&digest).await.unwrap_err().is_not_found());
    assert!(workspace
        .store
        .verify(&digest, &TaskHandle::new())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(workspace.root_names().is_empty());
}

#[tokio::test]
async fn test_concurrent_adds_of_one_digest() {
    let workspace = StoreTestWorkspace::new();
    let source = hello_tree(&workspace.scratch("hello"));
    let digest: ManifestDigest = HELLO_SHA1NEW.parse().unwrap();

    // Two stores on one root behave like two processes
    let other = DirectoryStore::new(workspace.store.root()).unwrap();
    let first_handle = TaskHandle::new();
    let second_handle = TaskHandle::new();
    let (first, second) = tokio::join!(
        workspace.store.add_directory(&source, &digest, &first_handle),
        other.add_directory(&source, &digest, &second_handle),
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(workspace.root_names(), vec![HELLO_SHA1NEW.to_string()]);
}

#[tokio::test]
async fn test_progress_is_reported() {
    let workspace = StoreTestWorkspace::new();
    let source = workspace.scratch("big");
    write_file(&source, "blob", &vec![7u8; 256 * 1024], 1000);
    let digest = digest_of(&source, ManifestFormat::Sha256New);

    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let handle =
        TaskHandle::new().with_progress(move |update| sink.lock().unwrap().push(update.clone()));

    workspace
        .store
        .add_directory(&source, &digest, &handle)
        .await
        .unwrap();

    let updates = updates.lock().unwrap();
    assert!(!updates.is_empty());
    assert!(updates.iter().any(|update| update.processed == 256 * 1024));
}

#[tokio::test]
async fn test_open_purges_stale_stages() {
    let workspace = StoreTestWorkspace::new();
    let stale = workspace.store.root().join(".tmp-1-stale");
    fs::create_dir(&stale).unwrap();
    let old = std::time::SystemTime::now() - Duration::from_secs(72 * 3600);
    filetime::set_file_mtime(&stale, filetime::FileTime::from_system_time(old)).unwrap();

    let config = implstore::infrastructure::config::StoreConfig {
        cache_dir: workspace.store.root().to_path_buf(),
        ..Default::default()
    };
    let store = DirectoryStore::open(&config).unwrap();

    assert!(!stale.exists());
    assert!(store.list_all().await.unwrap().is_empty());
}
