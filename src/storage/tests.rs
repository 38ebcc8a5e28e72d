use super::*;
use std::sync::Arc;

#[tokio::test]
async fn derived_objects_never_replace_the_original() -> anyhow::Result<()> {
    let store = MemoryEvidenceStore::new();
    let original = store.put(b"frame".to_vec()).await;

    let derived = store
        .put_derived(&original, DerivedKind::Redacted, b"frame".to_vec())
        .await?;

    assert_ne!(derived, original);
    assert!(derived.as_str().starts_with("redacted/"));
    assert_eq!(store.fetch(&original).await?, b"frame".to_vec());
    assert_eq!(store.len().await, 2);
    Ok(())
}

#[tokio::test]
async fn retry_rides_out_read_after_write_latency() -> anyhow::Result<()> {
    let store = Arc::new(MemoryEvidenceStore::new());
    let locator = store.put_with_latency(b"late".to_vec(), 2).await;

    let bytes = fetch_with_retry(&*store, &locator, 3, Duration::from_millis(1)).await?;

    assert_eq!(bytes, b"late".to_vec());
    assert_eq!(store.fetch_count(), 3);
    Ok(())
}

#[tokio::test]
async fn retry_gives_up_with_a_transient_error() -> anyhow::Result<()> {
    let store = MemoryEvidenceStore::new();
    let locator = store.put_with_latency(b"late".to_vec(), 10).await;

    let err = fetch_with_retry(&store, &locator, 2, Duration::from_millis(1))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(Error::from(err).is_transient());
    Ok(())
}

#[tokio::test]
async fn missing_blobs_are_not_retried() -> anyhow::Result<()> {
    let store = MemoryEvidenceStore::new();
    let err = fetch_with_retry(
        &store,
        &EvidenceLocator("sha256-missing".to_string()),
        5,
        Duration::from_millis(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, StoreError::NotFound(_)));
    assert_eq!(store.fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn filesystem_store_is_content_addressed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsEvidenceStore::new(dir.path()).await?;

    let first = store.put(b"jpeg bytes".to_vec()).await?;
    let second = store.put(b"jpeg bytes".to_vec()).await?;
    assert_eq!(first, second);
    assert_eq!(first, content_locator(b"jpeg bytes"));

    let derived = store
        .put_derived(&first, DerivedKind::Redacted, b"masked".to_vec())
        .await?;
    assert!(dir.path().join(derived.as_str()).exists());
    assert_eq!(store.fetch(&first).await?, b"jpeg bytes".to_vec());
    Ok(())
}

#[tokio::test]
async fn filesystem_store_treats_missing_files_as_not_yet_written() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FsEvidenceStore::new(dir.path()).await?;

    let err = store
        .fetch(&EvidenceLocator("sha256-abc".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotYetAvailable(_)));

    let err = store
        .fetch(&EvidenceLocator("../etc/passwd".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    Ok(())
}
