//! Filesystem store - one JSON file per checkpoint record.
//!
//! Layout mirrors the structured key scheme:
//! `{root}/{execution}/{stage}/{item}.json` for records and
//! `{root}/{execution}/results/{name}` for artifacts. Record writes go
//! through a uniquely named temp file hard-linked into place, so a crash
//! never leaves a half-written checkpoint behind and concurrent writers
//! of the same key resolve to one created record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::{DurableStore, KeyPrefix, ListPage, PageRequest, PutOutcome, StoreKey};
use crate::types::checkpoint::CheckpointRecord;

/// Filesystem-backed durable store.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &StoreKey) -> PathBuf {
        self.root
            .join(&key.execution_id)
            .join(key.stage.as_str())
            .join(format!("{}.json", key.item_id))
    }

    fn stage_dir(&self, prefix: &KeyPrefix) -> PathBuf {
        self.root.join(&prefix.execution_id).join(prefix.stage.as_str())
    }

    fn artifact_path(&self, execution_id: &str, name: &str) -> PathBuf {
        self.root.join(execution_id).join("results").join(name)
    }

    /// Write through a uniquely named temp file, then hard-link it into
    /// place. The link is the create-only step: it fails with
    /// `AlreadyExists` when another writer got there first.
    async fn create_exclusive(&self, path: &Path, bytes: &[u8]) -> StoreResult<PutOutcome> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        let linked = tokio::fs::hard_link(&tmp, path).await;
        tokio::fs::remove_file(&tmp).await.ok();
        match linked {
            Ok(()) => Ok(PutOutcome::Created),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(PutOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DurableStore for FsStore {
    async fn put(&self, key: &StoreKey, record: &CheckpointRecord) -> StoreResult<PutOutcome> {
        let path = self.record_path(key);
        // Fast path; losing the race past this check is fine, the link
        // below settles it.
        if tokio::fs::try_exists(&path).await? {
            return Ok(PutOutcome::AlreadyExists);
        }
        let bytes = serde_json::to_vec_pretty(record)?;
        self.create_exclusive(&path, &bytes).await
    }

    async fn get(&self, key: &StoreKey) -> StoreResult<Option<CheckpointRecord>> {
        let path = self.record_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &KeyPrefix, page: PageRequest) -> StoreResult<ListPage> {
        let dir = self.stage_dir(prefix);
        let size = page.size.max(1);

        let mut item_ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ListPage {
                    records: Vec::new(),
                    next_token: None,
                });
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(item_id) = name.strip_suffix(".json") {
                item_ids.push(item_id.to_string());
            }
        }
        item_ids.sort();

        let start = match &page.token {
            Some(token) => match item_ids.binary_search(token) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            },
            None => 0,
        };

        let slice_end = (start + size).min(item_ids.len());
        let mut records = Vec::with_capacity(slice_end.saturating_sub(start));
        for item_id in &item_ids[start..slice_end] {
            let key = StoreKey::new(prefix.execution_id.clone(), prefix.stage, item_id.clone());
            if let Some(record) = self.get(&key).await? {
                records.push(record);
            }
        }

        let next_token = if slice_end < item_ids.len() {
            item_ids.get(slice_end - 1).cloned()
        } else {
            None
        };

        Ok(ListPage {
            records,
            next_token,
        })
    }

    async fn put_artifact(
        &self,
        execution_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let path = self.artifact_path(execution_id, name);
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_artifact(&self, execution_id: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.artifact_path(execution_id, name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::item::{DiscoveredUrl, ProductRecord};
    use crate::types::stage::StageName;
    use chrono::Utc;

    fn checkpoint(item: &str) -> CheckpointRecord {
        let record = ProductRecord::new(DiscoveredUrl::new(
            format!("https://shop.example.com/p/{item}"),
            item,
            "https://shop.example.com",
        ));
        CheckpointRecord::succeeded("exec_1", StageName::Extraction, item, record, true, 1, Utc::now())
    }

    #[tokio::test]
    async fn roundtrips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let key = StoreKey::new("exec_1", StageName::Extraction, "item_a");

        assert!(store.get(&key).await.unwrap().is_none());
        assert_eq!(
            store.put(&key, &checkpoint("item_a")).await.unwrap(),
            PutOutcome::Created
        );
        assert_eq!(
            store.put(&key, &checkpoint("item_a")).await.unwrap(),
            PutOutcome::AlreadyExists
        );

        let fetched = store.get(&key).await.unwrap().unwrap();
        assert_eq!(fetched.item_id, "item_a");
        assert_eq!(fetched.stage, StageName::Extraction);
    }

    #[tokio::test]
    async fn concurrent_puts_of_one_key_create_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FsStore::new(dir.path()));

        for i in 0..20 {
            let item = format!("item_{i}");
            let key = StoreKey::new("exec_1", StageName::Extraction, &item);
            let record = checkpoint(&item);

            let racers: Vec<_> = (0..2)
                .map(|_| {
                    let store = store.clone();
                    let key = key.clone();
                    let record = record.clone();
                    tokio::spawn(async move { store.put(&key, &record).await })
                })
                .collect();

            let mut created = 0;
            for racer in racers {
                // Both writers must resolve cleanly: one creates, the
                // other observes the existing record.
                match racer.await.unwrap().unwrap() {
                    PutOutcome::Created => created += 1,
                    PutOutcome::AlreadyExists => {}
                }
            }
            assert_eq!(created, 1, "key {item}");
            assert!(store.get(&key).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn lists_across_pages_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        for i in 0..5 {
            let item = format!("item_{i}");
            let key = StoreKey::new("exec_1", StageName::Extraction, &item);
            store.put(&key, &checkpoint(&item)).await.unwrap();
        }

        let prefix = KeyPrefix::new("exec_1", StageName::Extraction);
        let first = store.list(&prefix, PageRequest::first(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let token = first.next_token.clone().unwrap();

        let second = store
            .list(&prefix, PageRequest::after(token, 2))
            .await
            .unwrap();
        assert_eq!(second.records.len(), 2);
        let token = second.next_token.clone().unwrap();

        let third = store
            .list(&prefix, PageRequest::after(token, 2))
            .await
            .unwrap();
        assert_eq!(third.records.len(), 1);
        assert!(third.next_token.is_none());

        let mut ids: Vec<String> = first
            .records
            .into_iter()
            .chain(second.records)
            .chain(third.records)
            .map(|r| r.item_id)
            .collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids.len(), 5);
        ids.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn listing_missing_stage_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let page = store
            .list(
                &KeyPrefix::new("exec_none", StageName::Indexing),
                PageRequest::first(10),
            )
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn artifacts_roundtrip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store
            .put_artifact("exec_1", "report.json", b"{\"v\":1}")
            .await
            .unwrap();
        store
            .put_artifact("exec_1", "report.json", b"{\"v\":2}")
            .await
            .unwrap();
        let bytes = store.get_artifact("exec_1", "report.json").await.unwrap();
        assert_eq!(bytes, Some(b"{\"v\":2}".to_vec()));
    }
}
