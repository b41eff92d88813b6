//! JSON file storage implementation.
//!
//! Keeps one JSON document per entity family under a root directory
//! (`offers.json`, `processes.json`). Every write replaces the whole document
//! through a temp file and a rename, so a reader sees either the previous
//! document or the new one and a failed batch leaves the old document intact.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lapse_core::{Family, Schedulable};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::memory::Table;
use super::trait_::{ensure_terminal, CandidateFilter, EntityStore, Result};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    offers: Mutex<()>,
    processes: Mutex<()>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            offers: Mutex::new(()),
            processes: Mutex::new(()),
        })
    }

    fn family_path(&self, family: Family) -> PathBuf {
        match family {
            Family::Offer => self.root.join("offers.json"),
            Family::Process => self.root.join("processes.json"),
        }
    }

    /// Serializes writers of one family within this process.
    fn writer_lock(&self, family: Family) -> &Mutex<()> {
        match family {
            Family::Offer => &self.offers,
            Family::Process => &self.processes,
        }
    }

    async fn read_table<E: Schedulable>(&self) -> Result<Table<E>> {
        let rows: Vec<E> = read_json(&self.family_path(E::FAMILY))
            .await?
            .unwrap_or_default();
        Ok(Table::from_rows(rows))
    }

    async fn write_table<E: Schedulable>(&self, table: Table<E>) -> Result<()> {
        let path = self.family_path(E::FAMILY);
        let json = serde_json::to_string_pretty(&table.into_rows())?;
        write_atomic(&path, json.as_bytes()).await
    }
}

#[async_trait]
impl<E: Schedulable> EntityStore<E> for JsonStorage {
    async fn find_candidates(&self, filter: &CandidateFilter<E::Status>) -> Result<Vec<E>> {
        Ok(self.read_table::<E>().await?.candidates(filter))
    }

    async fn apply_transition(&self, ids: &HashSet<E::Id>, new_status: E::Status) -> Result<u64> {
        ensure_terminal::<E>(new_status)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let _writer = self.writer_lock(E::FAMILY).lock().await;
        let mut table = self.read_table::<E>().await?;
        let moved = table.transition(ids, new_status, chrono::Utc::now());
        if moved > 0 {
            self.write_table(table).await?;
        }
        debug!(family = %E::FAMILY, requested = ids.len(), moved, "applied transition");
        Ok(moved)
    }

    async fn insert(&self, entity: &E) -> Result<()> {
        let _writer = self.writer_lock(E::FAMILY).lock().await;
        let mut table = self.read_table::<E>().await?;
        table.insert(entity.clone())?;
        self.write_table(table).await
    }

    async fn load(&self, id: E::Id) -> Result<Option<E>> {
        Ok(self.read_table::<E>().await?.get(&id))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use lapse_core::{Offer, OfferStatus, Process, ProcessStatus, Time};

    fn noon() -> Time {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn families_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let offer = Offer::new(noon());
        let process = Process::new(noon(), 10);

        {
            let storage = JsonStorage::new(dir.path()).await.unwrap();
            storage.insert(&offer).await.unwrap();
            storage.insert(&process).await.unwrap();
        }

        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let loaded = EntityStore::<Offer>::load(&storage, offer.id).await.unwrap().unwrap();
        assert_eq!(loaded.deadline, noon());
        let loaded = EntityStore::<Process>::load(&storage, process.id).await.unwrap().unwrap();
        assert_eq!(loaded.duration_minutes, 10);

        assert!(dir.path().join("offers.json").exists());
        assert!(dir.path().join("processes.json").exists());
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let found = EntityStore::<Offer>::find_candidates(&storage, &CandidateFilter::live_until(noon()))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn transition_rewrites_document() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let due = Process::new(noon() - Duration::hours(2), 30);
        let later = Process::new(noon() + Duration::hours(2), 30);
        storage.insert(&due).await.unwrap();
        storage.insert(&later).await.unwrap();

        let ids = HashSet::from([due.id]);
        let moved = EntityStore::<Process>::apply_transition(&storage, &ids, ProcessStatus::Finished)
            .await
            .unwrap();
        assert_eq!(moved, 1);

        let reopened = JsonStorage::new(dir.path()).await.unwrap();
        let due = EntityStore::<Process>::load(&reopened, due.id).await.unwrap().unwrap();
        let later = EntityStore::<Process>::load(&reopened, later.id).await.unwrap().unwrap();
        assert_eq!(due.status, ProcessStatus::Finished);
        assert_eq!(later.status, ProcessStatus::Running);
        assert!(!dir.path().join("processes.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_document_fails_without_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("offers.json"), b"{ not json").unwrap();

        let ids = HashSet::from([lapse_core::OfferId::new()]);
        let result = EntityStore::<Offer>::apply_transition(&storage, &ids, OfferStatus::Closed).await;
        assert!(result.is_err());

        let raw = std::fs::read_to_string(dir.path().join("offers.json")).unwrap();
        assert_eq!(raw, "{ not json");
    }
}
