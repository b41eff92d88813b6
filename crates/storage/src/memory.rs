//! In-memory storage backend.
//!
//! Used by tests and by deployments that seed entities at boot. Each family
//! lives in its own table behind a `RwLock`; a batch transition holds the
//! write lock for the whole batch, so readers never see it half-applied.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use lapse_core::{LifecycleStatus, Offer, Process, Schedulable, Time};
use tokio::sync::RwLock;
use tracing::debug;

use super::trait_::{ensure_terminal, CandidateFilter, EntityStore, Result, StorageError};

/// Rows of one entity family keyed by id.
#[derive(Debug, Clone)]
pub struct Table<E: Schedulable> {
    rows: HashMap<E::Id, E>,
}

impl<E: Schedulable> Default for Table<E> {
    fn default() -> Self {
        Self { rows: HashMap::new() }
    }
}

impl<E: Schedulable> Table<E> {
    pub(crate) fn from_rows(rows: Vec<E>) -> Self {
        Self {
            rows: rows.into_iter().map(|e| (e.id(), e)).collect(),
        }
    }

    pub(crate) fn into_rows(self) -> Vec<E> {
        let mut rows: Vec<E> = self.rows.into_values().collect();
        rows.sort_by_key(|e| e.id());
        rows
    }

    pub(crate) fn candidates(&self, filter: &CandidateFilter<E::Status>) -> Vec<E> {
        self.rows
            .values()
            .filter(|e| filter.matches(*e))
            .cloned()
            .collect()
    }

    /// Apply a batch; only live rows move.
    pub(crate) fn transition(&mut self, ids: &HashSet<E::Id>, status: E::Status, at: Time) -> u64 {
        let mut moved = 0;
        for id in ids {
            if let Some(entity) = self.rows.get_mut(id) {
                if !entity.status().is_terminal() {
                    entity.mark(status, at);
                    moved += 1;
                }
            }
        }
        moved
    }

    pub(crate) fn insert(&mut self, entity: E) -> Result<()> {
        let id = entity.id();
        if self.rows.contains_key(&id) {
            return Err(StorageError::Duplicate(id.to_string()));
        }
        self.rows.insert(id, entity);
        Ok(())
    }

    pub(crate) fn get(&self, id: &E::Id) -> Option<E> {
        self.rows.get(id).cloned()
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    offers: RwLock<Table<Offer>>,
    processes: RwLock<Table<Process>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Gives the blanket `EntityStore` impl access to a family's table.
pub trait HoldsTable<E: Schedulable> {
    /// The family's table.
    fn table(&self) -> &RwLock<Table<E>>;
}

impl HoldsTable<Offer> for MemoryStore {
    fn table(&self) -> &RwLock<Table<Offer>> {
        &self.offers
    }
}

impl HoldsTable<Process> for MemoryStore {
    fn table(&self) -> &RwLock<Table<Process>> {
        &self.processes
    }
}

#[async_trait]
impl<E> EntityStore<E> for MemoryStore
where
    E: Schedulable,
    MemoryStore: HoldsTable<E>,
{
    async fn find_candidates(&self, filter: &CandidateFilter<E::Status>) -> Result<Vec<E>> {
        Ok(HoldsTable::<E>::table(self).read().await.candidates(filter))
    }

    async fn apply_transition(&self, ids: &HashSet<E::Id>, new_status: E::Status) -> Result<u64> {
        ensure_terminal::<E>(new_status)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let mut table = HoldsTable::<E>::table(self).write().await;
        let moved = table.transition(ids, new_status, chrono::Utc::now());
        debug!(family = %E::FAMILY, requested = ids.len(), moved, "applied transition");
        Ok(moved)
    }

    async fn insert(&self, entity: &E) -> Result<()> {
        HoldsTable::<E>::table(self).write().await.insert(entity.clone())
    }

    async fn load(&self, id: E::Id) -> Result<Option<E>> {
        Ok(HoldsTable::<E>::table(self).read().await.get(&id))
    }
}
