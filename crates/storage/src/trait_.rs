//! Entity store trait abstraction.

use std::collections::HashSet;

use async_trait::async_trait;
use lapse_core::{LifecycleStatus, Offer, OfferId, OfferStatus, Schedulable, Time};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entity already present on insert
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    /// Transition target was a live status
    #[error("Refusing to move {family} entities to non-terminal status {status}")]
    NonTerminalTarget {
        /// Entity family
        family: &'static str,
        /// Requested status
        status: String,
    },

    /// Row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse candidate filter pushed down to storage.
///
/// Matches `status == self.status && coarse_time <= self.cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFilter<St> {
    /// Required status
    pub status: St,
    /// Upper bound (inclusive) on the family's coarse timestamp
    pub cutoff: Time,
}

impl<St: LifecycleStatus> CandidateFilter<St> {
    /// Live entities whose coarse timestamp is at or before `now`.
    pub fn live_until(now: Time) -> Self {
        Self {
            status: St::LIVE,
            cutoff: now,
        }
    }

    /// Whether `entity` passes the filter.
    pub fn matches<E: Schedulable<Status = St>>(&self, entity: &E) -> bool {
        entity.status() == self.status && entity.coarse_time() <= self.cutoff
    }
}

/// Durable collection of one entity family.
///
/// A store type implements this once per family it holds.
#[async_trait]
pub trait EntityStore<E: Schedulable>: Send + Sync {
    /// Entities matching the coarse filter. Ordering is unspecified.
    async fn find_candidates(&self, filter: &CandidateFilter<E::Status>) -> Result<Vec<E>>;

    /// Move every live entity in `ids` to `new_status` in one atomic write.
    ///
    /// Returns the number of entities actually moved. Unknown and
    /// already-terminal ids are skipped; an empty set is a no-op.
    async fn apply_transition(&self, ids: &HashSet<E::Id>, new_status: E::Status) -> Result<u64>;

    /// Add a new entity.
    async fn insert(&self, entity: &E) -> Result<()>;

    /// Load an entity by id.
    async fn load(&self, id: E::Id) -> Result<Option<E>>;
}

/// Reject transitions that would re-open an entity.
pub(crate) fn ensure_terminal<E: Schedulable>(status: E::Status) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(StorageError::NonTerminalTarget {
            family: E::FAMILY.as_str(),
            status: status.to_string(),
        })
    }
}

/// Close an offer on behalf of an external caller.
///
/// Closing an already-closed offer is a no-op. Returns whether the offer
/// changed.
pub async fn close_offer<S>(store: &S, id: OfferId) -> Result<bool>
where
    S: EntityStore<Offer> + ?Sized,
{
    let ids = HashSet::from([id]);
    let moved = store.apply_transition(&ids, OfferStatus::Closed).await?;
    Ok(moved > 0)
}
