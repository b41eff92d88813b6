//! Per-family cycle runner with skip-if-busy semantics.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lapse_core::Schedulable;
use lapse_storage::EntityStore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::executor::{CycleReport, TransitionExecutor};

/// Result of a cadence fire.
#[derive(Debug)]
pub enum Trigger {
    /// A new cycle was spawned
    Started(JoinHandle<CycleReport>),
    /// A cycle for this family was still running; the fire was dropped
    Skipped,
}

impl Trigger {
    /// Whether the fire was dropped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Trigger::Skipped)
    }
}

/// Clears the busy flag when the cycle ends, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Spawns cycles for one entity family, at most one at a time.
pub struct FamilyRunner<E, S> {
    executor: Arc<TransitionExecutor<S>>,
    busy: Arc<AtomicBool>,
    _family: PhantomData<fn() -> E>,
}

impl<E, S> FamilyRunner<E, S>
where
    E: Schedulable,
    S: EntityStore<E> + 'static,
{
    /// Create a runner sharing `executor` with other families.
    pub fn new(executor: Arc<TransitionExecutor<S>>) -> Self {
        Self {
            executor,
            busy: Arc::new(AtomicBool::new(false)),
            _family: PhantomData,
        }
    }

    /// Whether a cycle is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a cycle unless one is already running.
    pub fn trigger(&self) -> Trigger {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(family = %E::FAMILY, "previous cycle still running, skipping fire");
            return Trigger::Skipped;
        }

        debug!(family = %E::FAMILY, "starting cycle");
        let guard = BusyGuard(self.busy.clone());
        let executor = self.executor.clone();
        Trigger::Started(tokio::spawn(async move {
            let _guard = guard;
            executor.run_cycle::<E>().await
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use lapse_core::{Clock, ManualClock, Offer, OfferId, OfferStatus};
    use lapse_storage::{CandidateFilter, MemoryStore, Result as StorageResult};
    use tokio::sync::Notify;

    /// Memory store whose queries wait for a release signal.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        gate: Notify,
        queries: AtomicUsize,
    }

    #[async_trait]
    impl EntityStore<Offer> for GatedStore {
        async fn find_candidates(&self, filter: &CandidateFilter<OfferStatus>) -> StorageResult<Vec<Offer>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            EntityStore::<Offer>::find_candidates(&self.inner, filter).await
        }

        async fn apply_transition(&self, ids: &HashSet<OfferId>, status: OfferStatus) -> StorageResult<u64> {
            EntityStore::<Offer>::apply_transition(&self.inner, ids, status).await
        }

        async fn insert(&self, entity: &Offer) -> StorageResult<()> {
            EntityStore::<Offer>::insert(&self.inner, entity).await
        }

        async fn load(&self, id: OfferId) -> StorageResult<Option<Offer>> {
            EntityStore::<Offer>::load(&self.inner, id).await
        }
    }

    fn runner(store: Arc<GatedStore>) -> FamilyRunner<Offer, GatedStore> {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now));
        FamilyRunner::new(Arc::new(TransitionExecutor::new(store, clock)))
    }

    #[tokio::test]
    async fn second_fire_while_busy_is_dropped() {
        let store = Arc::new(GatedStore::default());
        let deadline = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        store.insert(&Offer::new(deadline)).await.unwrap();
        let runner = runner(store.clone());

        let Trigger::Started(first) = runner.trigger() else {
            panic!("first fire should start a cycle");
        };
        assert!(runner.is_busy());
        assert!(runner.trigger().is_skipped());
        assert!(runner.trigger().is_skipped());

        store.gate.notify_one();
        let report = first.await.unwrap();

        assert_eq!(report.transitioned, 1);
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn fires_again_once_idle() {
        let store = Arc::new(GatedStore::default());
        let runner = runner(store.clone());

        let Trigger::Started(first) = runner.trigger() else {
            panic!("expected a cycle");
        };
        store.gate.notify_one();
        first.await.unwrap();

        let Trigger::Started(second) = runner.trigger() else {
            panic!("idle runner should start a cycle");
        };
        store.gate.notify_one();
        second.await.unwrap();

        assert_eq!(store.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborted_cycle_releases_family() {
        let store = Arc::new(GatedStore::default());
        let runner = runner(store.clone());

        let Trigger::Started(cycle) = runner.trigger() else {
            panic!("expected a cycle");
        };
        cycle.abort();
        assert!(cycle.await.unwrap_err().is_cancelled());

        assert!(!runner.is_busy());
    }
}
