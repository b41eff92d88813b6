//! Process-wide scheduler - one independent loop per entity family.

use std::sync::Arc;

use lapse_core::{Clock, Offer, Process, Schedulable, Time};
use lapse_storage::EntityStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cadence::Cadence;
use crate::config::SchedulerConfig;
use crate::executor::{CycleReport, TransitionExecutor};
use crate::runner::{FamilyRunner, Trigger};

/// Owns the store and clock and spawns the family loops.
pub struct Scheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl<S> Scheduler<S>
where
    S: EntityStore<Offer> + EntityStore<Process> + 'static,
{
    /// Create a scheduler.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self { store, clock, config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn a loop for every family whose cadence is enabled.
    ///
    /// Cancelling `cancel` stops the loops after their in-flight cycles finish.
    pub fn start(&self, cancel: CancellationToken) -> SchedulerHandle {
        let executor = Arc::new(TransitionExecutor::new(self.store.clone(), self.clock.clone()));

        let mut loops = Vec::new();
        loops.extend(self.spawn_family::<Offer>(&executor, &cancel));
        loops.extend(self.spawn_family::<Process>(&executor, &cancel));

        info!(families = loops.len(), "scheduler started");
        SchedulerHandle { cancel, loops }
    }

    /// Run a single cycle for `E` immediately, outside any cadence.
    pub async fn sweep<E>(&self) -> CycleReport
    where
        E: Schedulable,
        S: EntityStore<E>,
    {
        TransitionExecutor::new(self.store.clone(), self.clock.clone())
            .run_cycle::<E>()
            .await
    }

    fn spawn_family<E>(
        &self,
        executor: &Arc<TransitionExecutor<S>>,
        cancel: &CancellationToken,
    ) -> Option<JoinHandle<()>>
    where
        E: Schedulable,
        S: EntityStore<E>,
    {
        let cadence = self.config.cadence_for(E::FAMILY);
        if !cadence.is_enabled() {
            info!(family = %E::FAMILY, "cadence off, family not scheduled");
            return None;
        }

        let runner = FamilyRunner::<E, S>::new(executor.clone());
        Some(tokio::spawn(run_family_loop(
            runner,
            cadence,
            self.clock.clone(),
            self.config.run_on_startup,
            cancel.clone(),
        )))
    }
}

/// Drive one family: wait for each cadence fire and trigger a cycle.
///
/// Fires that land while a cycle is running are dropped. On cancellation the
/// loop stops waiting and awaits its in-flight cycle before returning.
pub async fn run_family_loop<E, S>(
    runner: FamilyRunner<E, S>,
    cadence: Cadence,
    clock: Arc<dyn Clock>,
    run_on_startup: bool,
    cancel: CancellationToken,
) where
    E: Schedulable,
    S: EntityStore<E> + 'static,
{
    let family = E::FAMILY;
    info!(family = %family, cadence = %cadence, run_on_startup, "family loop started");

    let mut in_flight: Option<JoinHandle<CycleReport>> = None;
    if run_on_startup {
        if let Trigger::Started(handle) = runner.trigger() {
            in_flight = Some(handle);
        }
    }

    let mut last_fire: Option<Time> = None;
    loop {
        let now = clock.now();
        // Never schedule before the previous target, so an early wake-up
        // cannot fire the same daily slot twice.
        let from = last_fire.map_or(now, |fired| fired.max(now));
        let Some(target) = cadence.next_fire_after(from) else {
            error!(family = %family, cadence = %cadence, from = %from, "no next fire time, family stopped");
            break;
        };
        let delay = (target - now).to_std().unwrap_or_default();
        debug!(family = %family, next = %target, "waiting for next fire");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {
                last_fire = Some(target);
                if let Trigger::Started(handle) = runner.trigger() {
                    in_flight = Some(handle);
                }
            }
        }
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            info!(family = %family, "waiting for in-flight cycle");
        }
        if let Err(e) = handle.await {
            error!(family = %family, error = %e, "cycle task failed");
        }
    }
    info!(family = %family, "family loop stopped");
}

/// Running scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of family loops running.
    pub fn families(&self) -> usize {
        self.loops.len()
    }

    /// Stop every loop, letting in-flight cycles finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.wait().await;
    }

    /// Wait for every loop to stop.
    pub async fn wait(self) {
        for handle in self.loops {
            if let Err(e) = handle.await {
                error!(error = %e, "family loop panicked");
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use lapse_core::{ManualClock, OfferStatus, ProcessStatus};
    use lapse_storage::MemoryStore;

    fn every_minute() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.offer.cadence = "every 1m".parse().unwrap();
        config
    }

    async fn seeded() -> (Arc<MemoryStore>, Offer, Process) {
        let store = Arc::new(MemoryStore::new());
        let deadline = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let offer = Offer::new(deadline);
        let process = Process::new(deadline, 0);
        store.insert(&offer).await.unwrap();
        store.insert(&process).await.unwrap();
        (store, offer, process)
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap(),
        ))
    }

    async fn offer_status(store: &MemoryStore, offer: &Offer) -> OfferStatus {
        EntityStore::<Offer>::load(store, offer.id).await.unwrap().unwrap().status
    }

    async fn process_status(store: &MemoryStore, process: &Process) -> ProcessStatus {
        EntityStore::<Process>::load(store, process.id).await.unwrap().unwrap().status
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_before_first_interval() {
        let (store, offer, _) = seeded().await;
        let scheduler = Scheduler::new(store.clone(), clock(), every_minute());
        let handle = scheduler.start(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Open);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Closed);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_on_startup_fires_immediately() {
        let (store, offer, _) = seeded().await;
        let mut config = every_minute();
        config.run_on_startup = true;
        let scheduler = Scheduler::new(store.clone(), clock(), config);
        let handle = scheduler.start(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Closed);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn process_family_is_off_by_default() {
        let (store, _, process) = seeded().await;
        let mut config = every_minute();
        config.run_on_startup = true;
        let scheduler = Scheduler::new(store.clone(), clock(), config);
        let handle = scheduler.start(CancellationToken::new());
        assert_eq!(handle.families(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(process_status(&store, &process).await, ProcessStatus::Running);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn families_run_independently_when_enabled() {
        let (store, offer, process) = seeded().await;
        let mut config = every_minute();
        config.process_cadence_enabled = true;
        config.process.cadence = "every 5m".parse().unwrap();
        let scheduler = Scheduler::new(store.clone(), clock(), config);
        let handle = scheduler.start(CancellationToken::new());
        assert_eq!(handle.families(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Closed);
        assert_eq!(process_status(&store, &process).await, ProcessStatus::Running);

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(process_status(&store, &process).await, ProcessStatus::Finished);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_first_fire_does_nothing() {
        let (store, offer, _) = seeded().await;
        let scheduler = Scheduler::new(store.clone(), clock(), every_minute());
        let cancel = CancellationToken::new();
        let handle = scheduler.start(cancel.clone());

        cancel.cancel();
        handle.wait().await;

        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn unschedulable_cadence_ends_loop_without_firing() {
        let (store, offer, _) = seeded().await;
        let executor = Arc::new(TransitionExecutor::new(store.clone(), clock()));
        let runner = FamilyRunner::<Offer, _>::new(executor);
        let cadence = Cadence::Every(Duration::from_secs(u64::MAX));

        run_family_loop(runner, cadence, clock(), false, CancellationToken::new()).await;

        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Open);
    }

    #[tokio::test]
    async fn sweep_runs_one_cycle() {
        let (store, offer, process) = seeded().await;
        let scheduler = Scheduler::new(store.clone(), clock(), SchedulerConfig::default());

        let report = scheduler.sweep::<Offer>().await;
        assert_eq!(report.transitioned, 1);
        assert_eq!(offer_status(&store, &offer).await, OfferStatus::Closed);

        let report = scheduler.sweep::<Process>().await;
        assert_eq!(report.transitioned, 1);
        assert_eq!(process_status(&store, &process).await, ProcessStatus::Finished);
    }
}
